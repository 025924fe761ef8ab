use std::fmt::{Display, Formatter};
use std::rc::Rc;

use glam::{Mat4, Vec3};
use vireo_gfx::error::GfxResult;
use vireo_render_interface::gpu_resource_manager::GpuResourceManager;
use vireo_render_interface::handles::{GpuBufferHandle, GpuImageHandle};

/// PBR metallic-roughness 材质
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: Option<String>,
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub emissive_factor: [f32; 3],
    /// sRGB 编码的 base color 纹理
    pub base_color_texture: Option<GpuImageHandle>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: Some("default".to_string()),
            base_color_factor: [1.0; 4],
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            emissive_factor: [0.0; 3],
            base_color_texture: None,
        }
    }
}

/// 可以单独绘制的一组三角形，使用 u32 索引
#[derive(Debug, Clone)]
pub struct Primitive {
    pub vertex_buffer: GpuBufferHandle,
    pub index_buffer: GpuBufferHandle,
    pub vertex_count: u32,
    pub index_count: u32,
    /// 多个 primitive 共享同一个材质
    pub material: Rc<Material>,
}

#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: Option<String>,
    pub primitives: Vec<Primitive>,
    /// 模型空间的包围盒
    pub bounds_min: Vec3,
    pub bounds_max: Vec3,
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: Option<String>,
    /// 在 [`Scene::nodes`] 中的位置，总是小于自身的位置
    pub parent: Option<usize>,
    pub local: Mat4,
    pub world: Mat4,
    /// 多个节点可以引用同一个 mesh
    pub mesh: Option<Rc<Mesh>>,
}

/// 加载过程中被跳过的内容，不会导致整个场景失败
#[derive(Debug, Clone, PartialEq)]
pub enum SceneWarning {
    SkippedPrimitive { mesh: usize, primitive: usize, reason: String },
    SkippedMesh { mesh: usize, reason: String },
    /// 节点引用了被跳过的 mesh，children 挂到它的 parent 上
    SkippedNode { node: usize, mesh: usize },
    SkippedImage { image: usize, reason: String },
    MissingTexture { material: usize, image: usize },
    /// device local 内存不足，退回到 host visible
    HostVisibleFallback { buffer: String },
}

impl Display for SceneWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SceneWarning::SkippedPrimitive {
                mesh,
                primitive,
                reason,
            } => write!(f, "mesh {} primitive {} skipped: {}", mesh, primitive, reason),
            SceneWarning::SkippedMesh { mesh, reason } => write!(f, "mesh {} skipped: {}", mesh, reason),
            SceneWarning::SkippedNode { node, mesh } => {
                write!(f, "node {} skipped because mesh {} is malformed", node, mesh)
            }
            SceneWarning::SkippedImage { image, reason } => write!(f, "image {} skipped: {}", image, reason),
            SceneWarning::MissingTexture { material, image } => {
                write!(f, "material {} loaded without texture (image {} unavailable)", material, image)
            }
            SceneWarning::HostVisibleFallback { buffer } => {
                write!(f, "buffer {} falls back to host visible memory", buffer)
            }
        }
    }
}

/// 加载完成的场景
///
/// 持有所有 mesh buffer 和纹理的引用（每个引用计数为 1），
/// 不再使用时必须调用 [`Scene::release`] 还给 resource manager。
///
/// mesh 和材质在 CPU 端通过 `Rc` 共享，只读；`meshes` 和 `materials` 按照加载顺序排列。
pub struct Scene {
    pub(crate) nodes: Vec<SceneNode>,
    pub(crate) meshes: Vec<Rc<Mesh>>,
    pub(crate) materials: Vec<Rc<Material>>,
    pub(crate) images: Vec<GpuImageHandle>,
    pub(crate) warnings: Vec<SceneWarning>,

    #[cfg(debug_assertions)]
    pub(crate) released: bool,
}

// getters
impl Scene {
    #[inline]
    pub fn nodes(&self) -> &[SceneNode] {
        &self.nodes
    }

    #[inline]
    pub fn meshes(&self) -> &[Rc<Mesh>] {
        &self.meshes
    }

    #[inline]
    pub fn materials(&self) -> &[Rc<Material>] {
        &self.materials
    }

    #[inline]
    pub fn images(&self) -> &[GpuImageHandle] {
        &self.images
    }

    #[inline]
    pub fn warnings(&self) -> &[SceneWarning] {
        &self.warnings
    }
}
// tools
impl Scene {
    /// 所有需要绘制的 (world transform, mesh)
    pub fn draw_items(&self) -> impl Iterator<Item = (Mat4, &Mesh)> + '_ {
        self.nodes.iter().filter_map(|node| node.mesh.as_deref().map(|mesh| (node.world, mesh)))
    }

    /// 世界空间的包围盒，没有任何 mesh 时返回 None
    pub fn world_bounds(&self) -> Option<(Vec3, Vec3)> {
        let mut bounds: Option<(Vec3, Vec3)> = None;
        for (world, mesh) in self.draw_items() {
            let (lo, hi) = (mesh.bounds_min, mesh.bounds_max);
            for corner in 0..8 {
                let local = Vec3::new(
                    if corner & 1 == 0 { lo.x } else { hi.x },
                    if corner & 2 == 0 { lo.y } else { hi.y },
                    if corner & 4 == 0 { lo.z } else { hi.z },
                );
                let p = world.transform_point3(local);
                bounds = Some(match bounds {
                    Some((min, max)) => (min.min(p), max.max(p)),
                    None => (p, p),
                });
            }
        }
        bounds
    }
}
// destroy
impl Scene {
    /// 把所有 buffer 和 image 还给 resource manager，真正的释放发生在引用它们的帧完成之后
    pub fn release(mut self, resources: &mut GpuResourceManager) -> GfxResult<()> {
        for mesh in &self.meshes {
            for primitive in &mesh.primitives {
                resources.release_buffer(primitive.vertex_buffer)?;
                resources.release_buffer(primitive.index_buffer)?;
            }
        }
        for image in &self.images {
            resources.release_image(*image)?;
        }
        log::info!(
            "scene released: {} meshes, {} materials, {} images",
            self.meshes.len(),
            self.materials.len(),
            self.images.len()
        );

        #[cfg(debug_assertions)]
        {
            self.released = true;
        }
        Ok(())
    }
}
impl Drop for Scene {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            if !self.released && !std::thread::panicking() {
                log::error!("Scene dropped without release(), GPU resources leak until shutdown");
            }
        }
    }
}
