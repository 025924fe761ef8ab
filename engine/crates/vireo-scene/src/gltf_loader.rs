//! glTF / GLB 场景加载
//!
//! gltf 的格式，参考 https://www.khronos.org/files/gltf20-reference-guide.pdf
//!
//! 加载分为两个阶段：
//! 1. CPU 阶段：解析文档、读取 buffer、校验节点层级、解码图片、读取顶点数据。这个阶段失败不会分配任何 GPU 资源
//! 2. GPU 阶段：分配 buffer 和 image，在同一个 one-time command buffer 中通过 staging 上传，提交后等待完成

use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use ash::vk;
use glam::{Mat4, Vec3};
use itertools::Itertools;
use vireo_gfx::commands::{CommandEncoder, SubmitDesc};
use vireo_gfx::device_context::DeviceContext;
use vireo_gfx::error::GfxError;
use vireo_gfx::handles::RawCommandBuffer;
use vireo_gfx::types::{BufferUsage, FenceStatus, ImageDesc, MemoryResidency, QueueKind};
use vireo_render_interface::gpu_resource_manager::GpuResourceManager;
use vireo_render_interface::handles::{GpuBufferHandle, GpuImageHandle};

use crate::error::{SceneError, SceneResult};
use crate::image_decode::{DecodeRequest, DecodeResult, DecodedImage, ImageDecoder, ImageSource};
use crate::node_arena::build_node_arena;
use crate::scene::{Material, Mesh, Primitive, Scene, SceneNode, SceneWarning};
use crate::vertex::SceneVertex;

#[derive(Debug, Clone, Copy)]
pub struct SceneLoadConfig {
    /// 解码线程数，0 表示使用 rayon 的默认值
    pub decode_threads: usize,
    /// 等待上传完成的最长时间，超时视为设备丢失
    pub upload_timeout: Duration,
}

impl Default for SceneLoadConfig {
    fn default() -> Self {
        Self {
            decode_threads: 2,
            upload_timeout: Duration::from_secs(5),
        }
    }
}

/// 导入 gltf 格式的场景
///
/// 支持 mesh、PBR 材质和 base color 纹理，不支持 skin，动画，相机
pub struct SceneLoader {
    decoder: ImageDecoder,
    upload_timeout: Duration,
}

// new & init
impl SceneLoader {
    pub fn new(config: SceneLoadConfig) -> SceneResult<Self> {
        Ok(Self {
            decoder: ImageDecoder::new(config.decode_threads)?,
            upload_timeout: config.upload_timeout,
        })
    }
}
// tools
impl SceneLoader {
    /// 从文件加载，外部 buffer 和图片相对于文件所在的目录
    ///
    /// `frame_id`：上传命令所属的帧，staging buffer 在这一帧完成后回收
    pub fn load_file(
        &self,
        device: &DeviceContext,
        resources: &mut GpuResourceManager,
        path: &Path,
        frame_id: u64,
    ) -> SceneResult<Scene> {
        log::info!("loading scene: {:?}", path);
        let bytes = std::fs::read(path)?;
        self.load_slice(device, resources, &bytes, path.parent(), frame_id)
    }

    /// 从内存中的 `.gltf` 或 `.glb` 数据加载
    pub fn load_slice(
        &self,
        device: &DeviceContext,
        resources: &mut GpuResourceManager,
        bytes: &[u8],
        base_dir: Option<&Path>,
        frame_id: u64,
    ) -> SceneResult<Scene> {
        let gltf::Gltf { document, blob } = gltf::Gltf::from_slice(bytes)?;
        let buffers = gltf::import_buffers(&document, base_dir, blob)?;

        // 层级非法时在分配任何资源之前失败
        let children = document.nodes().map(|node| node.children().map(|child| child.index()).collect_vec()).collect_vec();
        let scene_roots = document
            .default_scene()
            .or_else(|| document.scenes().next())
            .map(|scene| scene.nodes().map(|node| node.index()).collect_vec())
            .unwrap_or_default();
        let arena = build_node_arena(&children, &scene_roots)?;

        let mut warnings = vec![];
        let decoded = self.decode_images(&document, &buffers, base_dir, &mut warnings);
        let cpu_meshes = document.meshes().map(|mesh| read_mesh(&mesh, &buffers, &mut warnings)).collect_vec();

        let uploaded = self.upload(device, resources, frame_id, &document, cpu_meshes, decoded, &mut warnings)?;

        // 构建节点：被跳过的节点把自己的 transform 合并到 children 上
        #[derive(Clone, Copy)]
        enum Resolved {
            Kept(usize),
            Skipped { parent: Option<usize>, fold: Mat4 },
        }
        let doc_nodes = document.nodes().collect_vec();
        let mut resolved: Vec<Resolved> = Vec::with_capacity(arena.len());
        let mut nodes: Vec<SceneNode> = Vec::with_capacity(arena.len());
        for (_, doc_index, arena_parent) in arena.iter() {
            let node = &doc_nodes[doc_index];
            let (parent, fold) = match arena_parent.map(|p| resolved[p]) {
                None => (None, Mat4::IDENTITY),
                Some(Resolved::Kept(index)) => (Some(index), Mat4::IDENTITY),
                Some(Resolved::Skipped { parent, fold }) => (parent, fold),
            };
            // gltf 这个库使用 column major 的方式存放矩阵（每个元素相当于矩阵的一列）
            let local = fold * Mat4::from_cols_array_2d(&node.transform().matrix());

            let mesh = match node.mesh() {
                None => None,
                Some(doc_mesh) => match &uploaded.mesh_map[doc_mesh.index()] {
                    Some(mesh) => Some(Rc::clone(mesh)),
                    None => {
                        log::warn!("node {} skipped: mesh {} is malformed", doc_index, doc_mesh.index());
                        warnings.push(SceneWarning::SkippedNode {
                            node: doc_index,
                            mesh: doc_mesh.index(),
                        });
                        resolved.push(Resolved::Skipped { parent, fold: local });
                        continue;
                    }
                },
            };

            let world = parent.map_or(local, |p| nodes[p].world * local);
            resolved.push(Resolved::Kept(nodes.len()));
            nodes.push(SceneNode {
                name: node.name().map(str::to_string),
                parent,
                local,
                world,
                mesh,
            });
        }

        log::info!(
            "scene loaded: {} nodes, {} meshes, {} materials, {} images, {} warnings",
            nodes.len(),
            uploaded.meshes.len(),
            uploaded.materials.len(),
            uploaded.images.len(),
            warnings.len()
        );

        Ok(Scene {
            nodes,
            meshes: uploaded.meshes,
            materials: uploaded.materials,
            images: uploaded.images,
            warnings,

            #[cfg(debug_assertions)]
            released: false,
        })
    }

    /// 收集文档中所有图片的数据，交给线程池解码
    ///
    /// 返回的数组按 image 索引排列，解码失败的位置为 None
    fn decode_images(
        &self,
        document: &gltf::Document,
        buffers: &[gltf::buffer::Data],
        base_dir: Option<&Path>,
        warnings: &mut Vec<SceneWarning>,
    ) -> Vec<Option<DecodedImage>> {
        let skip = |image: usize, reason: String, warnings: &mut Vec<SceneWarning>| {
            log::warn!("image {} skipped: {}", image, reason);
            warnings.push(SceneWarning::SkippedImage { image, reason });
        };

        let mut requests = vec![];
        for image in document.images() {
            let index = image.index();
            match image.source() {
                gltf::image::Source::View { view, .. } => {
                    let range = view.offset()..view.offset() + view.length();
                    match buffers.get(view.buffer().index()).and_then(|data| data.0.get(range)) {
                        Some(bytes) => requests.push(DecodeRequest {
                            index,
                            source: ImageSource::Bytes(bytes.to_vec()),
                        }),
                        None => skip(index, "buffer view out of range".to_string(), warnings),
                    }
                }
                gltf::image::Source::Uri { uri, .. } => {
                    if uri.starts_with("data:") {
                        skip(index, "data uri images are not supported".to_string(), warnings);
                    } else if let Some(base_dir) = base_dir {
                        requests.push(DecodeRequest {
                            index,
                            source: ImageSource::File(base_dir.join(uri)),
                        });
                    } else {
                        skip(index, format!("external image {} without base directory", uri), warnings);
                    }
                }
            }
        }

        let mut decoded: Vec<Option<DecodedImage>> = (0..document.images().len()).map(|_| None).collect();
        for result in self.decoder.decode_all(requests) {
            match result {
                DecodeResult::Success(image) => {
                    let index = image.index;
                    decoded[index] = Some(image);
                }
                DecodeResult::Failure(index, reason) => skip(index, reason, warnings),
            }
        }
        decoded
    }

    /// GPU 阶段，失败时释放已经分配的所有资源
    #[allow(clippy::too_many_arguments)]
    fn upload(
        &self,
        device: &DeviceContext,
        resources: &mut GpuResourceManager,
        frame_id: u64,
        document: &gltf::Document,
        cpu_meshes: Vec<Option<CpuMesh>>,
        decoded: Vec<Option<DecodedImage>>,
        warnings: &mut Vec<SceneWarning>,
    ) -> SceneResult<UploadedScene> {
        let cmd = device.create_command_buffer(QueueKind::Graphics, "scene-upload")?;
        if let Err(e) = device.begin_commands(cmd) {
            device.destroy_command_buffer(cmd);
            return Err(e.into());
        }

        let mut ctx = UploadContext {
            device,
            encoder: device.encoder(cmd),
            frame_id,
            buffers: vec![],
            images: vec![],
        };

        let uploaded = match ctx.upload_scene(resources, document, cpu_meshes, decoded, warnings) {
            Ok(uploaded) => uploaded,
            Err(e) => {
                // command buffer 还没有提交，直接丢弃
                let _ = device.end_commands(cmd);
                device.destroy_command_buffer(cmd);
                ctx.rollback(resources);
                return Err(e);
            }
        };

        if let Err(e) = self.submit_and_wait(device, cmd) {
            ctx.rollback(resources);
            return Err(e);
        }
        Ok(uploaded)
    }

    fn submit_and_wait(&self, device: &DeviceContext, cmd: RawCommandBuffer) -> SceneResult<()> {
        device.end_commands(cmd)?;
        let fence = device.create_fence(false, "scene-upload")?;
        if let Err(e) = device.submit(&SubmitDesc::new(&[cmd]).fence(fence)) {
            device.destroy_fence(fence);
            device.destroy_command_buffer(cmd);
            return Err(e.into());
        }

        match device.wait_fence(fence, self.upload_timeout)? {
            FenceStatus::Signaled => {
                device.destroy_fence(fence);
                device.destroy_command_buffer(cmd);
                Ok(())
            }
            FenceStatus::TimedOut => {
                // 设备已经不可用，fence 和 command buffer 留给 shutdown 处理
                log::error!("scene upload did not finish within {:?}", self.upload_timeout);
                Err(GfxError::DeviceLost.into())
            }
        }
    }
}

/// CPU 端的一个 primitive
struct CpuPrimitive {
    index: usize,
    vertices: Vec<SceneVertex>,
    indices: Vec<u32>,
    material: Option<usize>,
}

struct CpuMesh {
    name: Option<String>,
    primitives: Vec<CpuPrimitive>,
    bounds_min: Vec3,
    bounds_max: Vec3,
}

/// 读取一个 mesh 的所有 primitive，非法的 primitive 被跳过；没有任何合法 primitive 的 mesh 返回 None
fn read_mesh(mesh: &gltf::Mesh, buffers: &[gltf::buffer::Data], warnings: &mut Vec<SceneWarning>) -> Option<CpuMesh> {
    let mut primitives = vec![];
    for primitive in mesh.primitives() {
        match read_primitive(&primitive, buffers) {
            Ok(primitive) => primitives.push(primitive),
            Err(reason) => {
                log::warn!("mesh {} primitive {} skipped: {}", mesh.index(), primitive.index(), reason);
                warnings.push(SceneWarning::SkippedPrimitive {
                    mesh: mesh.index(),
                    primitive: primitive.index(),
                    reason,
                });
            }
        }
    }

    if primitives.is_empty() {
        let reason = "no valid primitive".to_string();
        log::warn!("mesh {} skipped: {}", mesh.index(), reason);
        warnings.push(SceneWarning::SkippedMesh {
            mesh: mesh.index(),
            reason,
        });
        return None;
    }

    let (bounds_min, bounds_max) = primitives
        .iter()
        .flat_map(|p| p.vertices.iter())
        .map(|v| Vec3::from(v.position))
        .fold((Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)), |(min, max), p| (min.min(p), max.max(p)));

    Some(CpuMesh {
        name: mesh.name().map(str::to_string),
        primitives,
        bounds_min,
        bounds_max,
    })
}

/// primitive 的结构
///
/// ```json
/// {
///     "mode": 4,  // 点，线，三角面
///     "indices": n,
///     "attributes": { "POSITION": n, "NORMAL": n, "TEXCOORD_0": n },
///     "material": n,
/// }
/// ```
fn read_primitive(primitive: &gltf::Primitive, buffers: &[gltf::buffer::Data]) -> Result<CpuPrimitive, String> {
    const DEFAULT_NORMAL: [f32; 3] = [0_f32; 3];
    const DEFAULT_UV: [f32; 2] = [0_f32; 2];

    if primitive.mode() != gltf::mesh::Mode::Triangles {
        return Err(format!("unsupported mode {:?}", primitive.mode()));
    }

    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));

    let positions: Vec<[f32; 3]> = reader.read_positions().ok_or("missing POSITION attribute")?.collect();
    let vertex_cnt = positions.len();
    if vertex_cnt == 0 {
        return Err("empty POSITION attribute".to_string());
    }

    let normals: Vec<[f32; 3]> = reader.read_normals().map_or_else(|| vec![DEFAULT_NORMAL; vertex_cnt], Iterator::collect);
    let uvs: Vec<[f32; 2]> =
        reader.read_tex_coords(0).map_or_else(|| vec![DEFAULT_UV; vertex_cnt], |uv| uv.into_f32().collect());
    if normals.len() != vertex_cnt || uvs.len() != vertex_cnt {
        return Err("attribute counts do not match".to_string());
    }

    // 没有 indices 时按顺序生成
    let indices: Vec<u32> = reader
        .read_indices()
        .map_or_else(|| (0..vertex_cnt as u32).collect(), |indices| indices.into_u32().collect());
    if indices.is_empty() || indices.len() % 3 != 0 {
        return Err(format!("index count {} is not a positive multiple of 3", indices.len()));
    }
    if let Some(bad) = indices.iter().find(|&&index| index as usize >= vertex_cnt) {
        return Err(format!("index {} out of range ({} vertices)", bad, vertex_cnt));
    }

    let vertices = itertools::izip!(positions, normals, uvs)
        .map(|(position, normal, uv)| SceneVertex { position, normal, uv })
        .collect();

    Ok(CpuPrimitive {
        index: primitive.index(),
        vertices,
        indices,
        material: primitive.material().index(),
    })
}

struct UploadedScene {
    meshes: Vec<Rc<Mesh>>,
    /// 文档中的 mesh 索引 -> Scene 中的 mesh，被跳过的是 None
    mesh_map: Vec<Option<Rc<Mesh>>>,
    materials: Vec<Rc<Material>>,
    images: Vec<GpuImageHandle>,
}

struct UploadContext<'a> {
    device: &'a DeviceContext,
    encoder: CommandEncoder<'a>,
    frame_id: u64,
    /// 已经分配的资源，失败时回滚
    buffers: Vec<GpuBufferHandle>,
    images: Vec<GpuImageHandle>,
}

impl UploadContext<'_> {
    fn upload_scene(
        &mut self,
        resources: &mut GpuResourceManager,
        document: &gltf::Document,
        cpu_meshes: Vec<Option<CpuMesh>>,
        decoded: Vec<Option<DecodedImage>>,
        warnings: &mut Vec<SceneWarning>,
    ) -> SceneResult<UploadedScene> {
        // 纹理
        let mut image_handles: Vec<Option<GpuImageHandle>> = Vec::with_capacity(decoded.len());
        for (index, image) in decoded.iter().enumerate() {
            let handle = match image {
                Some(image) => self.upload_texture(resources, index, image, warnings)?,
                None => None,
            };
            image_handles.push(handle);
        }

        // 材质
        let mut materials = document
            .materials()
            .filter_map(|material| material.index().map(|index| (index, material)))
            .map(|(index, material)| {
                let pbr = material.pbr_metallic_roughness();
                let base_color_texture = pbr.base_color_texture().and_then(|info| {
                    let image = info.texture().source().index();
                    let handle = image_handles.get(image).copied().flatten();
                    if handle.is_none() {
                        log::warn!("material {} loaded without base color texture (image {})", index, image);
                        warnings.push(SceneWarning::MissingTexture { material: index, image });
                    }
                    handle
                });
                Rc::new(Material {
                    name: material.name().map(str::to_string),
                    base_color_factor: pbr.base_color_factor(),
                    metallic_factor: pbr.metallic_factor(),
                    roughness_factor: pbr.roughness_factor(),
                    emissive_factor: material.emissive_factor(),
                    base_color_texture,
                })
            })
            .collect_vec();
        // 没有材质的 primitive 共享同一个默认材质
        let mut default_material: Option<Rc<Material>> = None;

        // mesh
        let mut meshes = vec![];
        let mut mesh_map = Vec::with_capacity(cpu_meshes.len());
        for (mesh_index, cpu_mesh) in cpu_meshes.into_iter().enumerate() {
            let Some(cpu_mesh) = cpu_mesh else {
                mesh_map.push(None);
                continue;
            };

            let mut primitives = Vec::with_capacity(cpu_mesh.primitives.len());
            for primitive in &cpu_mesh.primitives {
                let name = format!("mesh{}-prim{}", mesh_index, primitive.index);
                let vertex_buffer = self.upload_geometry(
                    resources,
                    &format!("{name}-vb"),
                    BufferUsage::VERTEX,
                    bytemuck::cast_slice(&primitive.vertices),
                    warnings,
                )?;
                let index_buffer = self.upload_geometry(
                    resources,
                    &format!("{name}-ib"),
                    BufferUsage::INDEX,
                    bytemuck::cast_slice(&primitive.indices),
                    warnings,
                )?;
                let material = match primitive.material.and_then(|index| materials.get(index)) {
                    Some(material) => Rc::clone(material),
                    None => Rc::clone(default_material.get_or_insert_with(|| Rc::new(Material::default()))),
                };
                primitives.push(Primitive {
                    vertex_buffer,
                    index_buffer,
                    vertex_count: primitive.vertices.len() as u32,
                    index_count: primitive.indices.len() as u32,
                    material,
                });
            }

            let mesh = Rc::new(Mesh {
                name: cpu_mesh.name,
                primitives,
                bounds_min: cpu_mesh.bounds_min,
                bounds_max: cpu_mesh.bounds_max,
            });
            mesh_map.push(Some(Rc::clone(&mesh)));
            meshes.push(mesh);
        }

        materials.extend(default_material);

        Ok(UploadedScene {
            meshes,
            mesh_map,
            materials,
            images: image_handles.into_iter().flatten().collect(),
        })
    }

    /// 优先使用 device local 的 buffer 并通过 staging 上传；
    /// device local 内存不足时退回到 host visible，直接写入
    fn upload_geometry(
        &mut self,
        resources: &mut GpuResourceManager,
        name: &str,
        usage: BufferUsage,
        data: &[u8],
        warnings: &mut Vec<SceneWarning>,
    ) -> SceneResult<GpuBufferHandle> {
        let size = data.len() as u64;
        match resources.allocate_buffer(
            self.device,
            size,
            usage | BufferUsage::TRANSFER_DST,
            MemoryResidency::DeviceLocal,
            name,
        ) {
            Ok(handle) => {
                self.buffers.push(handle);
                resources.upload_buffer(self.device, &self.encoder, self.frame_id, handle, 0, data)?;
                Ok(handle)
            }
            Err(GfxError::OutOfDeviceMemory { .. }) => {
                log::warn!("buffer {} ({} bytes) falls back to host visible memory", name, size);
                warnings.push(SceneWarning::HostVisibleFallback {
                    buffer: name.to_string(),
                });
                let handle = resources.allocate_buffer(self.device, size, usage, MemoryResidency::HostVisible, name)?;
                self.buffers.push(handle);
                resources.write_buffer(self.device, handle, 0, data)?;
                Ok(handle)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// base color 纹理以 sRGB 编码；内存不足时跳过这张图
    fn upload_texture(
        &mut self,
        resources: &mut GpuResourceManager,
        index: usize,
        image: &DecodedImage,
        warnings: &mut Vec<SceneWarning>,
    ) -> SceneResult<Option<GpuImageHandle>> {
        let desc = ImageDesc::texture_2d(image.width, image.height, vk::Format::R8G8B8A8_SRGB);
        let handle = match resources.allocate_image(self.device, &desc, &format!("scene-image-{index}")) {
            Ok(handle) => handle,
            Err(GfxError::OutOfDeviceMemory { requested, .. }) => {
                let reason = format!("out of device memory ({} bytes)", requested);
                log::warn!("image {} skipped: {}", index, reason);
                warnings.push(SceneWarning::SkippedImage { image: index, reason });
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        self.images.push(handle);
        resources.upload_image(self.device, &self.encoder, self.frame_id, handle, &image.pixels)?;
        Ok(Some(handle))
    }

    fn rollback(&self, resources: &mut GpuResourceManager) {
        log::warn!(
            "scene load failed, releasing {} buffers and {} images",
            self.buffers.len(),
            self.images.len()
        );
        for buffer in &self.buffers {
            if let Err(e) = resources.release_buffer(*buffer) {
                log::error!("failed to release scene buffer: {}", e);
            }
        }
        for image in &self.images {
            if let Err(e) = resources.release_image(*image) {
                log::error!("failed to release scene image: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;
    use vireo_gfx::adapter::DevicePreferences;
    use vireo_gfx::headless::{HeadlessBackend, HeadlessConfig};
    use vireo_render_interface::gpu_resource_manager::ResourceManagerConfig;

    fn headless_device(config: HeadlessConfig) -> (HeadlessBackend, DeviceContext) {
        let backend = HeadlessBackend::new(config, &DevicePreferences::default()).unwrap();
        let device = DeviceContext::from_backend(Box::new(backend.clone()));
        (backend, device)
    }

    /// 打包成 GLB：header + JSON chunk + BIN chunk
    fn glb(json: &serde_json::Value, bin: &[u8]) -> Vec<u8> {
        let mut json_bytes = serde_json::to_vec(json).unwrap();
        while json_bytes.len() % 4 != 0 {
            json_bytes.push(b' ');
        }
        let mut bin_bytes = bin.to_vec();
        while bin_bytes.len() % 4 != 0 {
            bin_bytes.push(0);
        }

        let total = 12 + 8 + json_bytes.len() + 8 + bin_bytes.len();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"glTF");
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&0x4E4F534Au32.to_le_bytes());
        out.extend_from_slice(&json_bytes);
        out.extend_from_slice(&(bin_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&0x004E4942u32.to_le_bytes());
        out.extend_from_slice(&bin_bytes);
        out
    }

    const TRIANGLE_POSITIONS: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];

    /// 三角形的 positions (36 bytes) + u16 indices (6 bytes)，补齐到 44 bytes
    fn triangle_bin() -> Vec<u8> {
        let mut bin: Vec<u8> = bytemuck::cast_slice(&TRIANGLE_POSITIONS).to_vec();
        bin.extend_from_slice(bytemuck::cast_slice(&[0u16, 1, 2]));
        bin.extend_from_slice(&[0, 0]);
        bin
    }

    fn triangle_json(extra_bin: usize) -> serde_json::Value {
        json!({
            "asset": { "version": "2.0" },
            "buffers": [{ "byteLength": 44 + extra_bin }],
            "bufferViews": [
                { "buffer": 0, "byteOffset": 0, "byteLength": 36, "target": 34962 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 6, "target": 34963 }
            ],
            "accessors": [
                { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                  "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] },
                { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }
            ],
            "materials": [{ "name": "red", "pbrMetallicRoughness": { "baseColorFactor": [1.0, 0.0, 0.0, 1.0] } }],
            "meshes": [{ "name": "triangle", "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1, "material": 0 }] }],
            "nodes": [{ "name": "root", "mesh": 0 }],
            "scenes": [{ "nodes": [0] }],
            "scene": 0
        })
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 128, 0, 255]));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    /// 在三角形的基础上加一张 glb 内嵌的纹理
    fn textured_triangle(image_bytes: &[u8]) -> Vec<u8> {
        let mut json = triangle_json(image_bytes.len());
        json["bufferViews"].as_array_mut().unwrap().push(json!({
            "buffer": 0, "byteOffset": 44, "byteLength": image_bytes.len()
        }));
        json["images"] = json!([{ "bufferView": 2, "mimeType": "image/png" }]);
        json["textures"] = json!([{ "source": 0 }]);
        json["materials"][0]["pbrMetallicRoughness"]["baseColorTexture"] = json!({ "index": 0 });

        let mut bin = triangle_bin();
        bin.extend_from_slice(image_bytes);
        glb(&json, &bin)
    }

    fn finish(backend: HeadlessBackend, device: DeviceContext, mut resources: GpuResourceManager, scene: Scene) {
        scene.release(&mut resources).unwrap();
        resources.destroy(&device);
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.live_image_count(), 0);
        assert!(backend.violations().is_empty(), "{:?}", backend.violations());
        device.destroy();
    }

    #[test]
    fn test_single_triangle() {
        let (backend, device) = headless_device(HeadlessConfig::default());
        let mut resources = GpuResourceManager::new(ResourceManagerConfig::default());
        let loader = SceneLoader::new(SceneLoadConfig::default()).unwrap();

        let bytes = glb(&triangle_json(0), &triangle_bin());
        let scene = loader.load_slice(&device, &mut resources, &bytes, None, 0).unwrap();

        assert!(scene.warnings().is_empty(), "{:?}", scene.warnings());
        assert_eq!(scene.nodes().len(), 1);
        assert_eq!(scene.meshes().len(), 1);
        assert_eq!(scene.materials().len(), 1);
        assert_eq!(scene.materials()[0].base_color_factor, [1.0, 0.0, 0.0, 1.0]);

        let primitive = &scene.meshes()[0].primitives[0];
        assert_eq!((primitive.vertex_count, primitive.index_count), (3, 3));
        assert!(Rc::ptr_eq(&primitive.material, &scene.materials()[0]));
        // scene 的列表和唯一的节点 / primitive
        assert_eq!(Rc::strong_count(&scene.meshes()[0]), 2);
        assert_eq!(Rc::strong_count(&scene.materials()[0]), 2);
        assert_eq!(resources.buffer_ref_count(primitive.vertex_buffer), Some(1));
        assert_eq!(resources.buffer_ref_count(primitive.index_buffer), Some(1));

        // 上传在加载返回之前已经完成
        assert_eq!(backend.pending_submissions(), 0);
        let vb = backend.read_buffer(resources.buffer_raw(primitive.vertex_buffer).unwrap()).unwrap();
        let second = SceneVertex {
            position: TRIANGLE_POSITIONS[1],
            ..Default::default()
        };
        assert_eq!(&vb[SceneVertex::STRIDE..2 * SceneVertex::STRIDE], bytemuck::bytes_of(&second));
        let ib = backend.read_buffer(resources.buffer_raw(primitive.index_buffer).unwrap()).unwrap();
        assert_eq!(&ib[..12], bytemuck::cast_slice::<u32, u8>(&[0, 1, 2]));
        let vb_desc = backend.buffer_desc(resources.buffer_raw(primitive.vertex_buffer).unwrap()).unwrap();
        assert_eq!(vb_desc.residency, MemoryResidency::DeviceLocal);

        let (min, max) = scene.world_bounds().unwrap();
        assert_eq!(min, Vec3::ZERO);
        assert_eq!(max, Vec3::new(1.0, 1.0, 0.0));

        finish(backend, device, resources, scene);
    }

    #[test]
    fn test_cycle_rejected() {
        let (backend, device) = headless_device(HeadlessConfig::default());
        let mut resources = GpuResourceManager::new(ResourceManagerConfig::default());
        let loader = SceneLoader::new(SceneLoadConfig::default()).unwrap();

        let mut json = triangle_json(0);
        json["nodes"] = json!([{ "mesh": 0 }, { "children": [2] }, { "children": [1] }]);
        let bytes = glb(&json, &triangle_bin());

        let result = loader.load_slice(&device, &mut resources, &bytes, None, 0);
        assert!(matches!(result, Err(SceneError::Malformed(_))));
        // 层级校验在分配之前
        assert_eq!(backend.total_buffer_allocations(), 0);

        resources.destroy(&device);
        device.destroy();
    }

    #[test]
    fn test_dangling_child_rejected() {
        let (backend, device) = headless_device(HeadlessConfig::default());
        let mut resources = GpuResourceManager::new(ResourceManagerConfig::default());
        let loader = SceneLoader::new(SceneLoadConfig::default()).unwrap();

        let mut json = triangle_json(0);
        json["nodes"] = json!([{ "mesh": 0, "children": [1] }, { "children": [7] }]);
        let bytes = glb(&json, &triangle_bin());

        let result = loader.load_slice(&device, &mut resources, &bytes, None, 0);
        assert!(matches!(result, Err(SceneError::Malformed(_))));
        assert_eq!(backend.total_buffer_allocations(), 0);
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.live_image_count(), 0);

        resources.destroy(&device);
        device.destroy();
    }

    #[test]
    fn test_tree_with_skipped_mesh() {
        let (backend, device) = headless_device(HeadlessConfig::default());
        let mut resources = GpuResourceManager::new(ResourceManagerConfig::default());
        let loader = SceneLoader::new(SceneLoadConfig::default()).unwrap();

        let mut json = triangle_json(0);
        json["meshes"].as_array_mut().unwrap().push(json!({
            "name": "lines", "primitives": [{ "attributes": { "POSITION": 0 }, "mode": 1 }]
        }));
        // 0 -> [1, 2], 1 (lines) -> [3]
        json["nodes"] = json!([
            { "name": "root", "mesh": 0, "children": [1, 2] },
            { "name": "lines", "mesh": 1, "children": [3], "translation": [0.0, 2.0, 0.0] },
            { "name": "empty" },
            { "name": "leaf", "mesh": 0, "translation": [1.0, 0.0, 0.0] }
        ]);
        let bytes = glb(&json, &triangle_bin());
        let scene = loader.load_slice(&device, &mut resources, &bytes, None, 0).unwrap();

        assert_eq!(scene.nodes().len(), 4 - 1);
        assert_eq!(scene.meshes().len(), 1);
        assert!(scene.warnings().contains(&SceneWarning::SkippedNode { node: 1, mesh: 1 }));
        assert!(scene.warnings().iter().any(|w| matches!(w, SceneWarning::SkippedMesh { mesh: 1, .. })));

        let leaf = scene.nodes().iter().find(|n| n.name.as_deref() == Some("leaf")).unwrap();
        assert_eq!(leaf.parent, Some(0));
        // 被跳过节点的 transform 合并到了 leaf 上
        assert_eq!(leaf.world.transform_point3(Vec3::ZERO), Vec3::new(1.0, 2.0, 0.0));
        for (i, node) in scene.nodes().iter().enumerate() {
            assert!(node.parent.is_none_or(|p| p < i));
        }

        finish(backend, device, resources, scene);
    }

    #[test]
    fn test_device_local_oom_falls_back_to_host_visible() {
        let config = HeadlessConfig {
            device_local_budget: 0,
            ..Default::default()
        };
        let (backend, device) = headless_device(config);
        let mut resources = GpuResourceManager::new(ResourceManagerConfig::default());
        let loader = SceneLoader::new(SceneLoadConfig::default()).unwrap();

        let bytes = glb(&triangle_json(0), &triangle_bin());
        let scene = loader.load_slice(&device, &mut resources, &bytes, None, 0).unwrap();

        let fallbacks = scene.warnings().iter().filter(|w| matches!(w, SceneWarning::HostVisibleFallback { .. })).count();
        assert_eq!(fallbacks, 2);
        let primitive = &scene.meshes()[0].primitives[0];
        let raw = resources.buffer_raw(primitive.vertex_buffer).unwrap();
        assert_eq!(backend.buffer_desc(raw).unwrap().residency, MemoryResidency::HostVisible);
        let data = backend.read_buffer(raw).unwrap();
        assert_eq!(&data[12..24], bytemuck::cast_slice::<f32, u8>(&[0.0, 0.0, 0.0]));
        assert_eq!(&data[32..44], bytemuck::cast_slice::<f32, u8>(&TRIANGLE_POSITIONS[1]));

        finish(backend, device, resources, scene);
    }

    #[test]
    fn test_embedded_texture() {
        let (backend, device) = headless_device(HeadlessConfig::default());
        let mut resources = GpuResourceManager::new(ResourceManagerConfig::default());
        let loader = SceneLoader::new(SceneLoadConfig::default()).unwrap();

        let bytes = textured_triangle(&png_bytes());
        let scene = loader.load_slice(&device, &mut resources, &bytes, None, 0).unwrap();

        assert!(scene.warnings().is_empty(), "{:?}", scene.warnings());
        assert_eq!(scene.images().len(), 1);
        let image = scene.images()[0];
        assert_eq!(scene.materials()[0].base_color_texture, Some(image));
        assert_eq!(resources.image_ref_count(image), Some(1));
        assert_eq!(resources.image_layout(image), Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));
        assert_eq!(resources.image_desc(image).unwrap().format, vk::Format::R8G8B8A8_SRGB);

        finish(backend, device, resources, scene);
    }

    #[test]
    fn test_broken_texture_is_a_warning() {
        let (backend, device) = headless_device(HeadlessConfig::default());
        let mut resources = GpuResourceManager::new(ResourceManagerConfig::default());
        let loader = SceneLoader::new(SceneLoadConfig::default()).unwrap();

        let bytes = textured_triangle(&[0xde, 0xad, 0xbe, 0xef]);
        let scene = loader.load_slice(&device, &mut resources, &bytes, None, 0).unwrap();

        assert!(scene.images().is_empty());
        assert_eq!(scene.materials()[0].base_color_texture, None);
        assert!(scene.warnings().iter().any(|w| matches!(w, SceneWarning::SkippedImage { image: 0, .. })));
        assert!(scene.warnings().contains(&SceneWarning::MissingTexture { material: 0, image: 0 }));

        finish(backend, device, resources, scene);
    }

    #[test]
    fn test_data_uri_image_skipped() {
        let (backend, device) = headless_device(HeadlessConfig::default());
        let mut resources = GpuResourceManager::new(ResourceManagerConfig::default());
        let loader = SceneLoader::new(SceneLoadConfig::default()).unwrap();

        let mut json = triangle_json(0);
        json["images"] = json!([{ "uri": "data:image/png;base64,AAAA" }]);
        json["textures"] = json!([{ "source": 0 }]);
        json["materials"][0]["pbrMetallicRoughness"]["baseColorTexture"] = json!({ "index": 0 });
        // primitive 没有材质时使用默认材质
        json["meshes"][0]["primitives"][0].as_object_mut().unwrap().remove("material");
        let bytes = glb(&json, &triangle_bin());
        let scene = loader.load_slice(&device, &mut resources, &bytes, None, 0).unwrap();

        assert!(scene.warnings().iter().any(|w| matches!(w, SceneWarning::SkippedImage { image: 0, .. })));
        assert_eq!(scene.materials().len(), 2);
        assert!(Rc::ptr_eq(&scene.meshes()[0].primitives[0].material, &scene.materials()[1]));
        assert_eq!(*scene.materials()[1], Material::default());

        finish(backend, device, resources, scene);
    }

    #[test]
    fn test_missing_blob() {
        let (_backend, device) = headless_device(HeadlessConfig::default());
        let mut resources = GpuResourceManager::new(ResourceManagerConfig::default());
        let loader = SceneLoader::new(SceneLoadConfig::default()).unwrap();

        let json = serde_json::to_vec(&triangle_json(0)).unwrap();
        let result = loader.load_slice(&device, &mut resources, &json, None, 0);
        assert!(matches!(result, Err(SceneError::MissingBuffer(_))));

        resources.destroy(&device);
        device.destroy();
    }

    #[test]
    fn test_upload_timeout_is_device_lost() {
        let (backend, device) = headless_device(HeadlessConfig::default());
        let mut resources = GpuResourceManager::new(ResourceManagerConfig::default());
        let loader = SceneLoader::new(SceneLoadConfig {
            decode_threads: 1,
            upload_timeout: Duration::from_millis(10),
        })
        .unwrap();

        backend.set_hang(true);
        let bytes = glb(&triangle_json(0), &triangle_bin());
        let result = loader.load_slice(&device, &mut resources, &bytes, None, 0);
        assert!(matches!(result, Err(SceneError::Gfx(GfxError::DeviceLost))));
        // 失败的加载不持有任何引用
        assert_eq!(resources.stats().pending_buffers, resources.stats().live_buffers);

        resources.destroy(&device);
        device.destroy();
    }
}
