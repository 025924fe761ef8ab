use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use vireo_gfx::commands::GfxCommand;
use vireo_gfx::device_context::DeviceContext;
use vireo_gfx::error::{GfxError, GfxResult};
use vireo_gfx::handles::RawPipeline;
use vireo_gfx::shader::ShaderPair;
use vireo_gfx::types::{GraphicsPipelineDesc, IndexType, VertexLayout};
use vireo_render_interface::frame_info::FrameInfo;
use vireo_render_interface::gpu_resource_manager::GpuResourceManager;
use vireo_scene::scene::Scene;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ScenePushConstants {
    pub mvp: [[f32; 4]; 4],
    pub base_color: [f32; 4],
}

/// 使用 base color 绘制所有 mesh，只有一个固定方向的漫反射
pub struct ScenePass {
    pipeline: RawPipeline,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

// new & init
impl ScenePass {
    pub fn new(
        device: &DeviceContext,
        shaders: &ShaderPair,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> GfxResult<Self> {
        let pipeline = device.create_graphics_pipeline(&GraphicsPipelineDesc {
            name: "scene-flat",
            vertex_spirv: &shaders.vertex,
            fragment_spirv: &shaders.fragment,
            vertex_layout: VertexLayout::Scene,
            push_constant_size: size_of::<ScenePushConstants>() as u32,
            textured: false,
            color_format,
            depth_format: Some(depth_format),
            alpha_blend: false,
            cull_back_faces: true,
        })?;

        Ok(Self {
            pipeline,

            #[cfg(debug_assertions)]
            destroyed: false,
        })
    }
}
// draw
impl ScenePass {
    /// 录制场景的绘制命令，返回 draw call 的数量
    ///
    /// 调用方需要已经开始 rendering；用到的 buffer 会被标记为在本帧使用。
    pub fn record(
        &self,
        device: &DeviceContext,
        resources: &mut GpuResourceManager,
        frame: &FrameInfo,
        scene: &Scene,
        view_proj: Mat4,
        extent: vk::Extent2D,
    ) -> GfxResult<usize> {
        let encoder = device.encoder(frame.cmd);
        encoder.push(GfxCommand::BindPipeline(self.pipeline));
        encoder.set_viewport_and_scissor(extent);

        let mut draw_calls = 0;
        for (world, mesh) in scene.draw_items() {
            let mvp = (view_proj * world).to_cols_array_2d();
            for primitive in &mesh.primitives {
                let vertex_buffer =
                    resources.buffer_raw(primitive.vertex_buffer).ok_or(GfxError::InvalidHandle("vertex buffer"))?;
                let index_buffer =
                    resources.buffer_raw(primitive.index_buffer).ok_or(GfxError::InvalidHandle("index buffer"))?;
                resources.mark_buffer_used(primitive.vertex_buffer, frame.frame_id);
                resources.mark_buffer_used(primitive.index_buffer, frame.frame_id);

                encoder.push_constants(
                    self.pipeline,
                    &ScenePushConstants {
                        mvp,
                        base_color: primitive.material.base_color_factor,
                    },
                );
                encoder.push(GfxCommand::BindVertexBuffer {
                    buffer: vertex_buffer,
                    offset: 0,
                });
                encoder.push(GfxCommand::BindIndexBuffer {
                    buffer: index_buffer,
                    offset: 0,
                    index_type: IndexType::U32,
                });
                encoder.draw_indexed(primitive.index_count, 0, 0);
                draw_calls += 1;
            }
        }
        Ok(draw_calls)
    }
}
// destroy
impl ScenePass {
    pub fn destroy(mut self, device: &DeviceContext) {
        device.destroy_pipeline(self.pipeline);

        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}
impl Drop for ScenePass {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            assert!(self.destroyed || std::thread::panicking(), "ScenePass dropped without destroy()");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;
    use vireo_gfx::headless::HeadlessBackend;
    use vireo_render_interface::gpu_resource_manager::ResourceManagerConfig;
    use vireo_scene::gltf_loader::{SceneLoadConfig, SceneLoader};

    use crate::frame_scheduler::FrameScheduler;

    /// 一个红色三角形，buffer 以 data uri 内嵌，两个节点引用同一个 mesh
    pub(crate) const TRIANGLE_GLTF: &str = r#"{
        "asset": { "version": "2.0" },
        "buffers": [{
            "byteLength": 44,
            "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAgD8AAAAAAAABAAIAAAA="
        }],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 6 }
        ],
        "accessors": [
            { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
              "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] },
            { "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }
        ],
        "materials": [{ "pbrMetallicRoughness": { "baseColorFactor": [1.0, 0.0, 0.0, 1.0] } }],
        "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 }, "indices": 1, "material": 0 }] }],
        "nodes": [
            { "name": "left", "mesh": 0, "translation": [-1.0, 0.0, 0.0] },
            { "name": "right", "mesh": 0, "translation": [1.0, 0.0, 0.0] }
        ],
        "scenes": [{ "nodes": [0, 1] }]
    }"#;

    #[test]
    fn test_record_draws_every_primitive() {
        let backend = HeadlessBackend::with_defaults().unwrap();
        let device = DeviceContext::from_backend(Box::new(backend.clone()));
        let mut resources = GpuResourceManager::new(ResourceManagerConfig::default());
        let mut scheduler = FrameScheduler::new(&device, 2, Duration::from_millis(50)).unwrap();

        let loader = SceneLoader::new(SceneLoadConfig::default()).unwrap();
        let scene = loader
            .load_slice(&device, &mut resources, TRIANGLE_GLTF.as_bytes(), None, scheduler.frame_id())
            .unwrap();
        assert_eq!(scene.nodes().len(), 2);
        assert_eq!(scene.meshes().len(), 1);
        // 两个节点共享同一个 mesh
        assert_eq!(std::rc::Rc::strong_count(&scene.meshes()[0]), 3);

        let pass = ScenePass::new(&device, &ShaderPair::default(), vk::Format::B8G8R8A8_SRGB, vk::Format::D32_SFLOAT)
            .unwrap();
        let frame = scheduler.begin_frame(&device, &mut resources).unwrap();
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let draws = pass.record(&device, &mut resources, &frame, &scene, Mat4::IDENTITY, extent).unwrap();
        assert_eq!(draws, 2);

        let recorded = backend.recorded_commands(frame.cmd);
        let push_constants = recorded
            .iter()
            .filter_map(|command| match command {
                GfxCommand::PushConstants { data, .. } => Some(bytemuck::pod_read_unaligned::<ScenePushConstants>(data)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(push_constants.len(), 2);
        assert_eq!(push_constants[0].base_color, [1.0, 0.0, 0.0, 1.0]);
        // 第四列是 translation
        assert_eq!(push_constants[0].mvp[3][0], -1.0);
        assert_eq!(push_constants[1].mvp[3][0], 1.0);
        assert!(recorded.contains(&GfxCommand::DrawIndexed {
            index_count: 3,
            first_index: 0,
            vertex_offset: 0,
        }));
        scheduler.end_frame(&device, false).unwrap();

        scheduler.drain(&device, &mut resources).unwrap();
        scene.release(&mut resources).unwrap();
        pass.destroy(&device);
        scheduler.destroy(&device);
        resources.destroy(&device);
        device.destroy();
        assert_eq!(backend.live_buffer_count(), 0);
        assert!(backend.violations().is_empty(), "{:?}", backend.violations());
    }
}
