use std::collections::HashMap;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Vec2;
use vireo_gfx::commands::{CommandEncoder, GfxCommand};
use vireo_gfx::device_context::DeviceContext;
use vireo_gfx::error::{GfxError, GfxResult};
use vireo_gfx::handles::RawPipeline;
use vireo_gfx::shader::ShaderPair;
use vireo_gfx::types::{GraphicsPipelineDesc, ImageDesc, IndexType, VertexLayout};
use vireo_render_interface::frame_info::FrameInfo;
use vireo_render_interface::gpu_resource_manager::GpuResourceManager;
use vireo_render_interface::handles::GpuImageHandle;

use crate::draw_snapshot::UiDrawSnapshot;

/// font atlas 在 imgui 中使用的 texture id
pub const FONT_TEXTURE_ID: usize = 0;

/// 把 imgui 的逻辑坐标变换到 NDC：ndc = pos * scale + translate
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct UiPushConstants {
    pub scale: [f32; 2],
    pub translate: [f32; 2],
}

impl UiPushConstants {
    pub fn new(display_pos: [f32; 2], display_size: [f32; 2]) -> Self {
        let scale = Vec2::new(2.0 / display_size[0], 2.0 / display_size[1]);
        let translate = Vec2::splat(-1.0) - Vec2::from(display_pos) * scale;
        Self {
            scale: scale.to_array(),
            translate: translate.to_array(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UiDrawStats {
    pub draw_calls: usize,
    /// clip rect 为空而被跳过的命令
    pub skipped: usize,
}

/// 把 clip rect 投影到 framebuffer 空间，并限制在 framebuffer 之内
///
/// 投影之后面积为 0 时返回 None
pub fn project_clip_rect(
    clip_rect: [f32; 4],
    display_pos: [f32; 2],
    framebuffer_scale: [f32; 2],
    framebuffer_extent: vk::Extent2D,
) -> Option<vk::Rect2D> {
    let fb_w = framebuffer_extent.width as f32;
    let fb_h = framebuffer_extent.height as f32;

    let x1 = ((clip_rect[0] - display_pos[0]) * framebuffer_scale[0]).clamp(0.0, fb_w);
    let y1 = ((clip_rect[1] - display_pos[1]) * framebuffer_scale[1]).clamp(0.0, fb_h);
    let x2 = ((clip_rect[2] - display_pos[0]) * framebuffer_scale[0]).clamp(0.0, fb_w);
    let y2 = ((clip_rect[3] - display_pos[1]) * framebuffer_scale[1]).clamp(0.0, fb_h);

    let width = (x2 - x1).floor() as i64;
    let height = (y2 - y1).floor() as i64;
    if width <= 0 || height <= 0 {
        return None;
    }

    Some(vk::Rect2D {
        offset: vk::Offset2D {
            x: x1 as i32,
            y: y1 as i32,
        },
        extent: vk::Extent2D {
            width: width as u32,
            height: height as u32,
        },
    })
}

/// 每帧把 UI 的 draw data 追加到当前帧的 command buffer 中
///
/// 几何数据只写入 per-frame 的 scratch buffer，跨帧的 GPU 状态只有 pipeline 和纹理。
pub struct UiOverlayBridge {
    pipeline: RawPipeline,
    font_atlas: Option<GpuImageHandle>,
    /// imgui texture id -> image
    textures: HashMap<usize, GpuImageHandle>,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

// new & init
impl UiOverlayBridge {
    pub fn new(device: &DeviceContext, shaders: &ShaderPair, color_format: vk::Format) -> GfxResult<Self> {
        let pipeline = device.create_graphics_pipeline(&GraphicsPipelineDesc {
            name: "ui-overlay",
            vertex_spirv: &shaders.vertex,
            fragment_spirv: &shaders.fragment,
            vertex_layout: VertexLayout::Ui,
            push_constant_size: size_of::<UiPushConstants>() as u32,
            textured: true,
            color_format,
            depth_format: None,
            alpha_blend: true,
            cull_back_faces: false,
        })?;

        Ok(Self {
            pipeline,
            font_atlas: None,
            textures: HashMap::new(),

            #[cfg(debug_assertions)]
            destroyed: false,
        })
    }

    /// 上传 imgui 的 font atlas（RGBA32），返回 imgui 中应当使用的 texture id
    ///
    /// 重复调用时旧的 atlas 通过 resource manager 延迟释放
    #[allow(clippy::too_many_arguments)]
    pub fn register_font_atlas(
        &mut self,
        device: &DeviceContext,
        resources: &mut GpuResourceManager,
        encoder: &CommandEncoder,
        frame_id: u64,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> GfxResult<usize> {
        let desc = ImageDesc::texture_2d(width, height, vk::Format::R8G8B8A8_UNORM);
        let image = resources.allocate_image(device, &desc, "imgui-fonts")?;
        if let Err(e) = resources.upload_image(device, encoder, frame_id, image, rgba) {
            resources.release_image(image)?;
            return Err(e);
        }

        if let Some(old) = self.font_atlas.replace(image) {
            resources.release_image(old)?;
        }
        log::info!("imgui font atlas registered: {}x{}", width, height);
        Ok(FONT_TEXTURE_ID)
    }

    /// 让 imgui 可以通过 `texture_id` 显示一张 image，bridge 持有一个引用
    pub fn register_texture(
        &mut self,
        resources: &mut GpuResourceManager,
        texture_id: usize,
        image: GpuImageHandle,
    ) -> GfxResult<()> {
        if texture_id == FONT_TEXTURE_ID {
            return Err(GfxError::InvalidState(format!("texture id {} is reserved for fonts", FONT_TEXTURE_ID)));
        }
        resources.retain_image(image)?;
        if let Some(old) = self.textures.insert(texture_id, image) {
            resources.release_image(old)?;
        }
        Ok(())
    }

    pub fn unregister_texture(&mut self, resources: &mut GpuResourceManager, texture_id: usize) -> GfxResult<()> {
        match self.textures.remove(&texture_id) {
            Some(image) => resources.release_image(image),
            None => Ok(()),
        }
    }
}
// getters
impl UiOverlayBridge {
    /// 不认识的 id 退回到 font atlas
    pub fn texture_for(&self, texture_id: usize) -> Option<GpuImageHandle> {
        self.textures.get(&texture_id).copied().or(self.font_atlas)
    }

    #[inline]
    pub fn font_atlas(&self) -> Option<GpuImageHandle> {
        self.font_atlas
    }
}
// draw
impl UiOverlayBridge {
    /// 录制 UI 的绘制命令
    ///
    /// 调用方需要已经开始 rendering（color attachment 使用 LOAD，保留 scene pass 的内容）。
    pub fn record(
        &self,
        device: &DeviceContext,
        resources: &mut GpuResourceManager,
        frame: &FrameInfo,
        snapshot: &UiDrawSnapshot,
        framebuffer_extent: vk::Extent2D,
    ) -> GfxResult<UiDrawStats> {
        let mut stats = UiDrawStats::default();
        if snapshot.is_empty() || snapshot.display_size[0] <= 0.0 || snapshot.display_size[1] <= 0.0 {
            return Ok(stats);
        }

        // 所有 draw list 的几何数据连续写入 scratch buffer
        let vertices = snapshot.lists.iter().flat_map(|list| list.vertices.iter().copied()).collect::<Vec<_>>();
        let indices = snapshot.lists.iter().flat_map(|list| list.indices.iter().copied()).collect::<Vec<u16>>();
        let vertex_alloc =
            resources.scratch_upload(device, frame.slot, frame.frame_id, bytemuck::cast_slice(&vertices), 16)?;
        let index_alloc =
            resources.scratch_upload(device, frame.slot, frame.frame_id, bytemuck::cast_slice(&indices), 4)?;

        let encoder = device.encoder(frame.cmd);
        encoder.push(GfxCommand::BindPipeline(self.pipeline));
        encoder.set_viewport_and_scissor(framebuffer_extent);
        encoder.push_constants(self.pipeline, &UiPushConstants::new(snapshot.display_pos, snapshot.display_size));
        encoder.push(GfxCommand::BindVertexBuffer {
            buffer: vertex_alloc.raw,
            offset: vertex_alloc.offset,
        });
        encoder.push(GfxCommand::BindIndexBuffer {
            buffer: index_alloc.raw,
            offset: index_alloc.offset,
            index_type: IndexType::U16,
        });

        let mut index_offset = 0;
        let mut vertex_offset = 0;
        // 缓存之前已经绑定过的 texture
        let mut last_texture: Option<GpuImageHandle> = None;

        // 简而言之：对于每个 command，设置正确的 vertex, index, texture, scissor 即可
        for list in &snapshot.lists {
            for command in &list.commands {
                let Some(scissor) = project_clip_rect(
                    command.clip_rect,
                    snapshot.display_pos,
                    snapshot.framebuffer_scale,
                    framebuffer_extent,
                ) else {
                    stats.skipped += 1;
                    continue;
                };

                let Some(texture) = self.texture_for(command.texture_id) else {
                    log::warn!("imgui texture {} is not registered and there is no font atlas", command.texture_id);
                    stats.skipped += 1;
                    continue;
                };
                if last_texture != Some(texture) {
                    let image = resources.image_raw(texture).ok_or(GfxError::InvalidHandle("ui texture"))?;
                    encoder.push(GfxCommand::BindTexture {
                        pipeline: self.pipeline,
                        image,
                    });
                    resources.mark_image_used(texture, frame.frame_id);
                    last_texture = Some(texture);
                }

                encoder.push(GfxCommand::SetScissor(scissor));
                encoder.draw_indexed(
                    command.count as u32,
                    index_offset + command.idx_offset as u32,
                    vertex_offset + command.vtx_offset as i32,
                );
                stats.draw_calls += 1;
            }

            index_offset += list.indices.len() as u32;
            vertex_offset += list.vertices.len() as i32;
        }

        Ok(stats)
    }
}
// destroy
impl UiOverlayBridge {
    pub fn destroy(mut self, device: &DeviceContext, resources: &mut GpuResourceManager) -> GfxResult<()> {
        if let Some(font_atlas) = self.font_atlas.take() {
            resources.release_image(font_atlas)?;
        }
        for (_, image) in self.textures.drain() {
            resources.release_image(image)?;
        }
        device.destroy_pipeline(self.pipeline);

        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
        Ok(())
    }
}
impl Drop for UiOverlayBridge {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            assert!(self.destroyed || std::thread::panicking(), "UiOverlayBridge dropped without destroy()");
        }
    }
}
