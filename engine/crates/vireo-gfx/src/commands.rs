use ash::vk;

use crate::backend::GfxBackend;
use crate::handles::{RawBuffer, RawCommandBuffer, RawFence, RawImage, RawPipeline, RawSemaphore};
use crate::types::IndexType;

/// 命令中引用的 image：可以是普通的 image，也可以是 swapchain 的某一张 image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRef {
    Image(RawImage),
    Swapchain(u32),
}

/// 录制到 command buffer 中的一条命令
///
/// 后端负责把它翻译成具体的 API 调用。headless 后端会把命令原样保存下来，方便测试检查。
#[derive(Debug, Clone, PartialEq)]
pub enum GfxCommand {
    CopyBuffer {
        src: RawBuffer,
        src_offset: u64,
        dst: RawBuffer,
        dst_offset: u64,
        size: u64,
    },
    CopyBufferToImage {
        src: RawBuffer,
        src_offset: u64,
        dst: RawImage,
        extent: vk::Extent2D,
    },
    ImageBarrier {
        image: ImageRef,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    },
    BeginRendering {
        color: ImageRef,
        /// None 表示 LOAD
        clear_color: Option<[f32; 4]>,
        depth: Option<RawImage>,
        clear_depth: Option<f32>,
        extent: vk::Extent2D,
    },
    EndRendering,
    BindPipeline(RawPipeline),
    BindVertexBuffer {
        buffer: RawBuffer,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: RawBuffer,
        offset: u64,
        index_type: IndexType,
    },
    PushConstants {
        pipeline: RawPipeline,
        offset: u32,
        data: Vec<u8>,
    },
    /// 通过 push descriptor 绑定一张可采样的纹理
    BindTexture {
        pipeline: RawPipeline,
        image: RawImage,
    },
    SetViewport {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    SetScissor(vk::Rect2D),
    DrawIndexed {
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    },
}

impl GfxCommand {
    /// 命令中引用到的 buffer
    pub fn referenced_buffers(&self) -> Vec<RawBuffer> {
        match self {
            GfxCommand::CopyBuffer { src, dst, .. } => vec![*src, *dst],
            GfxCommand::CopyBufferToImage { src, .. } => vec![*src],
            GfxCommand::BindVertexBuffer { buffer, .. } | GfxCommand::BindIndexBuffer { buffer, .. } => vec![*buffer],
            _ => vec![],
        }
    }

    /// 命令中引用到的普通 image（不包括 swapchain image）
    pub fn referenced_images(&self) -> Vec<RawImage> {
        match self {
            GfxCommand::CopyBufferToImage { dst, .. } => vec![*dst],
            GfxCommand::ImageBarrier {
                image: ImageRef::Image(image),
                ..
            } => vec![*image],
            GfxCommand::BeginRendering { color, depth, .. } => {
                let mut images = vec![];
                if let ImageRef::Image(image) = color {
                    images.push(*image);
                }
                images.extend(depth.iter().copied());
                images
            }
            GfxCommand::BindTexture { image, .. } => vec![*image],
            _ => vec![],
        }
    }
}

/// 对 submit 的描述，builder 风格
#[derive(Debug, Clone, Default)]
pub struct SubmitDesc {
    pub command_buffers: Vec<RawCommandBuffer>,
    pub waits: Vec<(RawSemaphore, vk::PipelineStageFlags2)>,
    pub signals: Vec<RawSemaphore>,
    pub fence: Option<RawFence>,
}

impl SubmitDesc {
    pub fn new(commands: &[RawCommandBuffer]) -> Self {
        Self {
            command_buffers: commands.to_vec(),
            ..Default::default()
        }
    }

    #[inline]
    pub fn wait(mut self, semaphore: RawSemaphore, stage: vk::PipelineStageFlags2) -> Self {
        self.waits.push((semaphore, stage));
        self
    }

    #[inline]
    pub fn signal(mut self, semaphore: RawSemaphore) -> Self {
        self.signals.push(semaphore);
        self
    }

    #[inline]
    pub fn fence(mut self, fence: RawFence) -> Self {
        self.fence = Some(fence);
        self
    }
}

/// 对某个 command buffer 录制命令的辅助类型
pub struct CommandEncoder<'a> {
    backend: &'a dyn GfxBackend,
    cmd: RawCommandBuffer,
}

impl<'a> CommandEncoder<'a> {
    pub fn new(backend: &'a dyn GfxBackend, cmd: RawCommandBuffer) -> Self {
        Self { backend, cmd }
    }

    #[inline]
    pub fn command_buffer(&self) -> RawCommandBuffer {
        self.cmd
    }

    #[inline]
    pub fn push(&self, command: GfxCommand) {
        self.backend.record(self.cmd, command);
    }

    pub fn copy_buffer(&self, src: RawBuffer, src_offset: u64, dst: RawBuffer, dst_offset: u64, size: u64) {
        self.push(GfxCommand::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    pub fn image_barrier(&self, image: ImageRef, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) {
        if old_layout == new_layout {
            return;
        }
        self.push(GfxCommand::ImageBarrier {
            image,
            old_layout,
            new_layout,
        });
    }

    pub fn set_viewport_and_scissor(&self, extent: vk::Extent2D) {
        self.push(GfxCommand::SetViewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
        });
        self.push(GfxCommand::SetScissor(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        }));
    }

    pub fn push_constants<T: bytemuck::Pod>(&self, pipeline: RawPipeline, value: &T) {
        self.push(GfxCommand::PushConstants {
            pipeline,
            offset: 0,
            data: bytemuck::bytes_of(value).to_vec(),
        });
    }

    pub fn draw_indexed(&self, index_count: u32, first_index: u32, vertex_offset: i32) {
        self.push(GfxCommand::DrawIndexed {
            index_count,
            first_index,
            vertex_offset,
        });
    }
}
