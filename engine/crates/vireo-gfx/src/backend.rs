use std::time::Duration;

use ash::vk;

use crate::adapter::{AdapterInfo, QueueSelection};
use crate::commands::{GfxCommand, SubmitDesc};
use crate::error::GfxResult;
use crate::handles::{RawBuffer, RawCommandBuffer, RawFence, RawImage, RawPipeline, RawSemaphore};
use crate::types::{
    AcquireStatus, BufferDesc, FenceStatus, GraphicsPipelineDesc, ImageDesc, MemoryResidency, MemoryTypeInfo,
    PresentStatus, QueueKind, SwapchainDesc, SwapchainInfo,
};

/// 设备后端的统一接口
///
/// 所有方法都只在 render 线程调用；实现内部使用 `RefCell` 管理对象表。
/// 句柄由后端分配，销毁后的句柄再次使用时会被拒绝。
pub trait GfxBackend {
    // info
    fn adapter(&self) -> &AdapterInfo;
    fn queues(&self) -> &QueueSelection;
    fn memory_types(&self) -> &[MemoryTypeInfo];

    /// 在 `type_bits` 允许的内存类型中，找到满足驻留要求的第一个
    fn find_memory_type(&self, type_bits: u32, residency: MemoryResidency) -> Option<u32> {
        let required = residency.required_flags();
        self.memory_types()
            .iter()
            .enumerate()
            .find(|(index, ty)| (type_bits >> index) & 1 == 1 && ty.property_flags.contains(required))
            .map(|(index, _)| index as u32)
    }

    /// 找到一个可以作为 depth attachment 的格式
    fn find_depth_format(&self) -> Option<vk::Format> {
        Some(vk::Format::D32_SFLOAT)
    }

    // buffer
    fn create_buffer(&self, desc: &BufferDesc, name: &str) -> GfxResult<RawBuffer>;
    fn destroy_buffer(&self, buffer: RawBuffer);
    /// 只能用于 host visible 的 buffer
    fn write_buffer(&self, buffer: RawBuffer, offset: u64, data: &[u8]) -> GfxResult<()>;

    // image
    fn create_image(&self, desc: &ImageDesc, name: &str) -> GfxResult<RawImage>;
    fn destroy_image(&self, image: RawImage);

    // sync
    fn create_fence(&self, signaled: bool, name: &str) -> GfxResult<RawFence>;
    fn destroy_fence(&self, fence: RawFence);
    /// 有限时长的等待；超时不是错误，由调用方决定是否视为设备丢失
    fn wait_fence(&self, fence: RawFence, timeout: Duration) -> GfxResult<FenceStatus>;
    fn fence_signaled(&self, fence: RawFence) -> GfxResult<bool>;
    fn reset_fence(&self, fence: RawFence) -> GfxResult<()>;
    fn create_semaphore(&self, name: &str) -> GfxResult<RawSemaphore>;
    fn destroy_semaphore(&self, semaphore: RawSemaphore);

    // command
    fn create_command_buffer(&self, queue: QueueKind, name: &str) -> GfxResult<RawCommandBuffer>;
    fn destroy_command_buffer(&self, cmd: RawCommandBuffer);
    /// 开始录制，之前录制的内容会被重置
    fn begin_commands(&self, cmd: RawCommandBuffer) -> GfxResult<()>;
    fn record(&self, cmd: RawCommandBuffer, command: GfxCommand);
    fn end_commands(&self, cmd: RawCommandBuffer) -> GfxResult<()>;
    /// 按调用顺序提交到 graphics queue
    fn submit(&self, submit: &SubmitDesc) -> GfxResult<()>;
    fn wait_idle(&self) -> GfxResult<()>;

    // pipeline
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> GfxResult<RawPipeline>;
    fn destroy_pipeline(&self, pipeline: RawPipeline);

    // swapchain
    fn has_surface(&self) -> bool;
    fn create_swapchain(&self, desc: &SwapchainDesc) -> GfxResult<SwapchainInfo>;
    fn destroy_swapchain(&self);
    fn acquire_next_image(&self, signal: RawSemaphore, timeout: Duration) -> GfxResult<AcquireStatus>;
    fn present(&self, image_index: u32, wait: RawSemaphore) -> GfxResult<PresentStatus>;

    /// 释放后端持有的所有对象，之后不能再使用
    fn shutdown(&mut self);
}
