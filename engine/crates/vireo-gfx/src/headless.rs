//! 软件模拟的设备后端
//!
//! 不依赖 GPU，行为上模拟一个按提交顺序执行的 graphics queue：
//! - submit 只是把命令放进 pending 队列，等待 fence 时才按顺序「执行」（copy 会真的拷贝数据）
//! - `set_hang(true)` 之后 fence 永远不会 signal，用于模拟设备卡死
//! - swapchain 根据 surface 尺寸模拟 out-of-date
//! - 销毁仍被 pending 提交引用的对象、等待未 signal 的 semaphore 等错误会被记录为 violation

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use ash::vk;
use itertools::Itertools;
use slotmap::SlotMap;

use crate::adapter::{
    AdapterInfo, AdapterType, DevicePreferences, QueueCaps, QueueFamilyInfo, QueueSelection, select_adapter,
};
use crate::backend::GfxBackend;
use crate::commands::{GfxCommand, SubmitDesc};
use crate::error::{GfxError, GfxResult};
use crate::handles::{RawBuffer, RawCommandBuffer, RawFence, RawImage, RawPipeline, RawSemaphore};
use crate::types::{
    AcquireStatus, BufferDesc, FenceStatus, GraphicsPipelineDesc, ImageDesc, MemoryResidency, MemoryTypeInfo,
    PresentStatus, QueueKind, SwapchainDesc, SwapchainInfo,
};

#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// 候选设备，会经过和 Vulkan 后端相同的打分
    pub adapters: Vec<AdapterInfo>,
    pub device_local_budget: u64,
    pub host_visible_budget: u64,
    /// None 表示没有 surface，无法创建 swapchain
    pub surface_extent: Option<vk::Extent2D>,
    pub swapchain_image_count: u32,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            adapters: vec![HeadlessConfig::default_adapter()],
            device_local_budget: 256 * 1024 * 1024,
            host_visible_budget: 256 * 1024 * 1024,
            surface_extent: Some(vk::Extent2D {
                width: 1280,
                height: 720,
            }),
            swapchain_image_count: 3,
        }
    }
}

impl HeadlessConfig {
    pub fn default_adapter() -> AdapterInfo {
        AdapterInfo {
            name: "Vireo Headless Device".to_string(),
            vendor_id: 0,
            adapter_type: AdapterType::Discrete,
            device_local_bytes: 256 * 1024 * 1024,
            queue_families: vec![QueueFamilyInfo {
                caps: QueueCaps::all(),
                queue_count: 1,
                supports_present: true,
            }],
            supports_required_features: true,
        }
    }
}

struct BufferObj {
    desc: BufferDesc,
    data: Vec<u8>,
}

struct ImageObj {
    desc: ImageDesc,
}

struct CommandBufferObj {
    recording: bool,
    commands: Vec<GfxCommand>,
}

struct PendingSubmit {
    fence: Option<RawFence>,
    commands: Vec<GfxCommand>,
}

struct HeadlessSwapchain {
    info: SwapchainInfo,
    acquired: Vec<bool>,
    next_image: u32,
}

struct HeadlessState {
    buffers: SlotMap<RawBuffer, BufferObj>,
    images: SlotMap<RawImage, ImageObj>,
    fences: SlotMap<RawFence, bool>,
    semaphores: SlotMap<RawSemaphore, bool>,
    command_buffers: SlotMap<RawCommandBuffer, CommandBufferObj>,
    pipelines: SlotMap<RawPipeline, String>,

    pending: VecDeque<PendingSubmit>,

    device_local_budget: u64,
    host_visible_budget: u64,
    device_local_used: u64,
    host_visible_used: u64,

    surface_extent: Option<vk::Extent2D>,
    swapchain_image_count: u32,
    swapchain: Option<HeadlessSwapchain>,
    suboptimal_next_acquire: bool,
    presented: Vec<u32>,

    hang: bool,
    violations: Vec<String>,

    total_buffer_allocations: u64,
    total_image_allocations: u64,
    submit_count: u64,
}

/// 可以 clone，clone 之后共享同一个设备状态，测试中用于在 DeviceContext 之外检查状态
#[derive(Clone)]
pub struct HeadlessBackend {
    adapter: AdapterInfo,
    queues: QueueSelection,
    memory_types: Vec<MemoryTypeInfo>,
    state: Rc<RefCell<HeadlessState>>,
}

// new & init
impl HeadlessBackend {
    pub fn new(config: HeadlessConfig, prefs: &DevicePreferences) -> GfxResult<Self> {
        let require_present = config.surface_extent.is_some();
        let selection = select_adapter(&config.adapters, prefs, require_present)?;
        let adapter = config.adapters[selection.index].clone();
        log::info!("headless device: {}", adapter.name);

        let memory_types = vec![
            MemoryTypeInfo {
                property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                heap_index: 0,
                heap_size: config.device_local_budget,
            },
            MemoryTypeInfo {
                property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                heap_index: 1,
                heap_size: config.host_visible_budget,
            },
        ];

        let state = HeadlessState {
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            fences: SlotMap::with_key(),
            semaphores: SlotMap::with_key(),
            command_buffers: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            pending: VecDeque::new(),
            device_local_budget: config.device_local_budget,
            host_visible_budget: config.host_visible_budget,
            device_local_used: 0,
            host_visible_used: 0,
            surface_extent: config.surface_extent,
            swapchain_image_count: config.swapchain_image_count.max(2),
            swapchain: None,
            suboptimal_next_acquire: false,
            presented: vec![],
            hang: false,
            violations: vec![],
            total_buffer_allocations: 0,
            total_image_allocations: 0,
            submit_count: 0,
        };

        Ok(Self {
            adapter,
            queues: selection.queues,
            memory_types,
            state: Rc::new(RefCell::new(state)),
        })
    }

    /// 默认配置的 headless 设备，测试中最常用
    pub fn with_defaults() -> GfxResult<Self> {
        Self::new(HeadlessConfig::default(), &DevicePreferences::default())
    }
}
// 测试用的控制与检查接口
impl HeadlessBackend {
    /// 模拟窗口尺寸变化，None 表示 surface 丢失
    pub fn set_surface_extent(&self, extent: Option<vk::Extent2D>) {
        self.state.borrow_mut().surface_extent = extent;
    }

    /// 设备卡死：之后的 fence 都不会 signal
    pub fn set_hang(&self, hang: bool) {
        self.state.borrow_mut().hang = hang;
    }

    pub fn mark_next_acquire_suboptimal(&self) {
        self.state.borrow_mut().suboptimal_next_acquire = true;
    }

    /// 执行所有 pending 的提交
    pub fn complete_all(&self) {
        let mut state = self.state.borrow_mut();
        let count = state.pending.len();
        state.complete_front(count);
    }

    pub fn pending_submissions(&self) -> usize {
        self.state.borrow().pending.len()
    }

    pub fn submit_count(&self) -> u64 {
        self.state.borrow().submit_count
    }

    pub fn live_buffer_count(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    pub fn live_image_count(&self) -> usize {
        self.state.borrow().images.len()
    }

    pub fn total_buffer_allocations(&self) -> u64 {
        self.state.borrow().total_buffer_allocations
    }

    pub fn total_image_allocations(&self) -> u64 {
        self.state.borrow().total_image_allocations
    }

    pub fn memory_used(&self, residency: MemoryResidency) -> u64 {
        let state = self.state.borrow();
        match residency {
            MemoryResidency::DeviceLocal => state.device_local_used,
            MemoryResidency::HostVisible => state.host_visible_used,
        }
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    pub fn read_buffer(&self, buffer: RawBuffer) -> Option<Vec<u8>> {
        self.state.borrow().buffers.get(buffer).map(|b| b.data.clone())
    }

    pub fn buffer_desc(&self, buffer: RawBuffer) -> Option<BufferDesc> {
        self.state.borrow().buffers.get(buffer).map(|b| b.desc)
    }

    pub fn image_desc(&self, image: RawImage) -> Option<ImageDesc> {
        self.state.borrow().images.get(image).map(|i| i.desc)
    }

    /// command buffer 中当前录制的命令
    pub fn recorded_commands(&self, cmd: RawCommandBuffer) -> Vec<GfxCommand> {
        self.state.borrow().command_buffers.get(cmd).map(|c| c.commands.clone()).unwrap_or_default()
    }

    pub fn presented_images(&self) -> Vec<u32> {
        self.state.borrow().presented.clone()
    }

    /// 已经 acquire 但是还没有 present 的 swapchain image 数量
    pub fn acquired_image_count(&self) -> usize {
        self.state
            .borrow()
            .swapchain
            .as_ref()
            .map_or(0, |swapchain| swapchain.acquired.iter().filter(|acquired| **acquired).count())
    }
}

impl HeadlessState {
    fn violation(&mut self, msg: String) {
        log::error!("headless violation: {}", msg);
        self.violations.push(msg);
    }

    /// 按顺序执行前 count 个提交
    fn complete_front(&mut self, count: usize) {
        for _ in 0..count {
            let Some(submit) = self.pending.pop_front() else {
                break;
            };
            for command in &submit.commands {
                if let GfxCommand::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } = command
                {
                    self.execute_copy(*src, *src_offset, *dst, *dst_offset, *size);
                }
            }
            if let Some(fence) = submit.fence
                && let Some(signaled) = self.fences.get_mut(fence)
            {
                *signaled = true;
            }
        }
    }

    fn execute_copy(&mut self, src: RawBuffer, src_offset: u64, dst: RawBuffer, dst_offset: u64, size: u64) {
        let Some(src_data) = self
            .buffers
            .get(src)
            .and_then(|b| b.data.get(src_offset as usize..(src_offset + size) as usize))
            .map(<[u8]>::to_vec)
        else {
            self.violation(format!("copy reads out of range or from a destroyed buffer {:?}", src));
            return;
        };
        match self.buffers.get_mut(dst).and_then(|b| b.data.get_mut(dst_offset as usize..(dst_offset + size) as usize))
        {
            Some(dst_data) => dst_data.copy_from_slice(&src_data),
            None => self.violation(format!("copy writes out of range or into a destroyed buffer {:?}", dst)),
        }
    }

    /// wait 操作：semaphore 必须已经 signal，wait 之后回到 unsignaled
    fn consume_semaphore(&mut self, semaphore: RawSemaphore, what: &str) -> GfxResult<()> {
        let signaled = *self.semaphores.get(semaphore).ok_or(GfxError::InvalidHandle("semaphore"))?;
        if !signaled {
            self.violation(format!("{} waits on unsignaled semaphore {:?}", what, semaphore));
        }
        self.semaphores[semaphore] = false;
        Ok(())
    }

    /// binary semaphore 不能重复 signal
    fn signal_semaphore(&mut self, semaphore: RawSemaphore, what: &str) -> GfxResult<()> {
        let signaled = *self.semaphores.get(semaphore).ok_or(GfxError::InvalidHandle("semaphore"))?;
        if signaled {
            self.violation(format!("{} signals semaphore {:?} which is already signaled", what, semaphore));
        }
        self.semaphores[semaphore] = true;
        Ok(())
    }

    fn pending_references_buffer(&self, buffer: RawBuffer) -> bool {
        self.pending.iter().flat_map(|s| s.commands.iter()).any(|c| c.referenced_buffers().contains(&buffer))
    }

    fn pending_references_image(&self, image: RawImage) -> bool {
        self.pending.iter().flat_map(|s| s.commands.iter()).any(|c| c.referenced_images().contains(&image))
    }

    fn budget_mut(&mut self, residency: MemoryResidency) -> (&mut u64, u64) {
        match residency {
            MemoryResidency::DeviceLocal => (&mut self.device_local_used, self.device_local_budget),
            MemoryResidency::HostVisible => (&mut self.host_visible_used, self.host_visible_budget),
        }
    }
}

impl GfxBackend for HeadlessBackend {
    fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn queues(&self) -> &QueueSelection {
        &self.queues
    }

    fn memory_types(&self) -> &[MemoryTypeInfo] {
        &self.memory_types
    }

    fn create_buffer(&self, desc: &BufferDesc, name: &str) -> GfxResult<RawBuffer> {
        let mut state = self.state.borrow_mut();
        let (used, budget) = state.budget_mut(desc.residency);
        if *used + desc.size > budget {
            log::warn!("headless: buffer {} ({} bytes) exceeds {:?} budget", name, desc.size, desc.residency);
            return Err(GfxError::OutOfDeviceMemory {
                requested: desc.size,
                residency: desc.residency,
            });
        }
        *used += desc.size;
        state.total_buffer_allocations += 1;
        Ok(state.buffers.insert(BufferObj {
            desc: *desc,
            data: vec![0; desc.size as usize],
        }))
    }

    fn destroy_buffer(&self, buffer: RawBuffer) {
        let mut state = self.state.borrow_mut();
        if state.pending_references_buffer(buffer) {
            state.violation(format!("buffer {:?} destroyed while referenced by a pending submission", buffer));
        }
        match state.buffers.remove(buffer) {
            Some(obj) => {
                let (used, _) = state.budget_mut(obj.desc.residency);
                *used -= obj.desc.size;
            }
            None => state.violation(format!("double destroy of buffer {:?}", buffer)),
        }
    }

    fn write_buffer(&self, buffer: RawBuffer, offset: u64, data: &[u8]) -> GfxResult<()> {
        let mut state = self.state.borrow_mut();
        let obj = state.buffers.get_mut(buffer).ok_or(GfxError::InvalidHandle("buffer"))?;
        if obj.desc.residency != MemoryResidency::HostVisible {
            return Err(GfxError::InvalidState("write_buffer on a device local buffer".to_string()));
        }
        let range = offset as usize..offset as usize + data.len();
        let dst = obj
            .data
            .get_mut(range)
            .ok_or_else(|| GfxError::InvalidState(format!("write of {} bytes at {} out of range", data.len(), offset)))?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn create_image(&self, desc: &ImageDesc, name: &str) -> GfxResult<RawImage> {
        let mut state = self.state.borrow_mut();
        let size = desc.byte_size();
        let (used, budget) = state.budget_mut(MemoryResidency::DeviceLocal);
        if *used + size > budget {
            log::warn!("headless: image {} ({} bytes) exceeds device local budget", name, size);
            return Err(GfxError::OutOfDeviceMemory {
                requested: size,
                residency: MemoryResidency::DeviceLocal,
            });
        }
        *used += size;
        state.total_image_allocations += 1;
        Ok(state.images.insert(ImageObj { desc: *desc }))
    }

    fn destroy_image(&self, image: RawImage) {
        let mut state = self.state.borrow_mut();
        if state.pending_references_image(image) {
            state.violation(format!("image {:?} destroyed while referenced by a pending submission", image));
        }
        match state.images.remove(image) {
            Some(obj) => state.device_local_used -= obj.desc.byte_size(),
            None => state.violation(format!("double destroy of image {:?}", image)),
        }
    }

    fn create_fence(&self, signaled: bool, _name: &str) -> GfxResult<RawFence> {
        Ok(self.state.borrow_mut().fences.insert(signaled))
    }

    fn destroy_fence(&self, fence: RawFence) {
        let mut state = self.state.borrow_mut();
        if state.pending.iter().any(|s| s.fence == Some(fence)) {
            state.violation(format!("fence {:?} destroyed while in use", fence));
        }
        state.fences.remove(fence);
    }

    fn wait_fence(&self, fence: RawFence, _timeout: Duration) -> GfxResult<FenceStatus> {
        let mut state = self.state.borrow_mut();
        let signaled = *state.fences.get(fence).ok_or(GfxError::InvalidHandle("fence"))?;
        if signaled {
            return Ok(FenceStatus::Signaled);
        }
        if state.hang {
            return Ok(FenceStatus::TimedOut);
        }
        match state.pending.iter().position(|s| s.fence == Some(fence)) {
            Some(index) => {
                state.complete_front(index + 1);
                Ok(FenceStatus::Signaled)
            }
            // 从未提交过的 fence 会一直等到超时
            None => Ok(FenceStatus::TimedOut),
        }
    }

    fn fence_signaled(&self, fence: RawFence) -> GfxResult<bool> {
        self.state.borrow().fences.get(fence).copied().ok_or(GfxError::InvalidHandle("fence"))
    }

    fn reset_fence(&self, fence: RawFence) -> GfxResult<()> {
        let mut state = self.state.borrow_mut();
        if state.pending.iter().any(|s| s.fence == Some(fence)) {
            state.violation(format!("fence {:?} reset while in use", fence));
        }
        let signaled = state.fences.get_mut(fence).ok_or(GfxError::InvalidHandle("fence"))?;
        *signaled = false;
        Ok(())
    }

    fn create_semaphore(&self, _name: &str) -> GfxResult<RawSemaphore> {
        Ok(self.state.borrow_mut().semaphores.insert(false))
    }

    fn destroy_semaphore(&self, semaphore: RawSemaphore) {
        self.state.borrow_mut().semaphores.remove(semaphore);
    }

    fn create_command_buffer(&self, _queue: QueueKind, _name: &str) -> GfxResult<RawCommandBuffer> {
        Ok(self.state.borrow_mut().command_buffers.insert(CommandBufferObj {
            recording: false,
            commands: vec![],
        }))
    }

    fn destroy_command_buffer(&self, cmd: RawCommandBuffer) {
        self.state.borrow_mut().command_buffers.remove(cmd);
    }

    fn begin_commands(&self, cmd: RawCommandBuffer) -> GfxResult<()> {
        let mut state = self.state.borrow_mut();
        let obj = state.command_buffers.get_mut(cmd).ok_or(GfxError::InvalidHandle("command buffer"))?;
        obj.recording = true;
        obj.commands.clear();
        Ok(())
    }

    fn record(&self, cmd: RawCommandBuffer, command: GfxCommand) {
        let mut state = self.state.borrow_mut();
        let dead_buffer = command.referenced_buffers().into_iter().find(|b| !state.buffers.contains_key(*b));
        let dead_image = command.referenced_images().into_iter().find(|i| !state.images.contains_key(*i));
        if let Some(buffer) = dead_buffer {
            state.violation(format!("recorded command references destroyed buffer {:?}", buffer));
        }
        if let Some(image) = dead_image {
            state.violation(format!("recorded command references destroyed image {:?}", image));
        }
        match state.command_buffers.get_mut(cmd) {
            Some(obj) if obj.recording => obj.commands.push(command),
            _ => state.violation(format!("record into command buffer {:?} which is not recording", cmd)),
        }
    }

    fn end_commands(&self, cmd: RawCommandBuffer) -> GfxResult<()> {
        let mut state = self.state.borrow_mut();
        let obj = state.command_buffers.get_mut(cmd).ok_or(GfxError::InvalidHandle("command buffer"))?;
        obj.recording = false;
        Ok(())
    }

    fn submit(&self, submit: &SubmitDesc) -> GfxResult<()> {
        let mut state = self.state.borrow_mut();

        let mut commands = vec![];
        for cmd in &submit.command_buffers {
            let obj = state.command_buffers.get(*cmd).ok_or(GfxError::InvalidHandle("command buffer"))?;
            if obj.recording {
                return Err(GfxError::InvalidState("submit a command buffer that is still recording".to_string()));
            }
            commands.extend(obj.commands.iter().cloned());
        }
        for (semaphore, _) in &submit.waits {
            state.consume_semaphore(*semaphore, "submit")?;
        }
        for semaphore in &submit.signals {
            state.signal_semaphore(*semaphore, "submit")?;
        }
        if let Some(fence) = submit.fence {
            let signaled = *state.fences.get(fence).ok_or(GfxError::InvalidHandle("fence"))?;
            if signaled {
                state.violation(format!("submit with signaled fence {:?}", fence));
            }
        }

        state.submit_count += 1;
        state.pending.push_back(PendingSubmit {
            fence: submit.fence,
            commands,
        });
        Ok(())
    }

    fn wait_idle(&self) -> GfxResult<()> {
        let mut state = self.state.borrow_mut();
        if state.hang && !state.pending.is_empty() {
            return Err(GfxError::DeviceLost);
        }
        let count = state.pending.len();
        state.complete_front(count);
        Ok(())
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> GfxResult<RawPipeline> {
        Ok(self.state.borrow_mut().pipelines.insert(desc.name.to_string()))
    }

    fn destroy_pipeline(&self, pipeline: RawPipeline) {
        self.state.borrow_mut().pipelines.remove(pipeline);
    }

    fn has_surface(&self) -> bool {
        self.state.borrow().surface_extent.is_some()
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> GfxResult<SwapchainInfo> {
        let mut state = self.state.borrow_mut();
        if state.swapchain.is_some() {
            return Err(GfxError::InvalidState("swapchain already exists".to_string()));
        }
        let surface_extent = state.surface_extent.ok_or_else(|| GfxError::InvalidState("no surface".to_string()))?;
        // 和大多数平台一样，surface 的 current extent 决定最终尺寸
        let extent = if surface_extent.width == 0xFFFFFFFF { desc.extent } else { surface_extent };
        if extent.width == 0 || extent.height == 0 {
            return Err(GfxError::SwapchainOutOfDate);
        }
        let info = SwapchainInfo {
            extent,
            format: vk::Format::B8G8R8A8_SRGB,
            image_count: state.swapchain_image_count,
        };
        state.swapchain = Some(HeadlessSwapchain {
            info,
            acquired: vec![false; info.image_count as usize],
            next_image: 0,
        });
        Ok(info)
    }

    fn destroy_swapchain(&self) {
        self.state.borrow_mut().swapchain = None;
    }

    fn acquire_next_image(&self, signal: RawSemaphore, _timeout: Duration) -> GfxResult<AcquireStatus> {
        let mut state = self.state.borrow_mut();
        let surface_extent = state.surface_extent;
        let Some(swapchain) = state.swapchain.as_mut() else {
            return Err(GfxError::InvalidState("acquire without swapchain".to_string()));
        };
        if surface_extent != Some(swapchain.info.extent) {
            return Ok(AcquireStatus::OutOfDate);
        }

        let count = swapchain.info.image_count;
        let Some(image_index) =
            (0..count).map(|i| (swapchain.next_image + i) % count).find(|i| !swapchain.acquired[*i as usize])
        else {
            return Err(GfxError::InvalidState("all swapchain images are acquired".to_string()));
        };
        swapchain.acquired[image_index as usize] = true;
        swapchain.next_image = (image_index + 1) % count;

        let suboptimal = std::mem::take(&mut state.suboptimal_next_acquire);
        state.signal_semaphore(signal, "acquire")?;

        Ok(AcquireStatus::Acquired {
            image_index,
            suboptimal,
        })
    }

    fn present(&self, image_index: u32, wait: RawSemaphore) -> GfxResult<PresentStatus> {
        let mut state = self.state.borrow_mut();
        state.consume_semaphore(wait, "present")?;

        let surface_extent = state.surface_extent;
        let Some(swapchain) = state.swapchain.as_mut() else {
            return Err(GfxError::InvalidState("present without swapchain".to_string()));
        };
        let Some(acquired) = swapchain.acquired.get_mut(image_index as usize) else {
            return Err(GfxError::InvalidState(format!("present of unknown image {}", image_index)));
        };
        let was_acquired = std::mem::replace(acquired, false);
        let out_of_date = surface_extent != Some(swapchain.info.extent);
        if !was_acquired {
            state.violation(format!("present of image {} which was not acquired", image_index));
        }
        state.presented.push(image_index);

        Ok(if out_of_date { PresentStatus::OutOfDate } else { PresentStatus::Optimal })
    }

    fn shutdown(&mut self) {
        let mut state = self.state.borrow_mut();
        let leaked = [
            ("buffers", state.buffers.len()),
            ("images", state.images.len()),
            ("fences", state.fences.len()),
            ("semaphores", state.semaphores.len()),
            ("command buffers", state.command_buffers.len()),
            ("pipelines", state.pipelines.len()),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(kind, count)| format!("{count} {kind}"))
        .join(", ");
        if !leaked.is_empty() {
            log::warn!("headless device shutdown with live objects: {}", leaked);
        }
        state.pending.clear();
        state.swapchain = None;
        log::info!("headless device shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BufferUsage;

    fn host_buffer(size: u64) -> BufferDesc {
        BufferDesc {
            size,
            usage: BufferUsage::STAGING,
            residency: MemoryResidency::HostVisible,
        }
    }

    #[test]
    fn test_budget_oom() {
        let config = HeadlessConfig {
            device_local_budget: 1024,
            ..Default::default()
        };
        let backend = HeadlessBackend::new(config, &DevicePreferences::default()).unwrap();
        let desc = BufferDesc {
            size: 1000,
            usage: BufferUsage::VERTEX,
            residency: MemoryResidency::DeviceLocal,
        };
        let first = backend.create_buffer(&desc, "a").unwrap();
        let err = backend.create_buffer(&desc, "b").unwrap_err();
        assert!(matches!(err, GfxError::OutOfDeviceMemory { requested: 1000, .. }));

        // 释放之后预算恢复
        backend.destroy_buffer(first);
        assert!(backend.create_buffer(&desc, "c").is_ok());
    }

    #[test]
    fn test_copy_executes_on_fence_wait() {
        let backend = HeadlessBackend::with_defaults().unwrap();
        let src = backend.create_buffer(&host_buffer(4), "src").unwrap();
        let dst = backend.create_buffer(&host_buffer(4), "dst").unwrap();
        backend.write_buffer(src, 0, &[1, 2, 3, 4]).unwrap();

        let cmd = backend.create_command_buffer(QueueKind::Graphics, "cmd").unwrap();
        let fence = backend.create_fence(false, "fence").unwrap();
        backend.begin_commands(cmd).unwrap();
        backend.record(
            cmd,
            GfxCommand::CopyBuffer {
                src,
                src_offset: 0,
                dst,
                dst_offset: 0,
                size: 4,
            },
        );
        backend.end_commands(cmd).unwrap();
        backend.submit(&SubmitDesc::new(&[cmd]).fence(fence)).unwrap();

        // 还没有执行
        assert_eq!(backend.read_buffer(dst).unwrap(), vec![0; 4]);
        assert_eq!(backend.wait_fence(fence, Duration::from_millis(10)).unwrap(), FenceStatus::Signaled);
        assert_eq!(backend.read_buffer(dst).unwrap(), vec![1, 2, 3, 4]);
        assert!(backend.violations().is_empty());
    }

    #[test]
    fn test_destroy_while_pending_is_violation() {
        let backend = HeadlessBackend::with_defaults().unwrap();
        let src = backend.create_buffer(&host_buffer(4), "src").unwrap();
        let dst = backend.create_buffer(&host_buffer(4), "dst").unwrap();
        let cmd = backend.create_command_buffer(QueueKind::Graphics, "cmd").unwrap();
        backend.begin_commands(cmd).unwrap();
        backend.record(
            cmd,
            GfxCommand::CopyBuffer {
                src,
                src_offset: 0,
                dst,
                dst_offset: 0,
                size: 4,
            },
        );
        backend.end_commands(cmd).unwrap();
        backend.submit(&SubmitDesc::new(&[cmd])).unwrap();

        backend.destroy_buffer(src);
        assert_eq!(backend.violations().len(), 1);
    }

    #[test]
    fn test_hang_times_out() {
        let backend = HeadlessBackend::with_defaults().unwrap();
        let cmd = backend.create_command_buffer(QueueKind::Graphics, "cmd").unwrap();
        let fence = backend.create_fence(false, "fence").unwrap();
        backend.begin_commands(cmd).unwrap();
        backend.end_commands(cmd).unwrap();
        backend.submit(&SubmitDesc::new(&[cmd]).fence(fence)).unwrap();

        backend.set_hang(true);
        assert_eq!(backend.wait_fence(fence, Duration::from_millis(1)).unwrap(), FenceStatus::TimedOut);
        assert!(matches!(backend.wait_idle(), Err(GfxError::DeviceLost)));
    }

    #[test]
    fn test_swapchain_out_of_date_after_resize() {
        let backend = HeadlessBackend::with_defaults().unwrap();
        let desc = SwapchainDesc {
            extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            present_mode: Default::default(),
        };
        backend.create_swapchain(&desc).unwrap();
        let sem = backend.create_semaphore("sem").unwrap();
        assert!(matches!(
            backend.acquire_next_image(sem, Duration::from_millis(1)).unwrap(),
            AcquireStatus::Acquired { image_index: 0, .. }
        ));

        backend.set_surface_extent(Some(vk::Extent2D { width: 800, height: 600 }));
        assert_eq!(backend.present(0, sem).unwrap(), PresentStatus::OutOfDate);
        let sem2 = backend.create_semaphore("sem2").unwrap();
        assert_eq!(backend.acquire_next_image(sem2, Duration::from_millis(1)).unwrap(), AcquireStatus::OutOfDate);
    }
}
