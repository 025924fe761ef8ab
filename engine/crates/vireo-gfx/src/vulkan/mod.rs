//! 基于 ash 的 Vulkan 后端

pub mod debug_messenger;
pub mod device;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
mod recorder;
pub mod swapchain;

use std::cell::RefCell;
use std::time::Duration;

use ash::vk;
use slotmap::SlotMap;
use vk_mem::Alloc;

use crate::adapter::{AdapterInfo, DevicePreferences, QueueSelection, select_adapter};
use crate::backend::GfxBackend;
use crate::commands::{GfxCommand, SubmitDesc};
use crate::error::{GfxError, GfxResult};
use crate::handles::{RawBuffer, RawCommandBuffer, RawFence, RawImage, RawPipeline, RawSemaphore};
use crate::types::{
    AcquireStatus, BufferDesc, FenceStatus, GraphicsPipelineDesc, ImageDesc, MemoryResidency, MemoryTypeInfo,
    PresentStatus, QueueKind, SwapchainDesc, SwapchainInfo, is_depth_format,
};
use debug_messenger::DebugMessenger;
use device::VulkanDevice;
use instance::VulkanInstance;
use physical_device::enumerate_physical_devices;
use pipeline::VulkanPipeline;
use swapchain::{VulkanSurface, VulkanSwapchain};

/// 用于创建 surface 的窗口句柄
#[derive(Debug, Clone, Copy)]
pub struct SurfaceTarget {
    pub display: raw_window_handle::RawDisplayHandle,
    pub window: raw_window_handle::RawWindowHandle,
}

pub(crate) struct VulkanBuffer {
    handle: vk::Buffer,
    allocation: vk_mem::Allocation,
    mapped: Option<*mut u8>,
    desc: BufferDesc,
}

pub(crate) struct VulkanImage {
    handle: vk::Image,
    view: vk::ImageView,
    allocation: vk_mem::Allocation,
    desc: ImageDesc,
}

/// 后端分配的所有对象，句柄失效后查找会失败
#[derive(Default)]
pub(crate) struct VulkanObjects {
    buffers: SlotMap<RawBuffer, VulkanBuffer>,
    images: SlotMap<RawImage, VulkanImage>,
    fences: SlotMap<RawFence, vk::Fence>,
    semaphores: SlotMap<RawSemaphore, vk::Semaphore>,
    command_buffers: SlotMap<RawCommandBuffer, vk::CommandBuffer>,
    pipelines: SlotMap<RawPipeline, VulkanPipeline>,
}

pub struct VulkanBackend {
    /// 持有 vulkan library，直到 shutdown 结束
    _entry: ash::Entry,
    instance: VulkanInstance,
    debug_messenger: Option<DebugMessenger>,
    surface: Option<VulkanSurface>,
    pdevice: vk::PhysicalDevice,
    device: VulkanDevice,
    /// 需要在 device 之前销毁，因此使用 Option
    allocator: Option<vk_mem::Allocator>,
    command_pool: vk::CommandPool,
    sampler: vk::Sampler,

    adapter: AdapterInfo,
    queues: QueueSelection,
    memory_types: Vec<MemoryTypeInfo>,

    objects: RefCell<VulkanObjects>,
    swapchain: RefCell<Option<VulkanSwapchain>>,

    shut_down: bool,
}

// new & init
impl VulkanBackend {
    pub fn new(prefs: &DevicePreferences, app_name: &str, surface: Option<SurfaceTarget>) -> GfxResult<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GfxError::DeviceInit {
            reason: format!("failed to load vulkan library: {e}"),
        })?;

        let instance = VulkanInstance::new(&entry, app_name, surface.map(|s| s.display), prefs.enable_validation)?;
        let debug_messenger = if instance.debug_utils_enabled {
            DebugMessenger::register(&entry, &instance.instance)
        } else {
            None
        };

        let surface = match surface {
            Some(target) => Some(VulkanSurface::new(&entry, &instance.instance, target.display, target.window)?),
            None => None,
        };

        let candidates = enumerate_physical_devices(&instance.instance, surface.as_ref())?;
        let infos = candidates.iter().map(|c| c.info.clone()).collect::<Vec<_>>();
        let selection = select_adapter(&infos, prefs, surface.is_some())?;
        let candidate = &candidates[selection.index];
        log::info!("selected physical device: {} (score {})", candidate.info.name, selection.score);

        let device = VulkanDevice::new(
            &instance.instance,
            candidate.handle,
            &selection.queues,
            surface.is_some(),
            instance.debug_utils_enabled,
        )?;

        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(&instance.instance, &device.device, candidate.handle);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        let allocator = unsafe { vk_mem::Allocator::new(vma_ci) }.map_err(|e| GfxError::DeviceInit {
            reason: format!("failed to create memory allocator: {e:?}"),
        })?;

        let pool_ci = vk::CommandPoolCreateInfo::default()
            .queue_family_index(selection.queues.graphics_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.device.create_command_pool(&pool_ci, None) }?;

        let sampler_ci = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .max_lod(vk::LOD_CLAMP_NONE);
        let sampler = unsafe { device.device.create_sampler(&sampler_ci, None) }?;
        device.set_object_debug_name(sampler, "linear-repeat");

        Ok(Self {
            _entry: entry,
            pdevice: candidate.handle,
            adapter: candidate.info.clone(),
            memory_types: candidate.memory_types.clone(),
            queues: selection.queues,
            instance,
            debug_messenger,
            surface,
            device,
            allocator: Some(allocator),
            command_pool,
            sampler,
            objects: RefCell::new(VulkanObjects::default()),
            swapchain: RefCell::new(None),
            shut_down: false,
        })
    }
}
// tools
impl VulkanBackend {
    #[inline]
    fn allocator(&self) -> GfxResult<&vk_mem::Allocator> {
        self.allocator.as_ref().ok_or_else(|| GfxError::InvalidState("backend already shut down".to_string()))
    }

    #[inline]
    fn vk_device(&self) -> &ash::Device {
        &self.device.device
    }

    fn map_alloc_error(e: vk::Result, requested: u64, residency: MemoryResidency) -> GfxError {
        match e {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                GfxError::OutOfDeviceMemory { requested, residency }
            }
            other => GfxError::from(other),
        }
    }

    fn alloc_create_info(residency: MemoryResidency) -> vk_mem::AllocationCreateInfo {
        match residency {
            MemoryResidency::DeviceLocal => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                required_flags: residency.required_flags(),
                ..Default::default()
            },
            MemoryResidency::HostVisible => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                required_flags: residency.required_flags(),
                ..Default::default()
            },
        }
    }

    fn fence(&self, fence: RawFence) -> GfxResult<vk::Fence> {
        self.objects.borrow().fences.get(fence).copied().ok_or(GfxError::InvalidHandle("fence"))
    }

    fn semaphore(&self, semaphore: RawSemaphore) -> GfxResult<vk::Semaphore> {
        self.objects.borrow().semaphores.get(semaphore).copied().ok_or(GfxError::InvalidHandle("semaphore"))
    }

    fn command_buffer(&self, cmd: RawCommandBuffer) -> GfxResult<vk::CommandBuffer> {
        self.objects.borrow().command_buffers.get(cmd).copied().ok_or(GfxError::InvalidHandle("command buffer"))
    }

    fn timeout_ns(timeout: Duration) -> u64 {
        u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
    }
}

impl GfxBackend for VulkanBackend {
    fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn queues(&self) -> &QueueSelection {
        &self.queues
    }

    fn memory_types(&self) -> &[MemoryTypeInfo] {
        &self.memory_types
    }

    fn find_depth_format(&self) -> Option<vk::Format> {
        [vk::Format::D32_SFLOAT, vk::Format::D32_SFLOAT_S8_UINT, vk::Format::D24_UNORM_S8_UINT]
            .into_iter()
            .find(|format| {
                let props =
                    unsafe { self.instance.instance.get_physical_device_format_properties(self.pdevice, *format) };
                props.optimal_tiling_features.contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            })
    }

    fn create_buffer(&self, desc: &BufferDesc, name: &str) -> GfxResult<RawBuffer> {
        if desc.size == 0 {
            return Err(GfxError::InvalidState(format!("buffer {name} has zero size")));
        }
        let allocator = self.allocator()?;
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_ci = Self::alloc_create_info(desc.residency);

        let (handle, mut allocation) = unsafe { allocator.create_buffer(&buffer_ci, &alloc_ci) }
            .map_err(|e| Self::map_alloc_error(e, desc.size, desc.residency))?;

        let mapped = match desc.residency {
            MemoryResidency::HostVisible => match unsafe { allocator.map_memory(&mut allocation) } {
                Ok(ptr) => Some(ptr),
                Err(e) => {
                    unsafe { allocator.destroy_buffer(handle, &mut allocation) };
                    return Err(GfxError::from(e));
                }
            },
            MemoryResidency::DeviceLocal => None,
        };

        self.device.set_object_debug_name(handle, &format!("Buffer::{name}"));
        Ok(self.objects.borrow_mut().buffers.insert(VulkanBuffer {
            handle,
            allocation,
            mapped,
            desc: *desc,
        }))
    }

    fn destroy_buffer(&self, buffer: RawBuffer) {
        let Some(mut buffer) = self.objects.borrow_mut().buffers.remove(buffer) else {
            log::error!("destroy_buffer: invalid handle");
            return;
        };
        let Ok(allocator) = self.allocator() else {
            return;
        };
        unsafe {
            if buffer.mapped.is_some() {
                allocator.unmap_memory(&mut buffer.allocation);
            }
            allocator.destroy_buffer(buffer.handle, &mut buffer.allocation);
        }
    }

    fn write_buffer(&self, buffer: RawBuffer, offset: u64, data: &[u8]) -> GfxResult<()> {
        let objects = self.objects.borrow();
        let buffer = objects.buffers.get(buffer).ok_or(GfxError::InvalidHandle("buffer"))?;
        let ptr = buffer
            .mapped
            .ok_or_else(|| GfxError::InvalidState("write to a buffer that is not host visible".to_string()))?;
        let end = offset + data.len() as u64;
        if end > buffer.desc.size {
            return Err(GfxError::InvalidState(format!(
                "write out of range: {}..{} > {}",
                offset, end, buffer.desc.size
            )));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }
        Ok(())
    }

    fn create_image(&self, desc: &ImageDesc, name: &str) -> GfxResult<RawImage> {
        let allocator = self.allocator()?;
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels.max(1))
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (handle, mut allocation) = unsafe { allocator.create_image(&image_ci, &alloc_ci) }
            .map_err(|e| Self::map_alloc_error(e, desc.byte_size(), MemoryResidency::DeviceLocal))?;

        let aspect = if is_depth_format(desc.format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let view_ci = vk::ImageViewCreateInfo::default()
            .image(handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .level_count(desc.mip_levels.max(1))
                    .layer_count(1),
            );
        let view = match unsafe { self.vk_device().create_image_view(&view_ci, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { allocator.destroy_image(handle, &mut allocation) };
                return Err(GfxError::from(e));
            }
        };

        self.device.set_object_debug_name(handle, &format!("Image::{name}"));
        self.device.set_object_debug_name(view, &format!("ImageView::{name}"));
        Ok(self.objects.borrow_mut().images.insert(VulkanImage {
            handle,
            view,
            allocation,
            desc: *desc,
        }))
    }

    fn destroy_image(&self, image: RawImage) {
        let Some(mut image) = self.objects.borrow_mut().images.remove(image) else {
            log::error!("destroy_image: invalid handle");
            return;
        };
        let Ok(allocator) = self.allocator() else {
            return;
        };
        unsafe {
            self.vk_device().destroy_image_view(image.view, None);
            allocator.destroy_image(image.handle, &mut image.allocation);
        }
    }

    fn create_fence(&self, signaled: bool, name: &str) -> GfxResult<RawFence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe { self.vk_device().create_fence(&vk::FenceCreateInfo::default().flags(flags), None) }?;
        self.device.set_object_debug_name(fence, &format!("Fence::{name}"));
        Ok(self.objects.borrow_mut().fences.insert(fence))
    }

    fn destroy_fence(&self, fence: RawFence) {
        match self.objects.borrow_mut().fences.remove(fence) {
            Some(fence) => unsafe { self.vk_device().destroy_fence(fence, None) },
            None => log::error!("destroy_fence: invalid handle"),
        }
    }

    fn wait_fence(&self, fence: RawFence, timeout: Duration) -> GfxResult<FenceStatus> {
        let fence = self.fence(fence)?;
        match unsafe { self.vk_device().wait_for_fences(&[fence], true, Self::timeout_ns(timeout)) } {
            Ok(()) => Ok(FenceStatus::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceStatus::TimedOut),
            Err(e) => Err(GfxError::from(e)),
        }
    }

    fn fence_signaled(&self, fence: RawFence) -> GfxResult<bool> {
        let fence = self.fence(fence)?;
        Ok(unsafe { self.vk_device().get_fence_status(fence) }?)
    }

    fn reset_fence(&self, fence: RawFence) -> GfxResult<()> {
        let fence = self.fence(fence)?;
        Ok(unsafe { self.vk_device().reset_fences(&[fence]) }?)
    }

    fn create_semaphore(&self, name: &str) -> GfxResult<RawSemaphore> {
        let semaphore = unsafe { self.vk_device().create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }?;
        self.device.set_object_debug_name(semaphore, &format!("Semaphore::{name}"));
        Ok(self.objects.borrow_mut().semaphores.insert(semaphore))
    }

    fn destroy_semaphore(&self, semaphore: RawSemaphore) {
        match self.objects.borrow_mut().semaphores.remove(semaphore) {
            Some(semaphore) => unsafe { self.vk_device().destroy_semaphore(semaphore, None) },
            None => log::error!("destroy_semaphore: invalid handle"),
        }
    }

    fn create_command_buffer(&self, queue: QueueKind, name: &str) -> GfxResult<RawCommandBuffer> {
        // 所有命令都提交到 graphics queue
        if queue != QueueKind::Graphics {
            log::debug!("command buffer {} requested for {:?}, allocated from graphics pool", name, queue);
        }
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.vk_device().allocate_command_buffers(&alloc_info) }?
            .into_iter()
            .next()
            .ok_or_else(|| GfxError::InvalidState("no command buffer allocated".to_string()))?;
        self.device.set_object_debug_name(cmd, &format!("CommandBuffer::{name}"));
        Ok(self.objects.borrow_mut().command_buffers.insert(cmd))
    }

    fn destroy_command_buffer(&self, cmd: RawCommandBuffer) {
        match self.objects.borrow_mut().command_buffers.remove(cmd) {
            Some(cmd) => unsafe { self.vk_device().free_command_buffers(self.command_pool, &[cmd]) },
            None => log::error!("destroy_command_buffer: invalid handle"),
        }
    }

    fn begin_commands(&self, cmd: RawCommandBuffer) -> GfxResult<()> {
        let cmd = self.command_buffer(cmd)?;
        unsafe {
            self.vk_device().reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            self.vk_device().begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;
        }
        Ok(())
    }

    fn record(&self, cmd: RawCommandBuffer, command: GfxCommand) {
        let objects = self.objects.borrow();
        let Some(vk_cmd) = objects.command_buffers.get(cmd).copied() else {
            log::error!("record: invalid command buffer");
            return;
        };
        let swapchain = self.swapchain.borrow();
        if let Err(e) = recorder::record_command(&self.device, &objects, swapchain.as_ref(), self.sampler, vk_cmd, command)
        {
            log::error!("failed to record command: {}", e);
        }
    }

    fn end_commands(&self, cmd: RawCommandBuffer) -> GfxResult<()> {
        let cmd = self.command_buffer(cmd)?;
        Ok(unsafe { self.vk_device().end_command_buffer(cmd) }?)
    }

    fn submit(&self, submit: &SubmitDesc) -> GfxResult<()> {
        let objects = self.objects.borrow();
        let command_infos = submit
            .command_buffers
            .iter()
            .map(|cmd| {
                let cmd = objects.command_buffers.get(*cmd).ok_or(GfxError::InvalidHandle("command buffer"))?;
                Ok(vk::CommandBufferSubmitInfo::default().command_buffer(*cmd))
            })
            .collect::<GfxResult<Vec<_>>>()?;
        let wait_infos = submit
            .waits
            .iter()
            .map(|(semaphore, stage)| {
                let semaphore = objects.semaphores.get(*semaphore).ok_or(GfxError::InvalidHandle("semaphore"))?;
                Ok(vk::SemaphoreSubmitInfo::default().semaphore(*semaphore).stage_mask(*stage))
            })
            .collect::<GfxResult<Vec<_>>>()?;
        let signal_infos = submit
            .signals
            .iter()
            .map(|semaphore| {
                let semaphore = objects.semaphores.get(*semaphore).ok_or(GfxError::InvalidHandle("semaphore"))?;
                Ok(vk::SemaphoreSubmitInfo::default()
                    .semaphore(*semaphore)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS))
            })
            .collect::<GfxResult<Vec<_>>>()?;
        let fence = match submit.fence {
            Some(fence) => *objects.fences.get(fence).ok_or(GfxError::InvalidHandle("fence"))?,
            None => vk::Fence::null(),
        };

        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(&command_infos)
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos);
        unsafe {
            self.vk_device()
                .queue_submit2(self.device.graphics_queue, std::slice::from_ref(&submit_info), fence)?;
        }
        Ok(())
    }

    fn wait_idle(&self) -> GfxResult<()> {
        Ok(unsafe { self.vk_device().device_wait_idle() }?)
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> GfxResult<RawPipeline> {
        let pipeline = VulkanPipeline::new(self.vk_device(), desc)?;
        self.device.set_object_debug_name(pipeline.pipeline, &format!("Pipeline::{}", desc.name));
        Ok(self.objects.borrow_mut().pipelines.insert(pipeline))
    }

    fn destroy_pipeline(&self, pipeline: RawPipeline) {
        match self.objects.borrow_mut().pipelines.remove(pipeline) {
            Some(pipeline) => pipeline.destroy(self.vk_device()),
            None => log::error!("destroy_pipeline: invalid handle"),
        }
    }

    fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> GfxResult<SwapchainInfo> {
        let (Some(surface), Some(loader)) = (self.surface.as_ref(), self.device.swapchain.as_ref()) else {
            return Err(GfxError::InvalidState("device has no surface".to_string()));
        };
        let mut slot = self.swapchain.borrow_mut();
        if slot.is_some() {
            return Err(GfxError::InvalidState("swapchain already exists".to_string()));
        }
        let swapchain = VulkanSwapchain::new(self.vk_device(), loader, surface, self.pdevice, desc)?;
        let info = swapchain.info();
        *slot = Some(swapchain);
        Ok(info)
    }

    fn destroy_swapchain(&self) {
        let Some(loader) = self.device.swapchain.as_ref() else {
            return;
        };
        if let Some(swapchain) = self.swapchain.borrow_mut().take() {
            swapchain.destroy(self.vk_device(), loader);
        }
    }

    fn acquire_next_image(&self, signal: RawSemaphore, timeout: Duration) -> GfxResult<AcquireStatus> {
        let semaphore = self.semaphore(signal)?;
        let swapchain = self.swapchain.borrow();
        let (Some(swapchain), Some(loader)) = (swapchain.as_ref(), self.device.swapchain.as_ref()) else {
            return Err(GfxError::InvalidState("no swapchain".to_string()));
        };
        swapchain.acquire_next_image(loader, semaphore, Self::timeout_ns(timeout))
    }

    fn present(&self, image_index: u32, wait: RawSemaphore) -> GfxResult<PresentStatus> {
        let semaphore = self.semaphore(wait)?;
        let swapchain = self.swapchain.borrow();
        let (Some(swapchain), Some(loader)) = (swapchain.as_ref(), self.device.swapchain.as_ref()) else {
            return Err(GfxError::InvalidState("no swapchain".to_string()));
        };
        let queue = self.device.present_queue.unwrap_or(self.device.graphics_queue);
        swapchain.present_image(loader, queue, image_index, semaphore)
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if let Err(e) = self.wait_idle() {
            log::error!("wait idle failed during shutdown: {}", e);
        }
        self.destroy_swapchain();

        let objects = std::mem::take(self.objects.get_mut());
        let leaked = objects.buffers.len()
            + objects.images.len()
            + objects.fences.len()
            + objects.semaphores.len()
            + objects.command_buffers.len()
            + objects.pipelines.len();
        if leaked > 0 {
            log::warn!("{} vulkan objects are still alive at shutdown, destroying them", leaked);
        }

        let device = self.device.device.clone();
        unsafe {
            if let Some(allocator) = self.allocator.as_ref() {
                for (_, mut buffer) in objects.buffers {
                    if buffer.mapped.is_some() {
                        allocator.unmap_memory(&mut buffer.allocation);
                    }
                    allocator.destroy_buffer(buffer.handle, &mut buffer.allocation);
                }
                for (_, mut image) in objects.images {
                    device.destroy_image_view(image.view, None);
                    allocator.destroy_image(image.handle, &mut image.allocation);
                }
            }
            for (_, fence) in objects.fences {
                device.destroy_fence(fence, None);
            }
            for (_, semaphore) in objects.semaphores {
                device.destroy_semaphore(semaphore, None);
            }
            for (_, pipeline) in objects.pipelines {
                pipeline.destroy(&device);
            }
            // command buffer 随 pool 一起释放
            device.destroy_sampler(self.sampler, None);
            device.destroy_command_pool(self.command_pool, None);
        }

        // allocator 必须在 device 之前销毁
        self.allocator = None;
        self.device.destroy();

        if let Some(messenger) = self.debug_messenger.take() {
            messenger.destroy();
        }
        if let Some(surface) = self.surface.take() {
            surface.destroy();
        }
        self.instance.destroy();
        log::info!("vulkan backend shut down");
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if !self.shut_down {
            log::error!("VulkanBackend dropped without shutdown, releasing now");
            self.shutdown();
        }
    }
}
