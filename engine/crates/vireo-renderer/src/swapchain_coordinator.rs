use std::time::Duration;

use ash::vk;
use vireo_gfx::commands::{CommandEncoder, ImageRef};
use vireo_gfx::device_context::DeviceContext;
use vireo_gfx::error::{GfxError, GfxResult};
use vireo_gfx::handles::RawSemaphore;
use vireo_gfx::types::{AcquireStatus, PresentMode, PresentStatus, SwapchainDesc, SwapchainInfo};

/// Uninitialized -> Ready -> Stale -> Ready -> ... -> Destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    Uninitialized,
    Ready,
    /// 需要 recreate 之后才能继续 acquire
    Stale,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub image_index: u32,
    /// acquire 完成时会 signal 的 semaphore
    pub semaphore: RawSemaphore,
    /// image 仍然可以使用，但是下一帧之前需要 recreate
    pub suboptimal: bool,
}

/// 管理 swapchain 的生命周期
///
/// - acquire 和 present 报告的过期只会把状态切到 Stale，由调用方决定何时 recreate
/// - recreate 只重建 swapchain 本身，其他资源不受影响
/// - 每张 swapchain image 的 layout 单独记录，recreate 之后回到 UNDEFINED
pub struct SwapchainCoordinator {
    state: SwapchainState,
    present_mode: PresentMode,
    acquire_timeout: Duration,

    info: Option<SwapchainInfo>,
    /// 最近一次 resize 通知的窗口尺寸
    pending_extent: Option<vk::Extent2D>,
    image_layouts: Vec<vk::ImageLayout>,

    recreate_count: u64,
}

// new & init
impl SwapchainCoordinator {
    pub fn new(present_mode: PresentMode, acquire_timeout: Duration) -> Self {
        Self {
            state: SwapchainState::Uninitialized,
            present_mode,
            acquire_timeout,
            info: None,
            pending_extent: None,
            image_layouts: vec![],
            recreate_count: 0,
        }
    }
}
// getters
impl SwapchainCoordinator {
    #[inline]
    pub fn state(&self) -> SwapchainState {
        self.state
    }

    #[inline]
    pub fn info(&self) -> Option<SwapchainInfo> {
        self.info
    }

    #[inline]
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.info.map(|info| info.extent)
    }

    #[inline]
    pub fn format(&self) -> Option<vk::Format> {
        self.info.map(|info| info.format)
    }

    /// recreate 时应当使用的尺寸：优先使用最近一次 resize 通知的尺寸
    #[inline]
    pub fn desired_extent(&self) -> Option<vk::Extent2D> {
        self.pending_extent.or(self.extent())
    }

    #[inline]
    pub fn recreate_count(&self) -> u64 {
        self.recreate_count
    }

    #[inline]
    pub fn image_layout(&self, image_index: u32) -> Option<vk::ImageLayout> {
        self.image_layouts.get(image_index as usize).copied()
    }
}
// update
impl SwapchainCoordinator {
    /// 窗口尺寸变化，来自 windowing 层的 resize 回调
    pub fn notify_resized(&mut self, extent: vk::Extent2D) {
        self.pending_extent = Some(extent);
        if self.state == SwapchainState::Ready && self.extent() != Some(extent) {
            log::info!("swapchain stale after resize to {}x{}", extent.width, extent.height);
            self.state = SwapchainState::Stale;
        }
    }

    /// 销毁旧的 swapchain 并创建新的
    ///
    /// 尺寸为 0 时（窗口最小化）保持 Stale，返回 `SwapchainOutOfDate`，之后需要再次调用。
    pub fn recreate(&mut self, device: &DeviceContext, extent: vk::Extent2D) -> GfxResult<SwapchainInfo> {
        if self.state == SwapchainState::Destroyed {
            return Err(GfxError::InvalidState("recreate a destroyed swapchain".to_string()));
        }
        self.pending_extent = Some(extent);
        if extent.width == 0 || extent.height == 0 {
            log::debug!("skip swapchain recreate with zero extent");
            self.state = SwapchainState::Stale;
            return Err(GfxError::SwapchainOutOfDate);
        }

        // 旧的 swapchain image 可能仍然被 in-flight 的帧使用
        if self.info.take().is_some() {
            device.wait_idle()?;
            device.destroy_swapchain();
        }
        self.image_layouts.clear();
        self.state = SwapchainState::Stale;

        let info = device.create_swapchain(&SwapchainDesc {
            extent,
            present_mode: self.present_mode,
        })?;

        self.info = Some(info);
        self.pending_extent = None;
        self.image_layouts = vec![vk::ImageLayout::UNDEFINED; info.image_count as usize];
        self.state = SwapchainState::Ready;
        self.recreate_count += 1;
        log::info!(
            "swapchain created: {}x{}, {:?}, {} images, {:?}",
            info.extent.width,
            info.extent.height,
            info.format,
            info.image_count,
            self.present_mode
        );
        Ok(info)
    }

    /// 获取下一张 image
    ///
    /// Stale 状态、或者 presentation engine 报告过期时返回 `SwapchainOutOfDate`，此时 semaphore 不会被 signal。
    pub fn acquire_next(&mut self, device: &DeviceContext, semaphore: RawSemaphore) -> GfxResult<AcquiredImage> {
        match self.state {
            SwapchainState::Ready => {}
            SwapchainState::Stale => return Err(GfxError::SwapchainOutOfDate),
            SwapchainState::Uninitialized | SwapchainState::Destroyed => {
                return Err(GfxError::InvalidState(format!("acquire in state {:?}", self.state)));
            }
        }

        let status = device.acquire_next_image(semaphore, self.acquire_timeout).inspect_err(|e| {
            if e.is_swapchain_out_of_date() {
                self.state = SwapchainState::Stale;
            }
        })?;
        match status {
            AcquireStatus::Acquired {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    log::warn!("swapchain suboptimal on acquire, recreate before next frame");
                    self.state = SwapchainState::Stale;
                }
                Ok(AcquiredImage {
                    image_index,
                    semaphore,
                    suboptimal,
                })
            }
            AcquireStatus::OutOfDate => {
                log::info!("swapchain out of date on acquire");
                self.state = SwapchainState::Stale;
                Err(GfxError::SwapchainOutOfDate)
            }
        }
    }

    /// 提交 present，返回值只影响下一帧的状态
    pub fn present(&mut self, device: &DeviceContext, image_index: u32, wait: RawSemaphore) -> GfxResult<PresentStatus> {
        if self.info.is_none() {
            return Err(GfxError::InvalidState("present without swapchain".to_string()));
        }
        let status = match device.present(image_index, wait) {
            Ok(status) => status,
            Err(GfxError::SwapchainOutOfDate) => PresentStatus::OutOfDate,
            Err(e) => return Err(e),
        };
        match status {
            PresentStatus::Optimal => {}
            PresentStatus::Suboptimal => {
                log::warn!("swapchain suboptimal on present");
                self.state = SwapchainState::Stale;
            }
            PresentStatus::OutOfDate => {
                log::info!("swapchain out of date on present");
                self.state = SwapchainState::Stale;
            }
        }
        Ok(status)
    }

    /// 从记录的 layout 转换到 `new_layout`，layout 相同时不记录任何命令
    pub fn transition_image(
        &mut self,
        encoder: &CommandEncoder,
        image_index: u32,
        new_layout: vk::ImageLayout,
    ) -> GfxResult<()> {
        let layout = self
            .image_layouts
            .get_mut(image_index as usize)
            .ok_or_else(|| GfxError::InvalidState(format!("swapchain image {} out of range", image_index)))?;
        encoder.image_barrier(ImageRef::Swapchain(image_index), *layout, new_layout);
        *layout = new_layout;
        Ok(())
    }

    /// 录制的 barrier 被丢弃之后，把记录的 layout 改回去，不录制任何命令
    pub fn reset_image_layout(&mut self, image_index: u32, layout: vk::ImageLayout) -> GfxResult<()> {
        let tracked = self
            .image_layouts
            .get_mut(image_index as usize)
            .ok_or_else(|| GfxError::InvalidState(format!("swapchain image {} out of range", image_index)))?;
        *tracked = layout;
        Ok(())
    }
}
// destroy
impl SwapchainCoordinator {
    /// 调用之前需要确保 GPU 已经不再使用 swapchain image
    pub fn destroy(&mut self, device: &DeviceContext) {
        if self.info.take().is_some() {
            device.destroy_swapchain();
            log::info!("swapchain destroyed");
        }
        self.image_layouts.clear();
        self.state = SwapchainState::Destroyed;
    }
}
impl Drop for SwapchainCoordinator {
    fn drop(&mut self) {
        if self.info.is_some() && !std::thread::panicking() {
            log::error!("SwapchainCoordinator dropped without destroy()");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vireo_gfx::headless::HeadlessBackend;
    use vireo_gfx::types::QueueKind;

    const TIMEOUT: Duration = Duration::from_millis(10);

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn setup() -> (HeadlessBackend, DeviceContext, SwapchainCoordinator, RawSemaphore) {
        let backend = HeadlessBackend::with_defaults().unwrap();
        let device = DeviceContext::from_backend(Box::new(backend.clone()));
        let semaphore = device.create_semaphore("test-acquire").unwrap();
        let coordinator = SwapchainCoordinator::new(PresentMode::Fifo, TIMEOUT);
        (backend, device, coordinator, semaphore)
    }

    fn finish(backend: HeadlessBackend, device: DeviceContext, mut coordinator: SwapchainCoordinator, sem: RawSemaphore) {
        device.wait_idle().unwrap();
        coordinator.destroy(&device);
        assert_eq!(coordinator.state(), SwapchainState::Destroyed);
        device.destroy_semaphore(sem);
        device.destroy();
        assert!(backend.violations().is_empty(), "{:?}", backend.violations());
    }

    #[test]
    fn test_acquire_before_create_is_invalid() {
        let (backend, device, mut coordinator, sem) = setup();
        assert_eq!(coordinator.state(), SwapchainState::Uninitialized);
        assert!(matches!(coordinator.acquire_next(&device, sem), Err(GfxError::InvalidState(_))));
        finish(backend, device, coordinator, sem);
    }

    #[test]
    fn test_recreate_then_acquire_returns_valid_image() {
        let (backend, device, mut coordinator, sem) = setup();
        let info = coordinator.recreate(&device, extent(1280, 720)).unwrap();
        assert_eq!(coordinator.state(), SwapchainState::Ready);
        assert_eq!(info.extent, extent(1280, 720));
        assert_eq!(coordinator.image_layout(0), Some(vk::ImageLayout::UNDEFINED));

        let acquired = coordinator.acquire_next(&device, sem).unwrap();
        assert!(acquired.image_index < info.image_count);
        assert!(!acquired.suboptimal);
        assert_eq!(acquired.semaphore, sem);

        // acquire signal 的 semaphore 直接用于 present
        assert_eq!(coordinator.present(&device, acquired.image_index, sem).unwrap(), PresentStatus::Optimal);
        assert_eq!(backend.presented_images(), vec![acquired.image_index]);
        finish(backend, device, coordinator, sem);
    }

    #[test]
    fn test_resize_round_trip() {
        let (backend, device, mut coordinator, sem) = setup();
        coordinator.recreate(&device, extent(1280, 720)).unwrap();

        // 同样的尺寸不会导致 Stale
        coordinator.notify_resized(extent(1280, 720));
        assert_eq!(coordinator.state(), SwapchainState::Ready);

        backend.set_surface_extent(Some(extent(640, 480)));
        coordinator.notify_resized(extent(640, 480));
        assert_eq!(coordinator.state(), SwapchainState::Stale);
        assert!(matches!(coordinator.acquire_next(&device, sem), Err(GfxError::SwapchainOutOfDate)));
        assert_eq!(coordinator.desired_extent(), Some(extent(640, 480)));

        let desired = coordinator.desired_extent().unwrap();
        let info = coordinator.recreate(&device, desired).unwrap();
        assert_eq!(info.extent, extent(640, 480));
        assert_eq!(coordinator.recreate_count(), 2);

        let acquired = coordinator.acquire_next(&device, sem).unwrap();
        assert!(acquired.image_index < info.image_count);
        coordinator.present(&device, acquired.image_index, sem).unwrap();
        finish(backend, device, coordinator, sem);
    }

    #[test]
    fn test_out_of_date_from_backend_marks_stale() {
        let (backend, device, mut coordinator, sem) = setup();
        coordinator.recreate(&device, extent(1280, 720)).unwrap();

        // 没有收到 resize 通知，但 surface 已经变化
        backend.set_surface_extent(Some(extent(1024, 768)));
        assert!(matches!(coordinator.acquire_next(&device, sem), Err(GfxError::SwapchainOutOfDate)));
        assert_eq!(coordinator.state(), SwapchainState::Stale);

        coordinator.recreate(&device, extent(1024, 768)).unwrap();
        assert_eq!(coordinator.state(), SwapchainState::Ready);
        let acquired = coordinator.acquire_next(&device, sem).unwrap();
        coordinator.present(&device, acquired.image_index, sem).unwrap();
        finish(backend, device, coordinator, sem);
    }

    #[test]
    fn test_suboptimal_acquire_returns_image_then_stale() {
        let (backend, device, mut coordinator, sem) = setup();
        coordinator.recreate(&device, extent(1280, 720)).unwrap();

        backend.mark_next_acquire_suboptimal();
        let acquired = coordinator.acquire_next(&device, sem).unwrap();
        assert!(acquired.suboptimal);
        assert_eq!(coordinator.state(), SwapchainState::Stale);

        // 已经 acquire 的 image 仍然可以 present
        coordinator.present(&device, acquired.image_index, sem).unwrap();
        assert!(matches!(coordinator.acquire_next(&device, sem), Err(GfxError::SwapchainOutOfDate)));

        coordinator.recreate(&device, extent(1280, 720)).unwrap();
        let acquired = coordinator.acquire_next(&device, sem).unwrap();
        assert!(!acquired.suboptimal);
        coordinator.present(&device, acquired.image_index, sem).unwrap();
        finish(backend, device, coordinator, sem);
    }

    #[test]
    fn test_zero_extent_stays_stale() {
        let (backend, device, mut coordinator, sem) = setup();
        coordinator.recreate(&device, extent(1280, 720)).unwrap();

        backend.set_surface_extent(Some(extent(0, 0)));
        coordinator.notify_resized(extent(0, 0));
        assert!(matches!(coordinator.recreate(&device, extent(0, 0)), Err(GfxError::SwapchainOutOfDate)));
        assert_eq!(coordinator.state(), SwapchainState::Stale);
        // 旧的 swapchain 保留到真正可以重建的时候
        assert_eq!(coordinator.extent(), Some(extent(1280, 720)));

        backend.set_surface_extent(Some(extent(800, 600)));
        coordinator.notify_resized(extent(800, 600));
        let desired = coordinator.desired_extent().unwrap();
        let info = coordinator.recreate(&device, desired).unwrap();
        assert_eq!(info.extent, extent(800, 600));
        finish(backend, device, coordinator, sem);
    }

    #[test]
    fn test_present_out_of_date_feeds_stale() {
        let (backend, device, mut coordinator, sem) = setup();
        coordinator.recreate(&device, extent(1280, 720)).unwrap();
        let acquired = coordinator.acquire_next(&device, sem).unwrap();

        backend.set_surface_extent(Some(extent(1280, 800)));
        assert_eq!(coordinator.present(&device, acquired.image_index, sem).unwrap(), PresentStatus::OutOfDate);
        assert_eq!(coordinator.state(), SwapchainState::Stale);
        finish(backend, device, coordinator, sem);
    }

    #[test]
    fn test_image_layout_tracking() {
        let (backend, device, mut coordinator, sem) = setup();
        coordinator.recreate(&device, extent(1280, 720)).unwrap();

        let cmd = device.create_command_buffer(QueueKind::Graphics, "test-layout").unwrap();
        device.begin_commands(cmd).unwrap();
        let encoder = device.encoder(cmd);
        coordinator.transition_image(&encoder, 1, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL).unwrap();
        coordinator.transition_image(&encoder, 1, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL).unwrap();
        coordinator.transition_image(&encoder, 1, vk::ImageLayout::PRESENT_SRC_KHR).unwrap();
        assert!(coordinator.transition_image(&encoder, 99, vk::ImageLayout::PRESENT_SRC_KHR).is_err());
        device.end_commands(cmd).unwrap();

        let recorded = backend.recorded_commands(cmd);
        assert_eq!(recorded.len(), 2);
        assert_eq!(coordinator.image_layout(1), Some(vk::ImageLayout::PRESENT_SRC_KHR));
        assert_eq!(coordinator.image_layout(0), Some(vk::ImageLayout::UNDEFINED));

        coordinator.recreate(&device, extent(1280, 720)).unwrap();
        assert_eq!(coordinator.image_layout(1), Some(vk::ImageLayout::UNDEFINED));

        device.destroy_command_buffer(cmd);
        finish(backend, device, coordinator, sem);
    }
}
