use std::time::Duration;

use ash::vk;
use itertools::Itertools;
use vireo_gfx::commands::SubmitDesc;
use vireo_gfx::device_context::DeviceContext;
use vireo_gfx::error::{GfxError, GfxResult};
use vireo_gfx::handles::{RawCommandBuffer, RawFence, RawSemaphore};
use vireo_gfx::types::{FenceStatus, QueueKind};
use vireo_render_interface::frame_counter::{FrameCounter, FrameLabel};
use vireo_render_interface::frame_info::FrameInfo;
use vireo_render_interface::gpu_resource_manager::GpuResourceManager;

/// 一个 in-flight 帧槽位持有的对象
struct FrameContext {
    label: FrameLabel,
    cmd: RawCommandBuffer,
    /// 创建时就是 signaled，第一次 begin_frame 不会等待
    fence: RawFence,
    image_available: RawSemaphore,
    render_finished: RawSemaphore,
    /// 最近一次在这个槽位提交的帧序号
    submitted_frame: Option<u64>,
}

impl FrameContext {
    fn new(device: &DeviceContext, label: FrameLabel) -> GfxResult<Self> {
        Ok(Self {
            label,
            cmd: device.create_command_buffer(QueueKind::Graphics, &format!("frame-{}", label))?,
            fence: device.create_fence(true, &format!("frame-fence-{}", label))?,
            image_available: device.create_semaphore(&format!("image-available-{}", label))?,
            render_finished: device.create_semaphore(&format!("render-finished-{}", label))?,
            submitted_frame: None,
        })
    }

    fn destroy(&self, device: &DeviceContext) {
        device.destroy_command_buffer(self.cmd);
        device.destroy_fence(self.fence);
        device.destroy_semaphore(self.image_available);
        device.destroy_semaphore(self.render_finished);
    }
}

/// N 个 in-flight 帧的环形队列
///
/// - begin_frame 等待即将复用的槽位的 fence，CPU 最多领先 GPU N 帧
/// - 等待有时限，超时视为设备丢失
/// - 每帧开始时根据已完成的帧回收资源，并清空这个槽位的 scratch arena
/// - 所有帧按 begin 的顺序提交到同一个 queue
pub struct FrameScheduler {
    frames: Vec<FrameContext>,
    frame_counter: FrameCounter,
    fence_timeout: Duration,

    /// 正在录制的帧
    open_frame: Option<FrameInfo>,
    last_submitted: Option<u64>,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

// new & init
impl FrameScheduler {
    pub fn new(device: &DeviceContext, frames_in_flight: usize, fence_timeout: Duration) -> GfxResult<Self> {
        if !(FrameCounter::MIN_FIF_COUNT..=FrameCounter::MAX_FIF_COUNT).contains(&frames_in_flight) {
            return Err(GfxError::InvalidState(format!(
                "frames in flight must be {}..={}, got {}",
                FrameCounter::MIN_FIF_COUNT,
                FrameCounter::MAX_FIF_COUNT,
                frames_in_flight
            )));
        }

        let mut frames = Vec::with_capacity(frames_in_flight);
        for slot in 0..frames_in_flight {
            match FrameContext::new(device, FrameLabel::from_usize(slot)) {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    frames.iter().for_each(|frame| frame.destroy(device));
                    return Err(e);
                }
            }
        }
        log::info!("frame scheduler: {} frames in flight, fence timeout {:?}", frames_in_flight, fence_timeout);

        Ok(Self {
            frames,
            frame_counter: FrameCounter::new(1, frames_in_flight),
            fence_timeout,
            open_frame: None,
            last_submitted: None,

            #[cfg(debug_assertions)]
            destroyed: false,
        })
    }
}
// getters
impl FrameScheduler {
    /// 下一次 begin_frame（或者正在录制的帧）的序号
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_counter.frame_id()
    }

    #[inline]
    pub fn fif_count(&self) -> usize {
        self.frame_counter.fif_count()
    }

    #[inline]
    pub fn fence_timeout(&self) -> Duration {
        self.fence_timeout
    }

    #[inline]
    pub fn current_frame(&self) -> Option<FrameInfo> {
        self.open_frame
    }

    #[inline]
    pub fn last_submitted(&self) -> Option<u64> {
        self.last_submitted
    }

    /// 已经提交但是 fence 还没有 signal 的帧数，不超过 N
    pub fn in_flight_count(&self, device: &DeviceContext) -> GfxResult<usize> {
        let mut count = 0;
        for frame in &self.frames {
            if frame.submitted_frame.is_some() && !device.fence_signaled(frame.fence)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// 已经完成的最大帧序号，之前的帧也全部完成
    ///
    /// 有帧在执行时是最早的 in-flight 帧减一，否则是最后一次提交的帧
    pub fn completed_watermark(&self, device: &DeviceContext) -> GfxResult<Option<u64>> {
        let mut oldest_in_flight: Option<u64> = None;
        for frame in &self.frames {
            if let Some(frame_id) = frame.submitted_frame
                && !device.fence_signaled(frame.fence)?
            {
                oldest_in_flight = Some(oldest_in_flight.map_or(frame_id, |oldest| oldest.min(frame_id)));
            }
        }
        Ok(match oldest_in_flight {
            Some(oldest) => oldest.checked_sub(1),
            None => self.last_submitted,
        })
    }
}
// update
impl FrameScheduler {
    /// 等待槽位可用，开始录制新的一帧
    ///
    /// fence 等待超时返回 `DeviceLost`，之后只能重新初始化设备。
    pub fn begin_frame(&mut self, device: &DeviceContext, resources: &mut GpuResourceManager) -> GfxResult<FrameInfo> {
        if let Some(frame) = &self.open_frame {
            return Err(GfxError::InvalidState(format!("{} is still recording", frame.frame_name())));
        }

        let slot = self.frame_counter.slot();
        let frame = &self.frames[slot];
        self.wait_frame_fence(device, frame)?;

        let watermark = self.completed_watermark(device)?;
        let reclaimed = resources.collect_garbage(device, watermark);
        if reclaimed > 0 {
            log::trace!("{} reclaimed {} resources", self.frame_counter.frame_name(), reclaimed);
        }
        resources.reset_scratch(slot);

        let frame = &self.frames[slot];
        device.begin_commands(frame.cmd)?;
        let info = FrameInfo {
            slot,
            label: frame.label,
            frame_id: self.frame_counter.frame_id(),
            cmd: frame.cmd,
            image_available: frame.image_available,
            render_finished: frame.render_finished,
        };
        self.open_frame = Some(info);
        Ok(info)
    }

    /// 结束当前帧但是不提交，用于 acquire 失败的情况
    ///
    /// 槽位的 fence 保持 signaled，帧序号不前进。
    pub fn abandon_frame(&mut self, device: &DeviceContext) -> GfxResult<()> {
        let frame = self.open_frame.take().ok_or_else(|| GfxError::InvalidState("no open frame".to_string()))?;
        device.end_commands(frame.cmd)?;
        log::debug!("{} abandoned", frame.frame_name());
        Ok(())
    }

    /// 丢弃当前帧已经录制的命令，重新开始录制
    ///
    /// 用于 acquire 之后录制失败的情况：这一帧仍然需要提交，image-available 才会被消耗。
    pub fn restart_commands(&mut self, device: &DeviceContext) -> GfxResult<()> {
        let frame = self.open_frame.as_ref().ok_or_else(|| GfxError::InvalidState("no open frame".to_string()))?;
        device.begin_commands(frame.cmd)?;
        log::debug!("{} commands discarded", frame.frame_name());
        Ok(())
    }

    /// 提交当前帧，返回提交的帧序号
    ///
    /// `acquired`：本帧是否 acquire 了 swapchain image。
    /// 是的话在 color attachment output 阶段等待 image-available，并 signal render-finished 给 present 使用。
    pub fn end_frame(&mut self, device: &DeviceContext, acquired: bool) -> GfxResult<u64> {
        let info = self.open_frame.take().ok_or_else(|| GfxError::InvalidState("no open frame".to_string()))?;
        device.end_commands(info.cmd)?;

        let frame = &mut self.frames[info.slot];
        device.reset_fence(frame.fence)?;

        let mut submit = SubmitDesc::new(&[info.cmd]);
        if acquired {
            submit = submit
                .wait(info.image_available, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
                .signal(info.render_finished);
        }
        device.submit(&submit.fence(frame.fence))?;

        frame.submitted_frame = Some(info.frame_id);
        self.last_submitted = Some(info.frame_id);
        self.frame_counter.next_frame();
        Ok(info.frame_id)
    }

    /// 等待所有 in-flight 的帧完成，并回收所有可以回收的资源
    ///
    /// shutdown 之前必须调用
    pub fn drain(&mut self, device: &DeviceContext, resources: &mut GpuResourceManager) -> GfxResult<()> {
        if self.open_frame.is_some() {
            self.abandon_frame(device)?;
        }
        for frame in self.frames.iter().filter(|frame| frame.submitted_frame.is_some()) {
            self.wait_frame_fence(device, frame)?;
        }
        let reclaimed = resources.collect_garbage(device, self.last_submitted);
        log::info!(
            "frame scheduler drained: last submitted {:?}, reclaimed {} resources",
            self.last_submitted,
            reclaimed
        );
        Ok(())
    }

    fn wait_frame_fence(&self, device: &DeviceContext, frame: &FrameContext) -> GfxResult<()> {
        match device.wait_fence(frame.fence, self.fence_timeout)? {
            FenceStatus::Signaled => Ok(()),
            FenceStatus::TimedOut => {
                log::error!(
                    "fence of slot {} (frame {:?}) not signaled after {:?}, device lost",
                    frame.label,
                    frame.submitted_frame,
                    self.fence_timeout
                );
                Err(GfxError::DeviceLost)
            }
        }
    }
}
// destroy
impl FrameScheduler {
    /// 调用之前需要 drain，或者确认设备已经 idle
    pub fn destroy(mut self, device: &DeviceContext) {
        let labels = self.frames.iter().map(|frame| frame.label).join(", ");
        for frame in self.frames.drain(..) {
            frame.destroy(device);
        }
        log::info!("frame scheduler destroyed: slots {}", labels);

        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}
impl Drop for FrameScheduler {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            assert!(self.destroyed || std::thread::panicking(), "FrameScheduler dropped without destroy()");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vireo_gfx::commands::GfxCommand;
    use vireo_gfx::headless::HeadlessBackend;
    use vireo_gfx::types::{AcquireStatus, BufferUsage, MemoryResidency, SwapchainDesc};
    use vireo_render_interface::gpu_resource_manager::ResourceManagerConfig;

    const TIMEOUT: Duration = Duration::from_millis(50);

    struct Harness {
        backend: HeadlessBackend,
        device: DeviceContext,
        resources: GpuResourceManager,
        scheduler: FrameScheduler,
    }

    impl Harness {
        fn new(fif: usize) -> Self {
            let backend = HeadlessBackend::with_defaults().unwrap();
            let device = DeviceContext::from_backend(Box::new(backend.clone()));
            let resources = GpuResourceManager::new(ResourceManagerConfig {
                frames_in_flight: fif,
                scratch_initial_bytes: 1024,
                ..Default::default()
            });
            let scheduler = FrameScheduler::new(&device, fif, TIMEOUT).unwrap();
            Self {
                backend,
                device,
                resources,
                scheduler,
            }
        }

        fn run_frame(&mut self) -> u64 {
            self.scheduler.begin_frame(&self.device, &mut self.resources).unwrap();
            self.scheduler.end_frame(&self.device, false).unwrap()
        }

        fn finish(mut self) {
            self.scheduler.drain(&self.device, &mut self.resources).unwrap();
            self.scheduler.destroy(&self.device);
            self.resources.destroy(&self.device);
            self.device.destroy();
            assert_eq!(self.backend.live_buffer_count(), 0);
            assert_eq!(self.backend.live_image_count(), 0);
            assert!(self.backend.violations().is_empty(), "{:?}", self.backend.violations());
        }
    }

    #[test]
    fn test_reject_invalid_ring_depth() {
        let backend = HeadlessBackend::with_defaults().unwrap();
        let device = DeviceContext::from_backend(Box::new(backend));
        assert!(matches!(FrameScheduler::new(&device, 1, TIMEOUT), Err(GfxError::InvalidState(_))));
        assert!(matches!(FrameScheduler::new(&device, 4, TIMEOUT), Err(GfxError::InvalidState(_))));
        device.destroy();
    }

    #[test]
    fn test_restart_commands_discards_recording() {
        let mut h = Harness::new(2);
        assert!(h.scheduler.restart_commands(&h.device).is_err());

        let frame = h.scheduler.begin_frame(&h.device, &mut h.resources).unwrap();
        h.device.encoder(frame.cmd).push(GfxCommand::EndRendering);
        assert_eq!(h.backend.recorded_commands(frame.cmd).len(), 1);

        h.scheduler.restart_commands(&h.device).unwrap();
        assert!(h.backend.recorded_commands(frame.cmd).is_empty());
        assert_eq!(h.scheduler.current_frame().map(|f| f.frame_id), Some(frame.frame_id));
        assert_eq!(h.scheduler.end_frame(&h.device, false).unwrap(), frame.frame_id);
        h.finish();
    }

    #[test]
    fn test_in_flight_never_exceeds_ring_depth() {
        for fif in [2, 3] {
            let mut h = Harness::new(fif);
            let mut max_in_flight = 0;
            for _ in 0..20 {
                h.run_frame();
                let in_flight = h.scheduler.in_flight_count(&h.device).unwrap();
                assert!(in_flight <= fif);
                assert!(h.backend.pending_submissions() <= fif);
                max_in_flight = max_in_flight.max(in_flight);
            }
            assert_eq!(max_in_flight, fif);
            assert_eq!(h.backend.submit_count(), 20);

            h.scheduler.drain(&h.device, &mut h.resources).unwrap();
            assert_eq!(h.scheduler.in_flight_count(&h.device).unwrap(), 0);
            h.finish();
        }
    }

    #[test]
    fn test_frame_ids_and_labels_advance() {
        let mut h = Harness::new(3);
        let first = h.scheduler.begin_frame(&h.device, &mut h.resources).unwrap();
        assert_eq!(first.frame_id, 1);
        assert_eq!((first.slot, first.label), (1, FrameLabel::B));
        assert_eq!(h.scheduler.current_frame().map(|f| f.frame_id), Some(1));
        assert_eq!(h.scheduler.end_frame(&h.device, false).unwrap(), 1);

        let second = h.scheduler.begin_frame(&h.device, &mut h.resources).unwrap();
        assert_eq!((second.frame_id, second.label), (2, FrameLabel::C));
        assert_ne!(first.cmd, second.cmd);
        h.scheduler.end_frame(&h.device, false).unwrap();
        assert_eq!(h.scheduler.last_submitted(), Some(2));
        h.finish();
    }

    #[test]
    fn test_begin_twice_and_end_without_begin() {
        let mut h = Harness::new(2);
        assert!(matches!(h.scheduler.end_frame(&h.device, false), Err(GfxError::InvalidState(_))));
        h.scheduler.begin_frame(&h.device, &mut h.resources).unwrap();
        assert!(matches!(
            h.scheduler.begin_frame(&h.device, &mut h.resources),
            Err(GfxError::InvalidState(_))
        ));
        h.scheduler.end_frame(&h.device, false).unwrap();
        h.finish();
    }

    #[test]
    fn test_abandon_keeps_frame_id() {
        let mut h = Harness::new(2);
        let frame = h.scheduler.begin_frame(&h.device, &mut h.resources).unwrap();
        h.scheduler.abandon_frame(&h.device).unwrap();
        assert_eq!(h.scheduler.frame_id(), frame.frame_id);
        assert_eq!(h.backend.submit_count(), 0);
        assert!(h.scheduler.current_frame().is_none());

        // fence 仍然是 signaled，同一个槽位可以立即再次开始
        let again = h.scheduler.begin_frame(&h.device, &mut h.resources).unwrap();
        assert_eq!((again.frame_id, again.slot), (frame.frame_id, frame.slot));
        h.scheduler.end_frame(&h.device, false).unwrap();
        h.finish();
    }

    #[test]
    fn test_fence_timeout_is_device_lost() {
        let mut h = Harness::new(2);
        h.run_frame();
        h.run_frame();
        h.backend.set_hang(true);
        let err = h.scheduler.begin_frame(&h.device, &mut h.resources).unwrap_err();
        assert!(matches!(err, GfxError::DeviceLost));
        assert!(err.is_fatal());
        assert!(matches!(h.scheduler.drain(&h.device, &mut h.resources), Err(GfxError::DeviceLost)));

        h.backend.set_hang(false);
        h.finish();
    }

    #[test]
    fn test_released_buffer_survives_until_frame_completes() {
        let mut h = Harness::new(3);
        let frame = h.scheduler.begin_frame(&h.device, &mut h.resources).unwrap();
        let buffer = h
            .resources
            .allocate_buffer(&h.device, 256, BufferUsage::UNIFORM, MemoryResidency::HostVisible, "per-frame")
            .unwrap();
        let raw = h.resources.buffer_raw(buffer).unwrap();
        h.resources.mark_buffer_used(buffer, frame.frame_id);
        h.resources.release_buffer(buffer).unwrap();
        h.scheduler.end_frame(&h.device, false).unwrap();

        // 其他两个槽位开始时，这一帧仍然在执行
        for _ in 0..2 {
            h.run_frame();
            assert_eq!(h.resources.stats().pending_buffers, 1);
            assert!(h.backend.buffer_desc(raw).is_some());
        }

        // 复用第一个槽位时等待它的 fence，buffer 回到空闲列表
        h.run_frame();
        let stats = h.resources.stats();
        assert_eq!(stats.pending_buffers, 0);
        assert_eq!(stats.pooled_buffers, 1);
        assert!(h.resources.buffer_raw(buffer).is_none());
        h.finish();
    }

    #[test]
    fn test_thousand_frames_do_not_leak() {
        let mut h = Harness::new(3);
        for i in 0..1000u32 {
            let frame = h.scheduler.begin_frame(&h.device, &mut h.resources).unwrap();
            h.resources
                .scratch_upload(&h.device, frame.slot, frame.frame_id, &i.to_le_bytes().repeat(16), 16)
                .unwrap();
            if i % 10 == 0 {
                let buffer = h
                    .resources
                    .allocate_buffer(&h.device, 512, BufferUsage::VERTEX, MemoryResidency::HostVisible, "transient")
                    .unwrap();
                h.resources.mark_buffer_used(buffer, frame.frame_id);
                h.resources.release_buffer(buffer).unwrap();
            }
            h.scheduler.end_frame(&h.device, false).unwrap();
        }

        h.scheduler.drain(&h.device, &mut h.resources).unwrap();
        let stats = h.resources.stats();
        assert_eq!(stats.pending_buffers, 0);
        assert_eq!(stats.pending_images, 0);
        // 只剩下每个槽位的 scratch buffer
        assert_eq!(stats.live_buffers, 3);
        assert_eq!(h.backend.live_buffer_count(), stats.live_buffers + stats.pooled_buffers);
        // transient buffer 都来自空闲列表
        assert!(stats.backend_buffer_allocations <= 4, "{:?}", stats);
        h.finish();
    }

    #[test]
    fn test_end_frame_chains_acquire_and_present() {
        let mut h = Harness::new(2);
        let info = h
            .device
            .create_swapchain(&SwapchainDesc {
                extent: vk::Extent2D {
                    width: 1280,
                    height: 720,
                },
                present_mode: Default::default(),
            })
            .unwrap();

        for _ in 0..6 {
            let frame = h.scheduler.begin_frame(&h.device, &mut h.resources).unwrap();
            let status = h.device.acquire_next_image(frame.image_available, TIMEOUT).unwrap();
            let AcquireStatus::Acquired { image_index, .. } = status else {
                panic!("unexpected {status:?}");
            };
            assert!(image_index < info.image_count);
            h.scheduler.end_frame(&h.device, true).unwrap();
            h.device.present(image_index, frame.render_finished).unwrap();
        }
        assert_eq!(h.backend.presented_images().len(), 6);

        h.scheduler.drain(&h.device, &mut h.resources).unwrap();
        h.device.destroy_swapchain();
        h.finish();
    }
}
