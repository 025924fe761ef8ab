use std::path::Path;

use ash::vk;
use vireo_gfx::commands::{GfxCommand, ImageRef};
use vireo_gfx::device_context::DeviceContext;
use vireo_gfx::error::{GfxError, GfxResult};
use vireo_gfx::shader::ShaderPair;
use vireo_gfx::types::{ImageDesc, PresentStatus};
use vireo_gui_backend::draw_snapshot::UiDrawSnapshot;
use vireo_gui_backend::ui_overlay_bridge::{UiDrawStats, UiOverlayBridge};
use vireo_render_interface::frame_info::FrameInfo;
use vireo_render_interface::gpu_resource_manager::GpuResourceManager;
use vireo_render_interface::handles::GpuImageHandle;
use vireo_scene::error::SceneResult;
use vireo_scene::gltf_loader::{SceneLoadConfig, SceneLoader};
use vireo_scene::scene::Scene;

use crate::camera::Camera;
use crate::config::RendererConfig;
use crate::frame_scheduler::FrameScheduler;
use crate::scene_pass::ScenePass;
use crate::swapchain_coordinator::{SwapchainCoordinator, SwapchainState};

/// renderer 需要的所有 shader
#[derive(Debug, Clone, Default)]
pub struct RendererShaders {
    pub scene: ShaderPair,
    pub ui: ShaderPair,
}

impl RendererShaders {
    /// 从目录中读取 `{name}.spv`
    pub fn load(dir: &Path) -> GfxResult<Self> {
        let spv = |name: &str| dir.join(format!("{name}.spv"));
        Ok(Self {
            scene: ShaderPair::load(&spv("scene.vert"), &spv("scene.frag"))?,
            ui: ShaderPair::load(&spv("imgui.vert"), &spv("imgui.frag"))?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub scene_draws: usize,
    pub ui: UiDrawStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented {
        frame_id: u64,
        image_index: u32,
        present: PresentStatus,
        stats: FrameStats,
    },
    /// swapchain 过期或者窗口最小化，本帧没有提交
    Skipped,
}

struct FontAtlas {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
    uploaded: bool,
}

/// 录制之前的状态，录制失败时恢复
#[derive(Debug, Clone, Copy)]
struct FrameRollback {
    swapchain_layout: vk::ImageLayout,
    depth_layout: Option<vk::ImageLayout>,
    font_pending: bool,
}

/// 每帧：等待 fence -> acquire -> scene pass -> UI overlay -> submit -> present
///
/// 所有的 GPU 对象都通过参数中的 `DeviceContext` 创建，renderer 本身不持有 device。
pub struct Renderer {
    swapchain: SwapchainCoordinator,
    scheduler: FrameScheduler,
    resources: GpuResourceManager,

    shaders: RendererShaders,
    /// passes 的 pipeline 使用的 color format
    target_format: Option<vk::Format>,
    scene_pass: Option<ScenePass>,
    ui_bridge: Option<UiOverlayBridge>,
    font_atlas: Option<FontAtlas>,

    depth_format: vk::Format,
    depth: Option<GpuImageHandle>,

    scene: Option<Scene>,
    scene_load_config: SceneLoadConfig,
    camera: Camera,
    clear_color: [f32; 4],
    fallback_extent: vk::Extent2D,
}

// new & init
impl Renderer {
    pub fn new(device: &DeviceContext, config: &RendererConfig, shaders: RendererShaders) -> GfxResult<Self> {
        let depth_format = device
            .find_depth_format()
            .ok_or_else(|| GfxError::InvalidState("no supported depth format".to_string()))?;
        let scheduler = FrameScheduler::new(device, config.frame.frames_in_flight, config.fence_timeout())?;

        let mut camera = Camera::default();
        camera.set_aspect(config.swapchain.width, config.swapchain.height);

        let mut renderer = Self {
            swapchain: SwapchainCoordinator::new(config.swapchain.present_mode, config.fence_timeout()),
            scheduler,
            resources: GpuResourceManager::new(config.resource_manager_config()),

            shaders,
            target_format: None,
            scene_pass: None,
            ui_bridge: None,
            font_atlas: None,

            depth_format,
            depth: None,

            scene: None,
            scene_load_config: config.scene_load_config(),
            camera,
            clear_color: config.swapchain.clear_color,
            fallback_extent: config.window_extent(),
        };

        if device.has_surface()
            && let Err(e) = renderer.ensure_swapchain(device)
        {
            if let Err(destroy_err) = renderer.destroy(device) {
                log::error!("failed to clean up renderer: {}", destroy_err);
            }
            return Err(e);
        }
        Ok(renderer)
    }

    /// 加载场景并替换当前场景，相机对准新场景的包围盒
    pub fn load_scene(&mut self, device: &DeviceContext, path: &Path) -> SceneResult<()> {
        let loader = SceneLoader::new(self.scene_load_config)?;
        let scene = loader.load_file(device, &mut self.resources, path, self.scheduler.frame_id())?;
        self.set_scene(scene)?;
        Ok(())
    }

    pub fn load_scene_slice(&mut self, device: &DeviceContext, bytes: &[u8]) -> SceneResult<()> {
        let loader = SceneLoader::new(self.scene_load_config)?;
        let scene = loader.load_slice(device, &mut self.resources, bytes, None, self.scheduler.frame_id())?;
        self.set_scene(scene)?;
        Ok(())
    }

    fn set_scene(&mut self, scene: Scene) -> GfxResult<()> {
        for warning in scene.warnings() {
            log::warn!("scene: {:?}", warning);
        }
        if let Some((min, max)) = scene.world_bounds() {
            self.camera.frame_bounds(min, max);
        }
        log::info!(
            "scene ready: {} nodes, {} meshes, {} materials",
            scene.nodes().len(),
            scene.meshes().len(),
            scene.materials().len()
        );
        // 旧场景的 buffer 可能仍被 in-flight 帧引用，release 之后由 GC 延迟回收
        match self.scene.replace(scene) {
            Some(old) => old.release(&mut self.resources),
            None => Ok(()),
        }
    }

    /// imgui 的 font atlas（RGBA32），会在下一帧的 command buffer 中上传
    pub fn set_font_atlas(&mut self, width: u32, height: u32, rgba: Vec<u8>) {
        self.font_atlas = Some(FontAtlas {
            width,
            height,
            rgba,
            uploaded: false,
        });
    }
}
// getters
impl Renderer {
    #[inline]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    #[inline]
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    #[inline]
    pub fn swapchain(&self) -> &SwapchainCoordinator {
        &self.swapchain
    }

    #[inline]
    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    #[inline]
    pub fn resources(&self) -> &GpuResourceManager {
        &self.resources
    }

    #[inline]
    pub fn resources_mut(&mut self) -> &mut GpuResourceManager {
        &mut self.resources
    }

    #[inline]
    pub fn scene(&self) -> Option<&Scene> {
        self.scene.as_ref()
    }

    #[inline]
    pub fn depth_image(&self) -> Option<GpuImageHandle> {
        self.depth
    }
}
// update
impl Renderer {
    /// 窗口尺寸变化，swapchain 在下一帧开始前重建
    pub fn notify_resized(&mut self, width: u32, height: u32) {
        self.swapchain.notify_resized(vk::Extent2D { width, height });
        self.camera.set_aspect(width, height);
    }

    /// swapchain 不可用时尝试重建，返回 false 表示暂时无法渲染（例如窗口最小化）
    fn ensure_swapchain(&mut self, device: &DeviceContext) -> GfxResult<bool> {
        if self.swapchain.state() == SwapchainState::Ready {
            return Ok(true);
        }

        let extent = self.swapchain.desired_extent().unwrap_or(self.fallback_extent);
        let info = match self.swapchain.recreate(device, extent) {
            Ok(info) => info,
            Err(e) if e.is_swapchain_out_of_date() => return Ok(false),
            Err(e) => return Err(e),
        };
        self.camera.set_aspect(info.extent.width, info.extent.height);

        if self.target_format != Some(info.format) {
            self.rebuild_passes(device, info.format)?;
        }

        // depth 和 swapchain 保持同样的尺寸
        if let Some(old) = self.depth.take() {
            self.resources.release_image(old)?;
        }
        let depth_desc = ImageDesc::depth_attachment(info.extent, self.depth_format);
        self.depth = Some(self.resources.allocate_image(device, &depth_desc, "depth")?);
        Ok(true)
    }

    fn rebuild_passes(&mut self, device: &DeviceContext, color_format: vk::Format) -> GfxResult<()> {
        if let Some(pass) = self.scene_pass.take() {
            pass.destroy(device);
        }
        if let Some(bridge) = self.ui_bridge.take() {
            bridge.destroy(device, &mut self.resources)?;
        }
        if let Some(font_atlas) = &mut self.font_atlas {
            font_atlas.uploaded = false;
        }

        self.scene_pass = Some(ScenePass::new(device, &self.shaders.scene, color_format, self.depth_format)?);
        self.ui_bridge = Some(UiOverlayBridge::new(device, &self.shaders.ui, color_format)?);
        self.target_format = Some(color_format);
        log::info!("render passes built for {:?}", color_format);
        Ok(())
    }
}
// draw
impl Renderer {
    /// 渲染并呈现一帧
    ///
    /// swapchain 过期时放弃本帧并返回 `Skipped`，下一次调用会重建 swapchain。
    /// `DeviceLost` 等致命错误直接返回，调用方应当停止渲染。
    /// 录制失败（例如 scratch 内存不足）时本帧只清屏并照常 present，然后返回录制的错误。
    pub fn render_frame(&mut self, device: &DeviceContext, ui: Option<&UiDrawSnapshot>) -> GfxResult<FrameOutcome> {
        if !device.has_surface() {
            return Err(GfxError::InvalidState("render_frame without surface".to_string()));
        }
        if !self.ensure_swapchain(device)? {
            return Ok(FrameOutcome::Skipped);
        }

        let frame = self.scheduler.begin_frame(device, &mut self.resources)?;
        let acquired = match self.swapchain.acquire_next(device, frame.image_available) {
            Ok(acquired) => acquired,
            Err(e) => {
                self.scheduler.abandon_frame(device)?;
                if e.is_swapchain_out_of_date() {
                    log::debug!("{} skipped: swapchain out of date", frame.frame_name());
                    return Ok(FrameOutcome::Skipped);
                }
                return Err(e);
            }
        };

        let rollback = FrameRollback {
            swapchain_layout: self.swapchain.image_layout(acquired.image_index).unwrap_or(vk::ImageLayout::UNDEFINED),
            depth_layout: self.depth.and_then(|depth| self.resources.image_layout(depth)),
            font_pending: self.font_atlas.as_ref().is_some_and(|font_atlas| !font_atlas.uploaded),
        };
        // acquire 之后这一帧必须提交并 present，录制失败时只清屏
        let (stats, record_error) = match self.record_frame(device, &frame, acquired.image_index, ui) {
            Ok(stats) => (stats, None),
            Err(e) => {
                log::warn!("{} recording failed, presenting a cleared image: {}", frame.frame_name(), e);
                if let Err(rollback_err) = self.record_cleared_frame(device, &frame, acquired.image_index, rollback) {
                    self.scheduler.abandon_frame(device)?;
                    return Err(rollback_err);
                }
                (FrameStats::default(), Some(e))
            }
        };

        let frame_id = self.scheduler.end_frame(device, true)?;
        let present = self.swapchain.present(device, acquired.image_index, frame.render_finished)?;
        if let Some(e) = record_error {
            return Err(e);
        }
        Ok(FrameOutcome::Presented {
            frame_id,
            image_index: acquired.image_index,
            present,
            stats,
        })
    }

    fn record_frame(
        &mut self,
        device: &DeviceContext,
        frame: &FrameInfo,
        image_index: u32,
        ui: Option<&UiDrawSnapshot>,
    ) -> GfxResult<FrameStats> {
        let extent = self.swapchain.extent().ok_or_else(|| GfxError::InvalidState("no swapchain".to_string()))?;
        let depth = self.depth.ok_or_else(|| GfxError::InvalidState("no depth image".to_string()))?;
        let depth_raw = self.resources.image_raw(depth).ok_or(GfxError::InvalidHandle("depth image"))?;
        let encoder = device.encoder(frame.cmd);

        // font atlas 的上传必须在 rendering 之外
        if let (Some(bridge), Some(font_atlas)) = (self.ui_bridge.as_mut(), self.font_atlas.as_mut())
            && !font_atlas.uploaded
        {
            bridge.register_font_atlas(
                device,
                &mut self.resources,
                &encoder,
                frame.frame_id,
                font_atlas.width,
                font_atlas.height,
                &font_atlas.rgba,
            )?;
            font_atlas.uploaded = true;
        }

        self.swapchain.transition_image(&encoder, image_index, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)?;
        self.resources.transition_image(&encoder, depth, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL, frame.frame_id)?;

        encoder.push(GfxCommand::BeginRendering {
            color: ImageRef::Swapchain(image_index),
            clear_color: Some(self.clear_color),
            depth: Some(depth_raw),
            clear_depth: Some(1.0),
            extent,
        });

        let mut stats = FrameStats::default();
        if let (Some(pass), Some(scene)) = (&self.scene_pass, &self.scene) {
            stats.scene_draws =
                pass.record(device, &mut self.resources, frame, scene, self.camera.view_projection(), extent)?;
        }
        if let (Some(bridge), Some(snapshot)) = (&self.ui_bridge, ui) {
            stats.ui = bridge.record(device, &mut self.resources, frame, snapshot, extent)?;
        }

        encoder.push(GfxCommand::EndRendering);
        self.swapchain.transition_image(&encoder, image_index, vk::ImageLayout::PRESENT_SRC_KHR)?;
        Ok(stats)
    }

    /// 丢弃本帧录制的命令，恢复录制过程中改动的 layout 和 font atlas 状态，然后只清屏
    fn record_cleared_frame(
        &mut self,
        device: &DeviceContext,
        frame: &FrameInfo,
        image_index: u32,
        rollback: FrameRollback,
    ) -> GfxResult<()> {
        self.scheduler.restart_commands(device)?;
        self.swapchain.reset_image_layout(image_index, rollback.swapchain_layout)?;
        if let (Some(depth), Some(layout)) = (self.depth, rollback.depth_layout) {
            self.resources.reset_image_layout(depth, layout)?;
        }
        // 本帧注册的 atlas 没有真正上传，下一帧重新注册会替换掉它
        if rollback.font_pending
            && let Some(font_atlas) = self.font_atlas.as_mut()
        {
            font_atlas.uploaded = false;
        }

        let extent = self.swapchain.extent().ok_or_else(|| GfxError::InvalidState("no swapchain".to_string()))?;
        let encoder = device.encoder(frame.cmd);
        self.swapchain.transition_image(&encoder, image_index, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)?;
        encoder.push(GfxCommand::BeginRendering {
            color: ImageRef::Swapchain(image_index),
            clear_color: Some(self.clear_color),
            depth: None,
            clear_depth: None,
            extent,
        });
        encoder.push(GfxCommand::EndRendering);
        self.swapchain.transition_image(&encoder, image_index, vk::ImageLayout::PRESENT_SRC_KHR)?;
        Ok(())
    }
}
// destroy
impl Renderer {
    /// 等待所有帧完成之后释放全部资源
    ///
    /// 设备丢失时 drain 会失败，之后的释放照常进行。
    pub fn destroy(self, device: &DeviceContext) -> GfxResult<()> {
        let Self {
            mut swapchain,
            mut scheduler,
            mut resources,
            scene_pass,
            ui_bridge,
            depth,
            scene,
            ..
        } = self;

        let drained = scheduler.drain(device, &mut resources);
        if let Err(e) = &drained {
            log::error!("renderer drain failed: {}", e);
        }

        if let Some(scene) = scene
            && let Err(e) = scene.release(&mut resources)
        {
            log::error!("failed to release scene: {}", e);
        }
        if let Some(bridge) = ui_bridge
            && let Err(e) = bridge.destroy(device, &mut resources)
        {
            log::error!("failed to destroy ui overlay: {}", e);
        }
        if let Some(pass) = scene_pass {
            pass.destroy(device);
        }
        if let Some(depth) = depth
            && let Err(e) = resources.release_image(depth)
        {
            log::error!("failed to release depth image: {}", e);
        }

        swapchain.destroy(device);
        scheduler.destroy(device);
        resources.destroy(device);
        log::info!("renderer destroyed");
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vireo_gfx::adapter::DevicePreferences;
    use vireo_gfx::headless::{HeadlessBackend, HeadlessConfig};
    use vireo_gui_backend::draw_snapshot::{UiDrawCommand, UiDrawList};
    use vireo_gui_backend::ui_vertex::UiVertex;

    use crate::scene_pass::tests::TRIANGLE_GLTF;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn setup(config: &RendererConfig) -> (HeadlessBackend, DeviceContext, Renderer) {
        setup_with_backend(HeadlessBackend::with_defaults().unwrap(), config)
    }

    fn setup_with_backend(
        backend: HeadlessBackend,
        config: &RendererConfig,
    ) -> (HeadlessBackend, DeviceContext, Renderer) {
        let device = DeviceContext::from_backend(Box::new(backend.clone()));
        let renderer = Renderer::new(&device, config, RendererShaders::default()).unwrap();
        (backend, device, renderer)
    }

    fn teardown(backend: &HeadlessBackend, device: DeviceContext, renderer: Renderer) {
        renderer.destroy(&device).unwrap();
        device.destroy();
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.live_image_count(), 0);
        assert!(backend.violations().is_empty(), "{:?}", backend.violations());
    }

    /// 一个全屏的矩形
    fn quad_snapshot(width: f32, height: f32) -> UiDrawSnapshot {
        let vertex = |x: f32, y: f32| UiVertex {
            pos: [x, y],
            uv: [0.0, 0.0],
            col: [255; 4],
        };
        UiDrawSnapshot {
            display_pos: [0.0, 0.0],
            display_size: [width, height],
            framebuffer_scale: [1.0, 1.0],
            lists: vec![UiDrawList {
                vertices: vec![vertex(0.0, 0.0), vertex(width, 0.0), vertex(width, height), vertex(0.0, height)],
                indices: vec![0, 1, 2, 0, 2, 3],
                commands: vec![UiDrawCommand {
                    clip_rect: [0.0, 0.0, width, height],
                    texture_id: 0,
                    vtx_offset: 0,
                    idx_offset: 0,
                    count: 6,
                }],
            }],
        }
    }

    /// 顶点数据大约 2MB
    fn huge_snapshot() -> UiDrawSnapshot {
        let vertex = UiVertex {
            pos: [0.0, 0.0],
            uv: [0.0, 0.0],
            col: [255; 4],
        };
        UiDrawSnapshot {
            display_pos: [0.0, 0.0],
            display_size: [1280.0, 720.0],
            framebuffer_scale: [1.0, 1.0],
            lists: vec![UiDrawList {
                vertices: vec![vertex; 100_000],
                indices: vec![0, 1, 2],
                commands: vec![UiDrawCommand {
                    clip_rect: [0.0, 0.0, 1280.0, 720.0],
                    texture_id: 0,
                    vtx_offset: 0,
                    idx_offset: 0,
                    count: 3,
                }],
            }],
        }
    }

    #[test]
    fn test_new_creates_swapchain_and_depth() {
        let (backend, device, renderer) = setup(&RendererConfig::default());
        assert_eq!(renderer.swapchain().state(), SwapchainState::Ready);
        assert_eq!(renderer.swapchain().extent(), Some(extent(1280, 720)));

        let depth = renderer.depth_image().unwrap();
        let desc = renderer.resources().image_desc(depth).unwrap();
        assert_eq!(desc.extent, extent(1280, 720));
        assert_eq!(desc.format, vk::Format::D32_SFLOAT);
        teardown(&backend, device, renderer);
    }

    #[test]
    fn test_frame_records_scene_and_ui() {
        let (backend, device, mut renderer) = setup(&RendererConfig::default());
        renderer.load_scene_slice(&device, TRIANGLE_GLTF.as_bytes()).unwrap();
        renderer.set_font_atlas(2, 2, vec![255; 16]);

        let snapshot = quad_snapshot(1280.0, 720.0);
        let outcome = renderer.render_frame(&device, Some(&snapshot)).unwrap();
        let FrameOutcome::Presented {
            image_index, stats, ..
        } = outcome
        else {
            panic!("frame skipped");
        };
        assert_eq!(stats.scene_draws, 2);
        assert_eq!(stats.ui.draw_calls, 1);
        assert_eq!(backend.presented_images(), vec![image_index]);
        assert!(renderer.resources().image_layout(renderer.depth_image().unwrap()).is_some());

        // 第二帧不再上传 font atlas
        let images_before = backend.total_image_allocations();
        renderer.render_frame(&device, Some(&snapshot)).unwrap();
        assert_eq!(backend.total_image_allocations(), images_before);
        teardown(&backend, device, renderer);
    }

    #[test]
    fn test_long_run_with_resizes_does_not_leak() {
        let (backend, device, mut renderer) = setup(&RendererConfig::default());
        renderer.load_scene_slice(&device, TRIANGLE_GLTF.as_bytes()).unwrap();
        renderer.set_font_atlas(2, 2, vec![255; 16]);

        let mut presented = 0;
        let mut skipped = 0;
        for i in 0..1000 {
            if i == 300 {
                // windowing 层通知的 resize
                backend.set_surface_extent(Some(extent(800, 600)));
                renderer.notify_resized(800, 600);
            }
            if i == 600 {
                // 没有 resize 事件，presentation engine 直接报告过期
                backend.set_surface_extent(Some(extent(1024, 768)));
            }
            if i == 800 {
                backend.mark_next_acquire_suboptimal();
            }

            let size = renderer.swapchain().extent().unwrap_or(extent(1, 1));
            let snapshot = quad_snapshot(size.width as f32, size.height as f32);
            match renderer.render_frame(&device, Some(&snapshot)).unwrap() {
                FrameOutcome::Presented { .. } => presented += 1,
                FrameOutcome::Skipped => skipped += 1,
            }
            assert!(renderer.scheduler().in_flight_count(&device).unwrap() <= 3);
        }
        assert!(skipped >= 1);
        assert_eq!(presented + skipped, 1000);
        assert_eq!(renderer.swapchain().extent(), Some(extent(1024, 768)));
        let depth = renderer.depth_image().unwrap();
        assert_eq!(renderer.resources().image_desc(depth).unwrap().extent, extent(1024, 768));

        // 每个 slot 一个 scratch buffer，长时间运行之后不再增长
        let stats = renderer.resources().stats();
        assert!(stats.backend_buffer_allocations < 64, "{:?}", stats);
        assert_eq!(stats.pending_images, 0, "{:?}", stats);
        teardown(&backend, device, renderer);
    }

    #[test]
    fn test_record_failure_after_acquire_presents_cleared_image() {
        let backend = HeadlessBackend::new(
            HeadlessConfig {
                host_visible_budget: 1024 * 1024,
                ..Default::default()
            },
            &DevicePreferences::default(),
        )
        .unwrap();
        let (backend, device, mut renderer) = setup_with_backend(backend, &RendererConfig::default());
        renderer.load_scene_slice(&device, TRIANGLE_GLTF.as_bytes()).unwrap();
        renderer.set_font_atlas(2, 2, vec![255; 16]);
        let depth = renderer.depth_image().unwrap();

        // UI 的 scratch buffer 无法增长
        let err = renderer.render_frame(&device, Some(&huge_snapshot())).unwrap_err();
        assert!(matches!(err, GfxError::OutOfDeviceMemory { .. }), "{:?}", err);
        assert!(!err.is_fatal());

        // acquire 到的 image 仍然被提交并 present
        let presented = backend.presented_images();
        assert_eq!(presented.len(), 1);
        assert_eq!(backend.acquired_image_count(), 0);
        assert_eq!(renderer.scheduler().last_submitted(), Some(1));
        assert_eq!(renderer.swapchain().image_layout(presented[0]), Some(vk::ImageLayout::PRESENT_SRC_KHR));
        assert_eq!(renderer.resources().image_layout(depth), Some(vk::ImageLayout::UNDEFINED));
        assert!(!renderer.font_atlas.as_ref().unwrap().uploaded);
        assert!(backend.violations().is_empty(), "{:?}", backend.violations());

        let snapshot = quad_snapshot(1280.0, 720.0);
        for _ in 0..renderer.scheduler().fif_count() + 2 {
            let outcome = renderer.render_frame(&device, Some(&snapshot)).unwrap();
            let FrameOutcome::Presented { stats, .. } = outcome else {
                panic!("frame skipped");
            };
            assert_eq!(stats.scene_draws, 2);
            assert_eq!(stats.ui.draw_calls, 1);
            assert_eq!(backend.acquired_image_count(), 0);
        }
        assert!(renderer.font_atlas.as_ref().unwrap().uploaded);
        assert_eq!(renderer.resources().image_layout(depth), Some(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL));
        assert_eq!(backend.presented_images().len(), renderer.scheduler().fif_count() + 3);
        teardown(&backend, device, renderer);
    }

    #[test]
    fn test_minimized_window_skips_frames() {
        let (backend, device, mut renderer) = setup(&RendererConfig::default());

        backend.set_surface_extent(Some(extent(0, 0)));
        renderer.notify_resized(0, 0);
        for _ in 0..5 {
            assert_eq!(renderer.render_frame(&device, None).unwrap(), FrameOutcome::Skipped);
        }
        assert_eq!(renderer.swapchain().state(), SwapchainState::Stale);

        backend.set_surface_extent(Some(extent(640, 480)));
        renderer.notify_resized(640, 480);
        assert!(matches!(renderer.render_frame(&device, None).unwrap(), FrameOutcome::Presented { .. }));
        assert_eq!(renderer.swapchain().extent(), Some(extent(640, 480)));
        teardown(&backend, device, renderer);
    }

    #[test]
    fn test_hung_device_is_fatal() {
        let mut config = RendererConfig::default();
        config.frame.frames_in_flight = 2;
        config.frame.fence_timeout_ms = 10;
        let (backend, device, mut renderer) = setup(&config);

        backend.set_hang(true);
        let err = (0..10)
            .find_map(|_| renderer.render_frame(&device, None).err())
            .expect("hung device must be reported");
        assert!(matches!(err, GfxError::DeviceLost));
        assert!(err.is_fatal());

        backend.set_hang(false);
        teardown(&backend, device, renderer);
    }

    #[test]
    fn test_replace_scene_releases_old_buffers() {
        let (backend, device, mut renderer) = setup(&RendererConfig::default());
        renderer.load_scene_slice(&device, TRIANGLE_GLTF.as_bytes()).unwrap();
        for _ in 0..4 {
            renderer.render_frame(&device, None).unwrap();
        }
        let live = renderer.resources().stats().live_buffers;

        renderer.load_scene_slice(&device, TRIANGLE_GLTF.as_bytes()).unwrap();
        for _ in 0..4 {
            renderer.render_frame(&device, None).unwrap();
        }
        assert_eq!(renderer.resources().stats().live_buffers, live);
        teardown(&backend, device, renderer);
    }
}
