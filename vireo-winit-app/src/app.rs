use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::Context;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use vireo_crate_tools::init_log::{init_log, parse_level};
use vireo_crate_tools::resource::VireoPath;
use vireo_gfx::device_context::DeviceContext;
use vireo_gfx::vulkan::SurfaceTarget;
use vireo_renderer::config::RendererConfig;
use vireo_renderer::renderer::{FrameOutcome, Renderer, RendererShaders};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use crate::gui_host::GuiHost;

pub fn panic_handler(info: &std::panic::PanicHookInfo) {
    log::error!("{}", info);
}

/// 每秒移动的距离，每秒旋转的角度
const MOVE_SPEED: f32 = 2.0;
const ROTATE_SPEED: f32 = 60.0;

/// 窗口创建之后才存在的部分
struct RenderContext {
    window: Window,
    device: DeviceContext,
    renderer: Renderer,
}

pub struct VireoApp {
    config: RendererConfig,
    gui_host: GuiHost,
    context: Option<RenderContext>,

    pressed_keys: HashSet<KeyCode>,
    last_frame: Instant,
    presented_frames: u64,
    skipped_frames: u64,

    /// 致命错误，事件循环结束之后返回给 main
    fatal: Option<anyhow::Error>,
}
// 总的 main 函数
impl VireoApp {
    /// 整个程序的入口
    pub fn run() -> anyhow::Result<()> {
        std::panic::set_hook(Box::new(panic_handler));

        let config_path = VireoPath::config_path("vireo.toml");
        let config = RendererConfig::load_or_default(&config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?;
        init_log(parse_level(&config.log_level));
        log::info!("config: {:?}", config);

        let event_loop = EventLoop::new().context("failed to create event loop")?;
        let mut app = Self::new(config);
        let run_result = event_loop.run_app(&mut app);

        log::info!("end run.");
        app.destroy();

        run_result.context("event loop failed")?;
        match app.fatal.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
// new & init
impl VireoApp {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            gui_host: GuiHost::new(),
            context: None,

            pressed_keys: HashSet::new(),
            last_frame: Instant::now(),
            presented_frames: 0,
            skipped_frames: 0,

            fatal: None,
        }
    }

    /// 在 window 创建之后调用，初始化 device 和 renderer
    fn init_after_window(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let window_attr = Window::default_attributes().with_title("Vireo").with_inner_size(
            winit::dpi::PhysicalSize::new(self.config.swapchain.width, self.config.swapchain.height),
        );
        let window = event_loop.create_window(window_attr).context("failed to create window")?;

        let surface = SurfaceTarget {
            display: window.display_handle().context("no display handle")?.as_raw(),
            window: window.window_handle().context("no window handle")?.as_raw(),
        };
        let device = DeviceContext::initialize(&self.config.device, "Vireo", Some(surface))?;

        let root = VireoPath::workspace_path();
        let renderer = RendererShaders::load(&self.config.shader_dir(&root))
            .and_then(|shaders| Renderer::new(&device, &self.config, shaders));
        let mut renderer = match renderer {
            Ok(renderer) => renderer,
            Err(e) => {
                device.destroy();
                return Err(e.into());
            }
        };

        let size = window.inner_size();
        renderer.notify_resized(size.width, size.height);
        self.gui_host.handle_window_event(&WindowEvent::Resized(size));

        self.gui_host.set_hidpi_factor(window.scale_factor());
        let atlas = self.gui_host.init_font();
        renderer.set_font_atlas(atlas.width, atlas.height, atlas.rgba);

        // 场景加载失败不影响程序运行
        if let Some(path) = self.config.scene_path(&root)
            && let Err(e) = renderer.load_scene(&device, &path)
        {
            log::error!("failed to load scene {}: {}", path.display(), e);
        }

        self.context = Some(RenderContext {
            window,
            device,
            renderer,
        });
        Ok(())
    }
}
// update
impl VireoApp {
    fn update_camera(&mut self, delta: Duration) {
        let Some(context) = self.context.as_mut() else {
            return;
        };
        if self.gui_host.wants_keyboard() {
            return;
        }

        let step = MOVE_SPEED * delta.as_secs_f32();
        let angle = ROTATE_SPEED * delta.as_secs_f32();
        let camera = context.renderer.camera_mut();
        for key in &self.pressed_keys {
            match key {
                KeyCode::KeyW => camera.move_forward(step),
                KeyCode::KeyS => camera.move_forward(-step),
                KeyCode::KeyD => camera.move_right(step),
                KeyCode::KeyA => camera.move_right(-step),
                KeyCode::KeyE => camera.move_up(step),
                KeyCode::KeyQ => camera.move_up(-step),
                KeyCode::ArrowLeft => camera.rotate_yaw(angle),
                KeyCode::ArrowRight => camera.rotate_yaw(-angle),
                KeyCode::ArrowUp => camera.rotate_pitch(angle),
                KeyCode::ArrowDown => camera.rotate_pitch(-angle),
                _ => {}
            }
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        let delta = now - self.last_frame;
        self.last_frame = now;
        self.update_camera(delta);

        let Some(context) = self.context.as_mut() else {
            return;
        };

        let camera = context.renderer.camera().clone();
        let extent = context.renderer.swapchain().extent();
        let (presented, skipped) = (self.presented_frames, self.skipped_frames);
        let snapshot = self.gui_host.build_frame(delta, |ui| {
            ui.window("stats")
                .position([10.0, 10.0], imgui::Condition::FirstUseEver)
                .size([260.0, 110.0], imgui::Condition::FirstUseEver)
                .build(|| {
                    ui.text(format!("FPS: {:.2}", 1.0 / delta.as_secs_f32().max(1e-6)));
                    if let Some(extent) = extent {
                        ui.text(format!("size: {}x{}", extent.width, extent.height));
                    }
                    ui.text(format!("frames: {} presented, {} skipped", presented, skipped));
                    ui.text(format!(
                        "CameraPos: ({:.2}, {:.2}, {:.2})",
                        camera.position.x, camera.position.y, camera.position.z
                    ));
                });
        });

        match context.renderer.render_frame(&context.device, Some(&snapshot)) {
            Ok(FrameOutcome::Presented { .. }) => self.presented_frames += 1,
            Ok(FrameOutcome::Skipped) => self.skipped_frames += 1,
            Err(e) if e.is_fatal() => {
                log::error!("fatal render error: {}", e);
                self.fatal = Some(anyhow::Error::new(e).context("render loop terminated"));
                event_loop.exit();
            }
            Err(e) => log::warn!("frame failed: {}", e),
        }
    }

    fn on_keyboard(&mut self, key: KeyCode, state: ElementState) {
        match state {
            ElementState::Pressed => {
                self.pressed_keys.insert(key);
            }
            ElementState::Released => {
                self.pressed_keys.remove(&key);
            }
        }
    }
}
// destroy
impl VireoApp {
    /// 等待所有 in-flight 帧结束，然后按照创建的逆序释放
    fn destroy(&mut self) {
        let Some(RenderContext {
            window,
            device,
            renderer,
        }) = self.context.take()
        else {
            return;
        };

        if let Err(e) = renderer.destroy(&device) {
            log::error!("renderer shutdown: {}", e);
        }
        device.destroy();
        drop(window);
        log::info!(
            "app destroyed: {} frames presented, {} skipped",
            self.presented_frames,
            self.skipped_frames
        );
    }
}
// 各种 winit 的事件处理
impl ApplicationHandler for VireoApp {
    // 建议在这里创建 window 和 Renderer
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        log::info!("winit event: resumed");
        if self.context.is_some() {
            return;
        }
        if let Err(e) = self.init_after_window(event_loop) {
            log::error!("failed to initialize: {:#}", e);
            self.fatal = Some(e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        self.gui_host.handle_window_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                if let Some(context) = self.context.as_mut() {
                    context.renderer.notify_resized(new_size.width, new_size.height);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    if key == KeyCode::Escape {
                        event_loop.exit();
                    }
                    self.on_keyboard(key, event.state);
                }
            }
            WindowEvent::Focused(false) => {
                self.pressed_keys.clear();
            }
            WindowEvent::RedrawRequested => {
                self.redraw(event_loop);
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(context) = &self.context {
            context.window.request_redraw();
        }
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        log::warn!("winit event: suspended");
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        log::info!("loop exiting");
    }
}
