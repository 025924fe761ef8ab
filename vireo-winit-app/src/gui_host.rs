use std::time::Duration;

use vireo_gui_backend::draw_snapshot::UiDrawSnapshot;
use vireo_gui_backend::ui_overlay_bridge::FONT_TEXTURE_ID;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};

/// font atlas 的像素数据，RGBA32
pub struct FontAtlasPixels {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// imgui context 以及窗口事件到 imgui io 的转发
///
/// display size 使用物理像素，framebuffer scale 固定为 1
pub struct GuiHost {
    imgui_ctx: imgui::Context,
    hidpi_factor: f64,
}
// new & init
impl Default for GuiHost {
    fn default() -> Self {
        Self::new()
    }
}

impl GuiHost {
    pub fn new() -> Self {
        let mut imgui_ctx = imgui::Context::create();
        // disable automatic saving .ini file
        imgui_ctx.set_ini_filename(None);

        // theme
        {
            let style = imgui_ctx.style_mut();
            style.use_dark_colors();
            // WindowBg: 半透明深色背景
            style.colors[imgui::StyleColor::WindowBg as usize] = [0.1, 0.1, 0.1, 0.9];
        }

        imgui_ctx.io_mut().display_size = [800.0, 600.0];
        imgui_ctx.io_mut().display_framebuffer_scale = [1.0, 1.0];

        Self {
            imgui_ctx,
            hidpi_factor: 1.0,
        }
    }

    pub fn set_hidpi_factor(&mut self, hidpi_factor: f64) {
        self.hidpi_factor = hidpi_factor;
    }

    /// 构建 font atlas，返回的像素需要交给 renderer 上传
    pub fn init_font(&mut self) -> FontAtlasPixels {
        let font_size = (13.0 * self.hidpi_factor) as f32;
        self.imgui_ctx.fonts().add_font(&[imgui::FontSource::DefaultFontData {
            config: Some(imgui::FontConfig {
                size_pixels: font_size,
                ..Default::default()
            }),
        }]);
        self.imgui_ctx.fonts().tex_id = imgui::TextureId::new(FONT_TEXTURE_ID);
        self.imgui_ctx.io_mut().font_global_scale = 1.0;

        let fonts = self.imgui_ctx.fonts();
        let atlas_texture = fonts.build_rgba32_texture();
        FontAtlasPixels {
            width: atlas_texture.width,
            height: atlas_texture.height,
            rgba: atlas_texture.data.to_vec(),
        }
    }
}
// getters
impl GuiHost {
    #[inline]
    pub fn wants_mouse(&self) -> bool {
        self.imgui_ctx.io().want_capture_mouse
    }

    #[inline]
    pub fn wants_keyboard(&self) -> bool {
        self.imgui_ctx.io().want_capture_keyboard
    }

    #[inline]
    pub fn display_size(&self) -> [f32; 2] {
        self.imgui_ctx.io().display_size
    }
}
// update
impl GuiHost {
    pub fn handle_window_event(&mut self, event: &WindowEvent) {
        let io = self.imgui_ctx.io_mut();
        match event {
            WindowEvent::Resized(size) => {
                io.display_size = [size.width as f32, size.height as f32];
            }
            WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                self.hidpi_factor = *scale_factor;
            }
            WindowEvent::CursorMoved { position, .. } => {
                io.add_mouse_pos_event([position.x as f32, position.y as f32]);
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let button = match button {
                    MouseButton::Left => Some(imgui::MouseButton::Left),
                    MouseButton::Right => Some(imgui::MouseButton::Right),
                    MouseButton::Middle => Some(imgui::MouseButton::Middle),
                    _ => None,
                };
                if let Some(button) = button {
                    io.add_mouse_button_event(button, *state == ElementState::Pressed);
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let (h, v) = match delta {
                    MouseScrollDelta::LineDelta(h, v) => (*h, *v),
                    // 按照一行 20 像素换算
                    MouseScrollDelta::PixelDelta(pos) => (pos.x as f32 / 20.0, pos.y as f32 / 20.0),
                };
                io.add_mouse_wheel_event([h, v]);
            }
            _ => {}
        }
    }

    /// 构建一帧 UI，并把 draw data 拷贝出来交给 renderer
    pub fn build_frame(&mut self, delta: Duration, ui_func: impl FnOnce(&imgui::Ui)) -> UiDrawSnapshot {
        self.imgui_ctx.io_mut().update_delta_time(delta);
        let ui = self.imgui_ctx.new_frame();
        ui_func(ui);
        UiDrawSnapshot::from(self.imgui_ctx.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::PhysicalSize;

    #[test]
    fn test_font_atlas_is_rgba32() {
        let mut host = GuiHost::new();
        let atlas = host.init_font();
        assert!(atlas.width > 0 && atlas.height > 0);
        assert_eq!(atlas.rgba.len(), (atlas.width * atlas.height * 4) as usize);
    }

    #[test]
    fn test_build_frame_after_resize() {
        let mut host = GuiHost::new();
        host.init_font();
        host.handle_window_event(&WindowEvent::Resized(PhysicalSize::new(640, 480)));
        assert_eq!(host.display_size(), [640.0, 480.0]);

        let snapshot = host.build_frame(Duration::from_millis(16), |ui| {
            ui.window("stats")
                .position([10.0, 10.0], imgui::Condition::Always)
                .size([200.0, 80.0], imgui::Condition::Always)
                .build(|| ui.text("frame 1"));
        });
        assert_eq!(snapshot.display_size, [640.0, 480.0]);
        assert!(!snapshot.is_empty());
        assert!(snapshot.lists.iter().flat_map(|list| &list.commands).all(|command| command.texture_id == FONT_TEXTURE_ID));
    }
}
