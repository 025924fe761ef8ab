//! Vireo 的窗口程序
//!
//! winit 负责事件循环和窗口，imgui 生成 UI，[`vireo_renderer::renderer::Renderer`] 负责渲染。

pub mod app;
pub mod gui_host;
