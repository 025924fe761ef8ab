//! imgui 的渲染后端
//!
//! 参考 imgui-rs-vulkan-renderer：每帧把 draw data 拷贝成 [`draw_snapshot::UiDrawSnapshot`]，
//! 几何数据写入 resource manager 的 per-frame scratch buffer，绘制命令追加到当前帧的 command buffer。

pub mod draw_snapshot;
pub mod ui_overlay_bridge;
pub mod ui_vertex;
