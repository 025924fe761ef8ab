use bytemuck::{Pod, Zeroable};

/// 和 imgui::DrawVert 的内存布局一致：pos, uv, col(rgba8)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct UiVertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
    pub col: [u8; 4],
}

impl From<&imgui::DrawVert> for UiVertex {
    fn from(v: &imgui::DrawVert) -> Self {
        Self {
            pos: v.pos,
            uv: v.uv,
            col: v.col,
        }
    }
}
