use bytemuck::{Pod, Zeroable};

/// 场景 mesh 的顶点：position, normal, uv
///
/// 与 `VertexLayout::Scene` 以及 shader/scene.vert 的输入一一对应
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SceneVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl SceneVertex {
    pub const STRIDE: usize = std::mem::size_of::<Self>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use vireo_gfx::types::VertexLayout;

    #[test]
    fn test_stride_matches_pipeline_layout() {
        assert_eq!(SceneVertex::STRIDE, 32);
        assert_eq!(SceneVertex::STRIDE as u32, VertexLayout::Scene.stride());
    }
}
