use vireo_gfx::handles::{RawCommandBuffer, RawSemaphore};

use crate::frame_counter::FrameLabel;

/// 当前正在录制的帧
///
/// 由 frame scheduler 在 begin_frame 时给出，scene pass 和 UI bridge 都向同一个 command buffer 录制命令。
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    /// 环形队列中的槽位
    pub slot: usize,
    pub label: FrameLabel,
    pub frame_id: u64,
    pub cmd: RawCommandBuffer,
    pub image_available: RawSemaphore,
    pub render_finished: RawSemaphore,
}

impl FrameInfo {
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.label)
    }
}
