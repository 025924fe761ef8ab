use std::fmt::Display;

/// in-flight frame 所在的槽位名字，用于日志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameLabel {
    A,
    B,
    C,
}
impl Display for FrameLabel {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
        }
    }
}
impl FrameLabel {
    /// idx 超出范围时回绕
    #[inline]
    pub fn from_usize(idx: usize) -> Self {
        match idx % 3 {
            0 => Self::A,
            1 => Self::B,
            _ => Self::C,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::C => 2,
        }
    }
}

pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
    /// in-flight 的帧数，2 或者 3
    fif_count: usize,
}
// new & init
impl FrameCounter {
    pub const MIN_FIF_COUNT: usize = 2;
    pub const MAX_FIF_COUNT: usize = 3;

    pub fn new(init_frame_id: u64, fif_count: usize) -> Self {
        debug_assert!((Self::MIN_FIF_COUNT..=Self::MAX_FIF_COUNT).contains(&fif_count));
        Self {
            frame_id: init_frame_id,
            fif_count: fif_count.clamp(Self::MIN_FIF_COUNT, Self::MAX_FIF_COUNT),
        }
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl FrameCounter {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub fn fif_count(&self) -> usize {
        self.fif_count
    }
    /// 当前帧使用的槽位
    #[inline]
    pub fn slot(&self) -> usize {
        (self.frame_id % self.fif_count as u64) as usize
    }
    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        FrameLabel::from_usize(self.slot())
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_cycles_through_labels() {
        let mut counter = FrameCounter::new(0, 3);
        let labels = (0..6)
            .map(|_| {
                let label = counter.frame_label();
                counter.next_frame();
                label
            })
            .collect::<Vec<_>>();
        assert_eq!(labels, vec![FrameLabel::A, FrameLabel::B, FrameLabel::C, FrameLabel::A, FrameLabel::B, FrameLabel::C]);
        assert_eq!(counter.frame_id(), 6);
    }

    #[test]
    fn test_double_buffering() {
        let mut counter = FrameCounter::new(5, 2);
        assert_eq!(counter.slot(), 1);
        counter.next_frame();
        assert_eq!(counter.slot(), 0);
        assert_eq!(counter.frame_name(), "[F6A]");
    }

    #[test]
    fn test_wrapping() {
        let mut counter = FrameCounter::new(u64::MAX, 3);
        counter.next_frame();
        assert_eq!(counter.frame_id(), 0);
    }
}
