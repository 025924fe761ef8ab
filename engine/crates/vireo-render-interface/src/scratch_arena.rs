use vireo_gfx::handles::RawBuffer;

use crate::handles::GpuBufferHandle;

/// 从 scratch arena 中分配出的一段空间，只在当前帧有效
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchAllocation {
    pub buffer: GpuBufferHandle,
    pub raw: RawBuffer,
    pub offset: u64,
    pub size: u64,
}

/// 每个 frame slot 一个的 bump allocator
///
/// slot 被复用时（对应的 fence 已经 signal）整体 reset。
#[derive(Debug, Default)]
pub struct ScratchArena {
    pub(crate) buffer: Option<GpuBufferHandle>,
    capacity: u64,
    offset: u64,
}

impl ScratchArena {
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn used(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// 在当前 buffer 中分配，空间不足时返回 None
    pub fn try_bump(&mut self, size: u64, align: u64) -> Option<u64> {
        self.buffer?;
        let align = align.max(1);
        let start = self.offset.div_ceil(align) * align;
        let end = start.checked_add(size)?;
        if end > self.capacity {
            return None;
        }
        self.offset = end;
        Some(start)
    }

    /// 容量不足时新 buffer 的大小：至少翻倍，并且足够容纳本次分配
    pub fn grown_capacity(&self, size: u64, initial: u64) -> u64 {
        let base = if self.capacity == 0 { initial } else { self.capacity * 2 };
        base.max(size).next_power_of_two()
    }

    /// 换成新的 buffer，返回旧的 buffer（需要由调用方延迟释放）
    pub(crate) fn replace(&mut self, buffer: GpuBufferHandle, capacity: u64) -> Option<GpuBufferHandle> {
        self.capacity = capacity;
        self.offset = 0;
        self.buffer.replace(buffer)
    }

    pub(crate) fn take(&mut self) -> Option<GpuBufferHandle> {
        self.capacity = 0;
        self.offset = 0;
        self.buffer.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_bump_and_reset() {
        let mut handles: SlotMap<GpuBufferHandle, ()> = SlotMap::with_key();
        let mut arena = ScratchArena::default();
        assert_eq!(arena.try_bump(16, 4), None);

        arena.replace(handles.insert(()), 64);
        assert_eq!(arena.try_bump(10, 4), Some(0));
        assert_eq!(arena.try_bump(10, 4), Some(12));
        assert_eq!(arena.try_bump(64, 4), None);
        assert_eq!(arena.used(), 22);

        arena.reset();
        assert_eq!(arena.try_bump(64, 4), Some(0));
    }

    #[test]
    fn test_grown_capacity() {
        let arena = ScratchArena::default();
        assert_eq!(arena.grown_capacity(10, 1024), 1024);
        assert_eq!(arena.grown_capacity(3000, 1024), 4096);
    }
}
