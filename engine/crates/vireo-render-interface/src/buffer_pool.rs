use std::collections::HashMap;

use vireo_gfx::handles::RawBuffer;
use vireo_gfx::types::{BufferUsage, MemoryResidency};

/// 最小的 size class
pub const MIN_SIZE_CLASS: u64 = 256;

/// 向上取整到 2 的幂，最小 256 字节
#[inline]
pub fn size_class(size: u64) -> u64 {
    size.max(MIN_SIZE_CLASS).next_power_of_two()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferPoolKey {
    pub usage: BufferUsage,
    pub residency: MemoryResidency,
    pub size_class: u64,
}

impl BufferPoolKey {
    pub fn new(usage: BufferUsage, residency: MemoryResidency, size: u64) -> Self {
        Self {
            usage,
            residency,
            size_class: size_class(size),
        }
    }
}

/// 已经不再被 GPU 使用的 buffer 的空闲列表
///
/// 只存放 collect_garbage 确认完成之后的 buffer，所以从这里取出的 buffer 可以立即复用。
pub struct BufferPool {
    free: HashMap<BufferPoolKey, Vec<RawBuffer>>,
    max_per_class: usize,
}

// new & init
impl BufferPool {
    pub fn new(max_per_class: usize) -> Self {
        Self {
            free: HashMap::new(),
            max_per_class,
        }
    }
}
// getters
impl BufferPool {
    #[inline]
    pub fn pooled_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    #[inline]
    pub fn pooled_in_class(&self, key: &BufferPoolKey) -> usize {
        self.free.get(key).map_or(0, Vec::len)
    }
}
// update
impl BufferPool {
    pub fn take(&mut self, key: &BufferPoolKey) -> Option<RawBuffer> {
        self.free.get_mut(key).and_then(Vec::pop)
    }

    /// 放回空闲列表；超出上限时把 buffer 还给调用方，由调用方销毁
    pub fn put(&mut self, key: BufferPoolKey, buffer: RawBuffer) -> Option<RawBuffer> {
        let list = self.free.entry(key).or_default();
        if list.len() >= self.max_per_class {
            return Some(buffer);
        }
        list.push(buffer);
        None
    }

    /// 取出所有空闲的 buffer
    pub fn drain(&mut self) -> Vec<RawBuffer> {
        self.free.drain().flat_map(|(_, list)| list).collect()
    }
}
