use ash::vk;
use itertools::Itertools;
use slotmap::SlotMap;
use vireo_gfx::commands::{CommandEncoder, GfxCommand, ImageRef};
use vireo_gfx::device_context::DeviceContext;
use vireo_gfx::error::{GfxError, GfxResult};
use vireo_gfx::handles::{RawBuffer, RawImage};
use vireo_gfx::types::{BufferDesc, BufferUsage, ImageDesc, MemoryResidency, format_texel_size};

use crate::buffer_pool::{BufferPool, BufferPoolKey};
use crate::handles::{GpuBufferHandle, GpuImageHandle};
use crate::scratch_arena::{ScratchAllocation, ScratchArena};

/// scratch buffer 会被用作顶点、索引以及 uniform
const SCRATCH_USAGE: BufferUsage = BufferUsage::VERTEX.union(BufferUsage::INDEX).union(BufferUsage::UNIFORM);

#[derive(Debug, Clone, Copy)]
pub struct ResourceManagerConfig {
    /// 每个 (usage, residency, size class) 最多缓存的空闲 buffer 数量
    pub max_pooled_per_class: usize,
    /// scratch arena 第一次分配时的大小
    pub scratch_initial_bytes: u64,
    pub frames_in_flight: usize,
}
impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            max_pooled_per_class: 8,
            scratch_initial_bytes: 64 * 1024,
            frames_in_flight: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStats {
    /// 包括等待释放的 buffer
    pub live_buffers: usize,
    pub live_images: usize,
    pub pooled_buffers: usize,
    pub pending_buffers: usize,
    pub pending_images: usize,
    /// 向后端真正发起的 buffer 分配次数
    pub backend_buffer_allocations: u64,
    pub pool_hits: u64,
}

struct BufferEntry {
    raw: RawBuffer,
    key: BufferPoolKey,
    /// 申请的大小，实际分配的大小是 size class
    size: u64,
    name: String,
    ref_count: u32,
    last_used: Option<u64>,
}

struct ImageEntry {
    raw: RawImage,
    desc: ImageDesc,
    layout: vk::ImageLayout,
    name: String,
    ref_count: u32,
    last_used: Option<u64>,
}

/// 资源管理器
///
/// 负责管理所有的 GPU Buffer 和 Image，对外提供带 generation 的 Handle。
/// - 引用计数归零之后进入待释放队列，等到最后一次使用它的帧完成之后才真正回收
/// - 回收的 buffer 按 (usage, residency, size class) 放入空闲列表，分配时优先复用
/// - 每个 frame slot 有一个 scratch arena，用于每帧都会变化的数据
///
/// 只能在 render 线程使用。
pub struct GpuResourceManager {
    buffers: SlotMap<GpuBufferHandle, BufferEntry>,
    images: SlotMap<GpuImageHandle, ImageEntry>,

    // 待释放队列，真正的帧序号在 entry 的 last_used 中
    pending_free_buffers: Vec<GpuBufferHandle>,
    pending_free_images: Vec<GpuImageHandle>,

    pool: BufferPool,
    scratch: Vec<ScratchArena>,
    scratch_initial_bytes: u64,

    backend_buffer_allocations: u64,
    pool_hits: u64,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

/// last_used 为 None 表示从未被任何帧使用
#[inline]
fn frame_completed(last_used: Option<u64>, completed: Option<u64>) -> bool {
    match (last_used, completed) {
        (None, _) => true,
        (Some(used), Some(completed)) => used <= completed,
        (Some(_), None) => false,
    }
}

// new & init
impl GpuResourceManager {
    pub fn new(config: ResourceManagerConfig) -> Self {
        Self {
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            pending_free_buffers: Vec::new(),
            pending_free_images: Vec::new(),
            pool: BufferPool::new(config.max_pooled_per_class),
            scratch: (0..config.frames_in_flight).map(|_| ScratchArena::default()).collect(),
            scratch_initial_bytes: config.scratch_initial_bytes,
            backend_buffer_allocations: 0,
            pool_hits: 0,

            #[cfg(debug_assertions)]
            destroyed: false,
        }
    }
}
// Buffer API
impl GpuResourceManager {
    /// 分配一个 buffer，引用计数为 1
    ///
    /// 优先从空闲列表中复用；后端分配失败时返回 `OutOfDeviceMemory`，
    /// 调用方可以 `trim_pools` 之后重试，或者换成 host visible 的 buffer。
    pub fn allocate_buffer(
        &mut self,
        device: &DeviceContext,
        size: u64,
        usage: BufferUsage,
        residency: MemoryResidency,
        name: &str,
    ) -> GfxResult<GpuBufferHandle> {
        if size == 0 {
            return Err(GfxError::InvalidState(format!("buffer {name} has zero size")));
        }

        let key = BufferPoolKey::new(usage, residency, size);
        let raw = match self.pool.take(&key) {
            Some(raw) => {
                self.pool_hits += 1;
                raw
            }
            None => {
                let desc = BufferDesc {
                    size: key.size_class,
                    usage,
                    residency,
                };
                let raw = device.create_buffer(&desc, name)?;
                self.backend_buffer_allocations += 1;
                raw
            }
        };

        Ok(self.buffers.insert(BufferEntry {
            raw,
            key,
            size,
            name: name.to_string(),
            ref_count: 1,
            last_used: None,
        }))
    }

    pub fn retain_buffer(&mut self, handle: GpuBufferHandle) -> GfxResult<()> {
        let entry = self.buffers.get_mut(handle).ok_or(GfxError::InvalidHandle("buffer"))?;
        if entry.ref_count == 0 {
            return Err(GfxError::InvalidState(format!("retain of released buffer {}", entry.name)));
        }
        entry.ref_count += 1;
        Ok(())
    }

    /// 引用计数减一，归零时进入待释放队列
    pub fn release_buffer(&mut self, handle: GpuBufferHandle) -> GfxResult<()> {
        let entry = self.buffers.get_mut(handle).ok_or(GfxError::InvalidHandle("buffer"))?;
        if entry.ref_count == 0 {
            return Err(GfxError::InvalidState(format!("double release of buffer {}", entry.name)));
        }
        entry.ref_count -= 1;
        if entry.ref_count == 0 {
            self.pending_free_buffers.push(handle);
        }
        Ok(())
    }

    /// 记录某一帧的命令引用了这个 buffer
    #[inline]
    pub fn mark_buffer_used(&mut self, handle: GpuBufferHandle, frame_id: u64) {
        if let Some(entry) = self.buffers.get_mut(handle) {
            entry.last_used = Some(entry.last_used.map_or(frame_id, |used| used.max(frame_id)));
        }
    }

    /// 直接写入 host visible 的 buffer
    pub fn write_buffer(
        &self,
        device: &DeviceContext,
        handle: GpuBufferHandle,
        offset: u64,
        data: &[u8],
    ) -> GfxResult<()> {
        let entry = self.buffers.get(handle).ok_or(GfxError::InvalidHandle("buffer"))?;
        if entry.key.residency != MemoryResidency::HostVisible {
            return Err(GfxError::InvalidState(format!("buffer {} is not host visible", entry.name)));
        }
        if offset + data.len() as u64 > entry.size {
            return Err(GfxError::InvalidState(format!(
                "write of {} bytes at {} exceeds buffer {} ({} bytes)",
                data.len(),
                offset,
                entry.name,
                entry.size
            )));
        }
        device.write_buffer(entry.raw, offset, data)
    }

    /// 通过 staging buffer 上传数据
    ///
    /// 数据先写入 host visible 的 staging buffer，再在 `encoder` 中录制 copy。
    /// staging buffer 立即 release，等 `frame_id` 完成之后回收。
    pub fn upload_buffer(
        &mut self,
        device: &DeviceContext,
        encoder: &CommandEncoder,
        frame_id: u64,
        dst: GpuBufferHandle,
        dst_offset: u64,
        data: &[u8],
    ) -> GfxResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let (dst_raw, dst_size) = {
            let entry = self.buffers.get(dst).ok_or(GfxError::InvalidHandle("buffer"))?;
            (entry.raw, entry.size)
        };
        if dst_offset + data.len() as u64 > dst_size {
            return Err(GfxError::InvalidState(format!(
                "upload of {} bytes at {} exceeds destination ({} bytes)",
                data.len(),
                dst_offset,
                dst_size
            )));
        }

        let staging = self.create_staging(device, data)?;
        let staging_raw = self.buffer_raw(staging).ok_or(GfxError::InvalidHandle("buffer"))?;
        encoder.copy_buffer(staging_raw, 0, dst_raw, dst_offset, data.len() as u64);

        self.mark_buffer_used(staging, frame_id);
        self.mark_buffer_used(dst, frame_id);
        self.release_buffer(staging)
    }

    fn create_staging(&mut self, device: &DeviceContext, data: &[u8]) -> GfxResult<GpuBufferHandle> {
        let staging =
            self.allocate_buffer(device, data.len() as u64, BufferUsage::STAGING, MemoryResidency::HostVisible, "staging")?;
        if let Err(e) = self.write_buffer(device, staging, 0, data) {
            // 还没有被任何帧使用，下一次 collect 就会回收
            self.release_buffer(staging)?;
            return Err(e);
        }
        Ok(staging)
    }
}
// Image API
impl GpuResourceManager {
    /// image 不进入空闲列表，每次都向后端分配
    pub fn allocate_image(&mut self, device: &DeviceContext, desc: &ImageDesc, name: &str) -> GfxResult<GpuImageHandle> {
        let raw = device.create_image(desc, name)?;
        Ok(self.images.insert(ImageEntry {
            raw,
            desc: *desc,
            layout: vk::ImageLayout::UNDEFINED,
            name: name.to_string(),
            ref_count: 1,
            last_used: None,
        }))
    }

    pub fn retain_image(&mut self, handle: GpuImageHandle) -> GfxResult<()> {
        let entry = self.images.get_mut(handle).ok_or(GfxError::InvalidHandle("image"))?;
        if entry.ref_count == 0 {
            return Err(GfxError::InvalidState(format!("retain of released image {}", entry.name)));
        }
        entry.ref_count += 1;
        Ok(())
    }

    pub fn release_image(&mut self, handle: GpuImageHandle) -> GfxResult<()> {
        let entry = self.images.get_mut(handle).ok_or(GfxError::InvalidHandle("image"))?;
        if entry.ref_count == 0 {
            return Err(GfxError::InvalidState(format!("double release of image {}", entry.name)));
        }
        entry.ref_count -= 1;
        if entry.ref_count == 0 {
            self.pending_free_images.push(handle);
        }
        Ok(())
    }

    #[inline]
    pub fn mark_image_used(&mut self, handle: GpuImageHandle, frame_id: u64) {
        if let Some(entry) = self.images.get_mut(handle) {
            entry.last_used = Some(entry.last_used.map_or(frame_id, |used| used.max(frame_id)));
        }
    }

    /// 从记录的 layout 转换到 `new_layout`，layout 相同时不录制任何命令
    pub fn transition_image(
        &mut self,
        encoder: &CommandEncoder,
        handle: GpuImageHandle,
        new_layout: vk::ImageLayout,
        frame_id: u64,
    ) -> GfxResult<()> {
        let entry = self.images.get_mut(handle).ok_or(GfxError::InvalidHandle("image"))?;
        encoder.image_barrier(ImageRef::Image(entry.raw), entry.layout, new_layout);
        entry.layout = new_layout;
        self.mark_image_used(handle, frame_id);
        Ok(())
    }

    /// 录制的 barrier 被丢弃之后，把记录的 layout 改回去，不录制任何命令
    pub fn reset_image_layout(&mut self, handle: GpuImageHandle, layout: vk::ImageLayout) -> GfxResult<()> {
        let entry = self.images.get_mut(handle).ok_or(GfxError::InvalidHandle("image"))?;
        entry.layout = layout;
        Ok(())
    }

    /// 上传 mip 0 的像素数据，完成后 image 处于 SHADER_READ_ONLY_OPTIMAL
    pub fn upload_image(
        &mut self,
        device: &DeviceContext,
        encoder: &CommandEncoder,
        frame_id: u64,
        handle: GpuImageHandle,
        pixels: &[u8],
    ) -> GfxResult<()> {
        let (raw, desc) = {
            let entry = self.images.get(handle).ok_or(GfxError::InvalidHandle("image"))?;
            (entry.raw, entry.desc)
        };
        let expected =
            desc.extent.width as u64 * desc.extent.height as u64 * format_texel_size(desc.format) as u64;
        if pixels.len() as u64 != expected {
            return Err(GfxError::InvalidState(format!(
                "image upload expects {} bytes, got {}",
                expected,
                pixels.len()
            )));
        }

        let staging = self.create_staging(device, pixels)?;
        let staging_raw = self.buffer_raw(staging).ok_or(GfxError::InvalidHandle("buffer"))?;

        self.transition_image(encoder, handle, vk::ImageLayout::TRANSFER_DST_OPTIMAL, frame_id)?;
        encoder.push(GfxCommand::CopyBufferToImage {
            src: staging_raw,
            src_offset: 0,
            dst: raw,
            extent: desc.extent,
        });
        self.transition_image(encoder, handle, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, frame_id)?;

        self.mark_buffer_used(staging, frame_id);
        self.release_buffer(staging)
    }
}
// Scratch API
impl GpuResourceManager {
    /// slot 被复用时调用，之前在这个 slot 上分配的空间全部作废
    pub fn reset_scratch(&mut self, slot: usize) {
        if let Some(arena) = self.scratch.get_mut(slot) {
            arena.reset();
        }
    }

    /// 把 `data` 写入 slot 的 scratch arena
    ///
    /// 空间不足时换一个更大的 buffer，旧 buffer 通过待释放队列回收，之前的分配在帧完成前依然有效。
    pub fn scratch_upload(
        &mut self,
        device: &DeviceContext,
        slot: usize,
        frame_id: u64,
        data: &[u8],
        align: u64,
    ) -> GfxResult<ScratchAllocation> {
        if slot >= self.scratch.len() {
            return Err(GfxError::InvalidState(format!("scratch slot {slot} out of range")));
        }
        let size = data.len() as u64;

        let offset = match self.scratch[slot].try_bump(size, align) {
            Some(offset) => offset,
            None => {
                self.grow_scratch(device, slot, frame_id, size + align)?;
                self.scratch[slot]
                    .try_bump(size, align)
                    .ok_or_else(|| GfxError::InvalidState("scratch arena too small after grow".to_string()))?
            }
        };

        let buffer = self.scratch[slot].buffer.ok_or(GfxError::InvalidHandle("scratch buffer"))?;
        let raw = self.buffer_raw(buffer).ok_or(GfxError::InvalidHandle("scratch buffer"))?;
        self.mark_buffer_used(buffer, frame_id);
        if !data.is_empty() {
            device.write_buffer(raw, offset, data)?;
        }

        Ok(ScratchAllocation {
            buffer,
            raw,
            offset,
            size,
        })
    }

    fn grow_scratch(&mut self, device: &DeviceContext, slot: usize, frame_id: u64, needed: u64) -> GfxResult<()> {
        let capacity = self.scratch[slot].grown_capacity(needed, self.scratch_initial_bytes);
        let buffer = self.allocate_buffer(
            device,
            capacity,
            SCRATCH_USAGE,
            MemoryResidency::HostVisible,
            &format!("scratch-{slot}"),
        )?;
        log::debug!("scratch arena {} grows to {} bytes at frame {}", slot, capacity, frame_id);

        if let Some(old) = self.scratch[slot].replace(buffer, capacity) {
            self.release_buffer(old)?;
        }
        Ok(())
    }
}
// getters
impl GpuResourceManager {
    #[inline]
    pub fn buffer_raw(&self, handle: GpuBufferHandle) -> Option<RawBuffer> {
        self.buffers.get(handle).map(|entry| entry.raw)
    }

    #[inline]
    pub fn buffer_size(&self, handle: GpuBufferHandle) -> Option<u64> {
        self.buffers.get(handle).map(|entry| entry.size)
    }

    #[inline]
    pub fn buffer_ref_count(&self, handle: GpuBufferHandle) -> Option<u32> {
        self.buffers.get(handle).map(|entry| entry.ref_count)
    }

    #[inline]
    pub fn image_raw(&self, handle: GpuImageHandle) -> Option<RawImage> {
        self.images.get(handle).map(|entry| entry.raw)
    }

    #[inline]
    pub fn image_desc(&self, handle: GpuImageHandle) -> Option<ImageDesc> {
        self.images.get(handle).map(|entry| entry.desc)
    }

    #[inline]
    pub fn image_layout(&self, handle: GpuImageHandle) -> Option<vk::ImageLayout> {
        self.images.get(handle).map(|entry| entry.layout)
    }

    #[inline]
    pub fn image_ref_count(&self, handle: GpuImageHandle) -> Option<u32> {
        self.images.get(handle).map(|entry| entry.ref_count)
    }

    #[inline]
    pub fn scratch_capacity(&self, slot: usize) -> u64 {
        self.scratch.get(slot).map_or(0, ScratchArena::capacity)
    }

    pub fn stats(&self) -> ResourceStats {
        ResourceStats {
            live_buffers: self.buffers.len(),
            live_images: self.images.len(),
            pooled_buffers: self.pool.pooled_count(),
            pending_buffers: self.pending_free_buffers.len(),
            pending_images: self.pending_free_images.len(),
            backend_buffer_allocations: self.backend_buffer_allocations,
            pool_hits: self.pool_hits,
        }
    }
}
// update
impl GpuResourceManager {
    /// 回收所有最后一次使用的帧已经完成的资源
    ///
    /// `completed`：已经完成的最大帧序号（之前的帧也全部完成），None 表示还没有任何帧完成。
    /// 返回回收的资源数量。
    pub fn collect_garbage(&mut self, device: &DeviceContext, completed: Option<u64>) -> usize {
        let mut reclaimed = 0;

        let pending_buffers = std::mem::take(&mut self.pending_free_buffers);
        for handle in pending_buffers {
            let Some(entry) = self.buffers.get(handle) else {
                continue;
            };
            if !frame_completed(entry.last_used, completed) {
                self.pending_free_buffers.push(handle);
                continue;
            }
            if let Some(entry) = self.buffers.remove(handle)
                && let Some(overflow) = self.pool.put(entry.key, entry.raw)
            {
                device.destroy_buffer(overflow);
            }
            reclaimed += 1;
        }

        let pending_images = std::mem::take(&mut self.pending_free_images);
        for handle in pending_images {
            let Some(entry) = self.images.get(handle) else {
                continue;
            };
            if !frame_completed(entry.last_used, completed) {
                self.pending_free_images.push(handle);
                continue;
            }
            if let Some(entry) = self.images.remove(handle) {
                device.destroy_image(entry.raw);
            }
            reclaimed += 1;
        }

        reclaimed
    }

    /// 销毁空闲列表中的所有 buffer，返回销毁的数量
    pub fn trim_pools(&mut self, device: &DeviceContext) -> usize {
        let pooled = self.pool.drain();
        let count = pooled.len();
        for raw in pooled {
            device.destroy_buffer(raw);
        }
        if count > 0 {
            log::info!("trimmed {} pooled buffers", count);
        }
        count
    }
}
// destroy
impl GpuResourceManager {
    /// 调用之前需要确保所有 in-flight 的帧都已经完成
    pub fn destroy(mut self, device: &DeviceContext) {
        for arena in &mut self.scratch {
            arena.take();
        }

        let leaked = self.buffers.values().filter(|entry| entry.ref_count > 0).map(|entry| entry.name.as_str()).join(", ");
        if !leaked.is_empty() {
            log::debug!("buffers still referenced at destroy: {}", leaked);
        }

        for (_, entry) in self.images.drain() {
            device.destroy_image(entry.raw);
        }
        for (_, entry) in self.buffers.drain() {
            device.destroy_buffer(entry.raw);
        }
        for raw in self.pool.drain() {
            device.destroy_buffer(raw);
        }
        self.pending_free_buffers.clear();
        self.pending_free_images.clear();

        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}
impl Drop for GpuResourceManager {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            assert!(self.destroyed, "GpuResourceManager dropped without destroy()");
        }
    }
}
