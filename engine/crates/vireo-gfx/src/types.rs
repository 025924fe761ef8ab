use ash::vk;
use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// buffer 的用途
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        /// 作为 copy 的源，通常是 host visible 的
        const STAGING = 1 << 3;
        const TRANSFER_DST = 1 << 4;
    }
}

impl BufferUsage {
    pub fn to_vk(self) -> vk::BufferUsageFlags {
        let mut flags = vk::BufferUsageFlags::empty();
        if self.contains(BufferUsage::VERTEX) {
            flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if self.contains(BufferUsage::INDEX) {
            flags |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if self.contains(BufferUsage::UNIFORM) {
            flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if self.contains(BufferUsage::STAGING) {
            flags |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if self.contains(BufferUsage::TRANSFER_DST) {
            flags |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        flags
    }
}

/// 内存驻留位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryResidency {
    /// GPU 专用，CPU 无法直接写入
    DeviceLocal,
    /// CPU 可写，GPU 访问较慢
    HostVisible,
}

impl MemoryResidency {
    pub fn required_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryResidency::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryResidency::HostVisible => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }
}

/// 设备上的一种内存类型
#[derive(Debug, Clone, Copy)]
pub struct MemoryTypeInfo {
    pub property_flags: vk::MemoryPropertyFlags,
    pub heap_index: u32,
    pub heap_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: BufferUsage,
    pub residency: MemoryResidency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub usage: vk::ImageUsageFlags,
}

impl ImageDesc {
    /// 用于采样的 2D 纹理，数据通过 transfer 写入
    pub fn texture_2d(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            extent: vk::Extent2D { width, height },
            format,
            mip_levels: 1,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        }
    }

    pub fn depth_attachment(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            mip_levels: 1,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        }
    }

    /// 估算占用的字节数，只用于预算统计
    pub fn byte_size(&self) -> u64 {
        let texel = format_texel_size(self.format) as u64;
        let mut total = 0;
        let (mut w, mut h) = (self.extent.width as u64, self.extent.height as u64);
        for _ in 0..self.mip_levels.max(1) {
            total += w * h * texel;
            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }
        total
    }
}

/// 每个像素的字节数
pub fn format_texel_size(format: vk::Format) -> u32 {
    match format {
        vk::Format::R8_UNORM => 1,
        vk::Format::D32_SFLOAT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB => 4,
        vk::Format::D32_SFLOAT_S8_UINT => 8,
        vk::Format::R16G16B16A16_SFLOAT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        _ => 4,
    }
}

#[inline]
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D16_UNORM
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn to_vk(self) -> vk::IndexType {
        match self {
            IndexType::U16 => vk::IndexType::UINT16,
            IndexType::U32 => vk::IndexType::UINT32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    TimedOut,
}

/// acquire 的结果，过期不是错误，由 swapchain coordinator 决定如何处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    Acquired { image_index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentMode {
    #[default]
    Fifo,
    Mailbox,
    Immediate,
}

impl PresentMode {
    pub fn to_vk(self) -> vk::PresentModeKHR {
        match self {
            PresentMode::Fifo => vk::PresentModeKHR::FIFO,
            PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
            PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    /// window 的物理尺寸，最终尺寸还要受 surface capabilities 约束
    pub extent: vk::Extent2D,
    pub present_mode: PresentMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub image_count: u32,
}

/// pipeline 使用的顶点布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexLayout {
    /// position: vec3, normal: vec3, uv: vec2
    Scene,
    /// position: vec2, uv: vec2, color: rgba8
    Ui,
}

impl VertexLayout {
    pub fn stride(self) -> u32 {
        match self {
            VertexLayout::Scene => 32,
            VertexLayout::Ui => 20,
        }
    }
}

/// 使用 dynamic rendering 的图形管线描述
pub struct GraphicsPipelineDesc<'a> {
    pub name: &'a str,
    pub vertex_spirv: &'a [u32],
    pub fragment_spirv: &'a [u32],
    pub vertex_layout: VertexLayout,
    pub push_constant_size: u32,
    /// 是否通过 push descriptor 绑定一张纹理（binding 0）
    pub textured: bool,
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
    pub alpha_blend: bool,
    pub cull_back_faces: bool,
}
