use ash::vk;
use thiserror::Error;

use crate::types::MemoryResidency;

/// GFX 层所有可能的错误
#[derive(Error, Debug)]
pub enum GfxError {
    /// 没有任何物理设备满足最低要求，致命错误
    #[error("device initialization failed: {reason}")]
    DeviceInit { reason: String },

    /// 分配失败，调用方可以尝试更小的分配，或者先清空资源池
    #[error("out of device memory: requested {requested} bytes ({residency:?})")]
    OutOfDeviceMemory { requested: u64, residency: MemoryResidency },

    /// surface 尺寸变化或者 presentation engine 报告过期，需要 recreate
    #[error("swapchain is out of date")]
    SwapchainOutOfDate,

    /// fence 等待超时或者驱动报告设备丢失，无法恢复
    #[error("device lost")]
    DeviceLost,

    #[error("invalid handle: {0}")]
    InvalidHandle(&'static str),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("shader error: {0}")]
    Shader(String),

    #[error("vulkan error: {0:?}")]
    Vulkan(vk::Result),
}

pub type GfxResult<T> = Result<T, GfxError>;

impl GfxError {
    /// 致命错误意味着整个设备上下文需要重新初始化
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, GfxError::DeviceInit { .. } | GfxError::DeviceLost)
    }

    /// 可以通过 recreate swapchain 恢复的错误
    #[inline]
    pub fn is_swapchain_out_of_date(&self) -> bool {
        matches!(self, GfxError::SwapchainOutOfDate)
    }
}

impl From<vk::Result> for GfxError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => GfxError::DeviceLost,
            vk::Result::ERROR_OUT_OF_DATE_KHR => GfxError::SwapchainOutOfDate,
            other => GfxError::Vulkan(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_result_mapping() {
        assert!(matches!(GfxError::from(vk::Result::ERROR_DEVICE_LOST), GfxError::DeviceLost));
        assert!(GfxError::from(vk::Result::ERROR_OUT_OF_DATE_KHR).is_swapchain_out_of_date());
        assert!(matches!(
            GfxError::from(vk::Result::ERROR_INITIALIZATION_FAILED),
            GfxError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED)
        ));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(GfxError::DeviceLost.is_fatal());
        assert!(!GfxError::SwapchainOutOfDate.is_fatal());
        let oom = GfxError::OutOfDeviceMemory {
            requested: 64,
            residency: MemoryResidency::DeviceLocal,
        };
        assert!(!oom.is_fatal());
    }
}
