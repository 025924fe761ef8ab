use std::ops::Deref;

use crate::adapter::DevicePreferences;
use crate::backend::GfxBackend;
use crate::commands::CommandEncoder;
use crate::error::GfxResult;
use crate::handles::RawCommandBuffer;
use crate::headless::{HeadlessBackend, HeadlessConfig};
use crate::vulkan::{SurfaceTarget, VulkanBackend};

/// 设备上下文
///
/// 持有逻辑设备、queue 以及内存分配器（都在 backend 内部）。
/// 不是全局单例：由 app 创建，以引用的形式传给 resource manager、swapchain、frame scheduler。
pub struct DeviceContext {
    backend: Box<dyn GfxBackend>,

    #[cfg(debug_assertions)]
    destroyed: bool,
}

// new & init
impl DeviceContext {
    /// 创建 Vulkan 设备
    ///
    /// - 根据 preferences 对所有物理设备打分，选出最合适的一个
    /// - 没有满足最低要求的设备时返回 `GfxError::DeviceInit`
    pub fn initialize(prefs: &DevicePreferences, app_name: &str, surface: Option<SurfaceTarget>) -> GfxResult<Self> {
        let backend = VulkanBackend::new(prefs, app_name, surface)?;
        Ok(Self::from_backend(Box::new(backend)))
    }

    /// 创建软件模拟的设备
    pub fn initialize_headless(prefs: &DevicePreferences, config: HeadlessConfig) -> GfxResult<Self> {
        let backend = HeadlessBackend::new(config, prefs)?;
        Ok(Self::from_backend(Box::new(backend)))
    }

    pub fn from_backend(backend: Box<dyn GfxBackend>) -> Self {
        let adapter = backend.adapter();
        let queues = backend.queues();
        log::info!(
            "device context ready: {} (graphics family {}, present {:?}, compute {:?}, transfer {:?})",
            adapter.name,
            queues.graphics_family,
            queues.present_family,
            queues.compute_family,
            queues.transfer_family
        );

        Self {
            backend,

            #[cfg(debug_assertions)]
            destroyed: false,
        }
    }
}
// getters
impl DeviceContext {
    #[inline]
    pub fn backend(&self) -> &dyn GfxBackend {
        self.backend.as_ref()
    }

    /// 对某个 command buffer 录制命令
    #[inline]
    pub fn encoder(&self, cmd: RawCommandBuffer) -> CommandEncoder<'_> {
        CommandEncoder::new(self.backend.as_ref(), cmd)
    }
}
// destroy
impl DeviceContext {
    /// 调用之前需要确保所有 GPU 工作已经结束，所有资源都已经释放
    pub fn destroy(mut self) {
        log::info!("destroying device context");
        self.backend.shutdown();

        #[cfg(debug_assertions)]
        {
            self.destroyed = true;
        }
    }
}
impl Drop for DeviceContext {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        {
            assert!(self.destroyed, "DeviceContext dropped without destroy()");
        }
    }
}

impl Deref for DeviceContext {
    type Target = dyn GfxBackend;

    fn deref(&self) -> &Self::Target {
        self.backend.as_ref()
    }
}
