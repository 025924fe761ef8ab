use std::ffi::{c_char, CStr};

use ash::vk;

use crate::adapter::QueueSelection;
use crate::error::{GfxError, GfxResult};

/// 逻辑设备以及扩展的函数指针
///
/// # 扩展支持
/// - Swapchain (KHR)，只在有 surface 时启用
/// - Push Descriptor (KHR)
/// - Debug Utils (EXT)，只在开启 validation 时加载
pub struct VulkanDevice {
    pub device: ash::Device,
    pub swapchain: Option<ash::khr::swapchain::Device>,
    pub push_descriptor: ash::khr::push_descriptor::Device,
    pub debug_utils: Option<ash::ext::debug_utils::Device>,

    pub graphics_queue: vk::Queue,
    pub present_queue: Option<vk::Queue>,
}

// new & init
impl VulkanDevice {
    pub fn new(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        queues: &QueueSelection,
        with_swapchain: bool,
        debug_utils: bool,
    ) -> GfxResult<Self> {
        let priorities = [1.0_f32];
        let queue_create_infos = queues
            .unique_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect::<Vec<_>>();

        let device_exts = Self::basic_device_exts(with_swapchain);
        let mut exts_str = String::new();
        for ext in &device_exts {
            exts_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) }));
        }
        log::info!("device exts: {}", exts_str);

        // dynamic rendering 和 synchronization2 已经是 core-1.3
        let mut features13 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);
        let mut all_features = vk::PhysicalDeviceFeatures2::default().push_next(&mut features13);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_exts)
            .push_next(&mut all_features);

        let device = unsafe { instance.create_device(pdevice, &device_create_info, None) }.map_err(|e| {
            GfxError::DeviceInit {
                reason: format!("failed to create logical device: {e:?}"),
            }
        })?;

        let graphics_queue = unsafe { device.get_device_queue(queues.graphics_family, 0) };
        let present_queue = queues.present_family.map(|family| unsafe { device.get_device_queue(family, 0) });

        Ok(Self {
            swapchain: with_swapchain.then(|| ash::khr::swapchain::Device::new(instance, &device)),
            push_descriptor: ash::khr::push_descriptor::Device::new(instance, &device),
            debug_utils: debug_utils.then(|| ash::ext::debug_utils::Device::new(instance, &device)),
            device,
            graphics_queue,
            present_queue,
        })
    }

    /// 必要的 device extensions
    fn basic_device_exts(with_swapchain: bool) -> Vec<*const c_char> {
        let mut exts = vec![];

        if with_swapchain {
            exts.push(ash::khr::swapchain::NAME.as_ptr());
        }

        // push descriptor
        exts.push(ash::khr::push_descriptor::NAME.as_ptr());

        exts
    }
}
// tools
impl VulkanDevice {
    /// 只有开启了 debug utils 才会真正设置名字
    pub fn set_object_debug_name<T: vk::Handle>(&self, handle: T, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = std::ffi::CString::new(name) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default().object_handle(handle).object_name(name.as_c_str());
        unsafe {
            if let Err(e) = debug_utils.set_debug_utils_object_name(&name_info) {
                log::debug!("failed to set debug name {:?}: {:?}", name, e);
            }
        }
    }
}
// destroy
impl VulkanDevice {
    pub fn destroy(&self) {
        log::info!("destroying device");
        unsafe {
            self.device.destroy_device(None);
        }
    }
}
