use std::collections::HashSet;
use std::ffi::{c_char, CStr, CString};

use ash::vk;

use crate::error::{GfxError, GfxResult};
use crate::vulkan::debug_messenger::DebugMessenger;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// 创建好的 instance 以及实际启用的调试能力
pub struct VulkanInstance {
    pub instance: ash::Instance,
    /// debug utils extension 是否启用（validation 开启且受支持）
    pub debug_utils_enabled: bool,
}

impl VulkanInstance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    ///
    /// - `display`：需要 presentation 时传入，用于查询 surface extension
    /// - validation layer 不可用时只输出警告
    pub fn new(
        entry: &ash::Entry,
        app_name: &str,
        display: Option<raw_window_handle::RawDisplayHandle>,
        enable_validation: bool,
    ) -> GfxResult<Self> {
        let app_name = CString::new(app_name).map_err(|e| GfxError::DeviceInit {
            reason: format!("invalid app name: {e}"),
        })?;
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3) // 版本过低时，有些函数无法正确加载
            .application_name(app_name.as_ref())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"Vireo")
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let supported_exts = Self::supported_extensions(entry)?;
        let debug_utils_enabled = enable_validation && supported_exts.contains(ash::ext::debug_utils::NAME);
        if enable_validation && !debug_utils_enabled {
            log::warn!("debug utils extension is not supported, validation messages are disabled");
        }

        let enabled_extensions = Self::get_extensions(&supported_exts, display, debug_utils_enabled)?;
        let mut enabled_extensions_str = String::new();
        for ext in &enabled_extensions {
            enabled_extensions_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) }));
        }
        log::info!("instance extensions: {}", enabled_extensions_str);

        let enabled_layers = if enable_validation { Self::get_layers(entry)? } else { vec![] };
        let mut enabled_layers_str = String::new();
        for layer in &enabled_layers {
            enabled_layers_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*layer) }));
        }
        log::info!("instance layers: {}", enabled_layers_str);

        let mut instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_extensions)
            .enabled_layer_names(&enabled_layers);

        // 为 instance info 添加 debug messenger，用于捕获 instance 创建期间的消息
        let mut debug_utils_messenger_ci = DebugMessenger::debug_utils_messenger_ci();
        if debug_utils_enabled {
            instance_ci = instance_ci.push_next(&mut debug_utils_messenger_ci);
        }

        let instance = unsafe { entry.create_instance(&instance_ci, None) }.map_err(|e| GfxError::DeviceInit {
            reason: format!("failed to create vulkan instance: {e:?}"),
        })?;

        Ok(Self {
            instance,
            debug_utils_enabled,
        })
    }

    pub fn destroy(&self) {
        log::info!("destroying instance");
        unsafe {
            self.instance.destroy_instance(None);
        }
    }
}

// 构造过程
impl VulkanInstance {
    fn supported_extensions(entry: &ash::Entry) -> GfxResult<HashSet<&'static CStr>> {
        let all_ext_props = unsafe { entry.enumerate_instance_extension_properties(None) }?;
        // extension 名字都是 ash 提供的静态字符串，这里只保留受支持的那部分
        let known: [&'static CStr; 7] = [
            ash::khr::surface::NAME,
            ash::khr::win32_surface::NAME,
            ash::khr::xlib_surface::NAME,
            ash::khr::xcb_surface::NAME,
            ash::khr::wayland_surface::NAME,
            ash::ext::metal_surface::NAME,
            ash::ext::debug_utils::NAME,
        ];
        let supported = known
            .into_iter()
            .filter(|ext| {
                all_ext_props
                    .iter()
                    .any(|prop| prop.extension_name_as_c_str().map(|name| name == *ext).unwrap_or(false))
            })
            .collect();
        Ok(supported)
    }

    /// instance 所需的所有 extension
    fn get_extensions(
        supported: &HashSet<&'static CStr>,
        display: Option<raw_window_handle::RawDisplayHandle>,
        debug_utils: bool,
    ) -> GfxResult<Vec<*const c_char>> {
        let mut exts: Vec<*const c_char> = vec![];

        if let Some(display) = display {
            let surface_exts = ash_window::enumerate_required_extensions(display).map_err(|e| GfxError::DeviceInit {
                reason: format!("no surface extension for this display: {e:?}"),
            })?;
            for ext in surface_exts {
                let name = unsafe { CStr::from_ptr(*ext) };
                if !supported.contains(name) {
                    return Err(GfxError::DeviceInit {
                        reason: format!("required instance extension {name:?} is missing"),
                    });
                }
                exts.push(*ext);
            }
        }

        if debug_utils {
            exts.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        Ok(exts)
    }

    fn get_layers(entry: &ash::Entry) -> GfxResult<Vec<*const c_char>> {
        let all_layer_props = unsafe { entry.enumerate_instance_layer_properties() }?;
        let available = all_layer_props
            .iter()
            .any(|prop| prop.layer_name_as_c_str().map(|name| name == VALIDATION_LAYER).unwrap_or(false));

        if available {
            Ok(vec![VALIDATION_LAYER.as_ptr()])
        } else {
            log::warn!("validation layer {:?} is not available", VALIDATION_LAYER);
            Ok(vec![])
        }
    }
}
