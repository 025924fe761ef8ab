use std::ffi::CStr;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;

/// 进程内只允许注册一个 debug messenger
static DEBUG_MESSENGER_REGISTERED: AtomicBool = AtomicBool::new(false);

pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// 注册 debug messenger；已经有其他 messenger 存活时返回 None
    pub fn register(entry: &ash::Entry, instance: &ash::Instance) -> Option<Self> {
        if DEBUG_MESSENGER_REGISTERED.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            log::warn!("debug messenger already registered in this process, skip");
            return None;
        }

        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let create_info = Self::debug_utils_messenger_ci();
        match unsafe { loader.create_debug_utils_messenger(&create_info, None) } {
            Ok(messenger) => Some(Self { loader, messenger }),
            Err(e) => {
                log::warn!("failed to create debug messenger: {:?}", e);
                DEBUG_MESSENGER_REGISTERED.store(false, Ordering::Release);
                None
            }
        }
    }

    #[inline]
    pub fn is_registered() -> bool {
        DEBUG_MESSENGER_REGISTERED.load(Ordering::Acquire)
    }

    pub fn destroy(self) {
        // 触发 drop 进行销毁
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        unsafe {
            log::info!("destroying debug messenger");
            self.loader.destroy_debug_utils_messenger(self.messenger, None);
        }
        DEBUG_MESSENGER_REGISTERED.store(false, Ordering::Release);
    }
}

/// debug messenger 的回调函数
/// # Safety
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    let callback_data = unsafe { *p_callback_data };

    let msg = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    // 提取 json 里面的 MainMessage 字段，这个字段里面有换行符，需要单独输出
    let mut json_value = serde_json::from_str::<serde_json::Value>(msg.as_ref());
    let mut json_obj = json_value.as_mut().ok().and_then(|v| v.as_object_mut());
    let mut main_msg_value = None;
    if let Some(obj) = &mut json_obj {
        main_msg_value = obj.remove("MainMessage");
    }
    let main_msg_str = main_msg_value.as_ref().and_then(|value| value.as_str()).unwrap_or_default();
    let total_msg_str =
        json_obj.and_then(|obj| serde_json::to_string_pretty(&obj).ok()).unwrap_or_else(|| msg.to_string());

    let format_msg = format!("[{:?}]\n{}\n{}\n", message_type, total_msg_str, main_msg_str);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("{}", format_msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("{}", format_msg),
        _ => log::info!("{}", format_msg),
    };

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}

// 构造过程辅助函数
impl DebugMessenger {
    /// 用于创建 debug messenger 的结构体，也会挂在 instance create info 上
    pub fn debug_utils_messenger_ci() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(vk_debug_callback))
    }
}
