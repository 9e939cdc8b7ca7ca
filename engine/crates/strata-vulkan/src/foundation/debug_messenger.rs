use std::ffi::CStr;

use ash::vk;
use strata_gfx::error::{GfxError, GfxResult};

/// 将 validation layer 的消息转发到 `log`
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

// new & init
impl DebugMessenger {
    pub fn new(entry: &ash::Entry, instance: &ash::Instance) -> GfxResult<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let handle = unsafe { loader.create_debug_utils_messenger(&Self::create_info(), None) }
            .map_err(|e| GfxError::InstanceCreateFailed(format!("debug messenger: {e:?}")))?;
        Ok(Self { loader, handle })
    }

    /// 同时用于 instance 创建阶段，捕获 create/destroy instance 期间的消息
    pub fn create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
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

// destroy
impl DebugMessenger {
    pub fn destroy(self) {
        log::info!("destroying debug messenger");
        unsafe { self.loader.destroy_debug_utils_messenger(self.handle, None) };
    }
}

/// validation 消息有时是一段 json，其中 `MainMessage` 字段带有换行符，需要单独输出
fn format_message(message_type: vk::DebugUtilsMessageTypeFlagsEXT, msg: &str) -> String {
    let mut json_value = serde_json::from_str::<serde_json::Value>(msg).ok();
    let json_obj = json_value.as_mut().and_then(|v| v.as_object_mut());
    match json_obj {
        Some(obj) => {
            let main_msg = obj.remove("MainMessage");
            let main_msg_str = main_msg.as_ref().and_then(|value| value.as_str()).unwrap_or_default();
            let total_msg_str = serde_json::to_string_pretty(&*obj).unwrap_or_else(|_| msg.to_string());
            format!("[{:?}]\n{}\n{}\n", message_type, total_msg_str, main_msg_str)
        }
        None => format!("[{:?}]\n{}\n", message_type, msg),
    }
}

/// debug messenger 的回调函数
///
/// # Safety
/// 由 validation layer 调用，`p_callback_data` 在回调期间有效
unsafe extern "system" fn vk_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let msg = unsafe {
        match p_callback_data.as_ref() {
            Some(data) if !data.p_message.is_null() => CStr::from_ptr(data.p_message).to_string_lossy(),
            _ => std::borrow::Cow::from(""),
        }
    };
    let format_msg = format_message(message_type, msg.as_ref());

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("{}", format_msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("{}", format_msg),
        _ => log::info!("{}", format_msg),
    };

    // 只有 layer developer 才需要返回 True
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_message_extracts_main_message() {
        let msg = r#"{"MessageID": "0x1", "MainMessage": "line1\nline2"}"#;
        let formatted = format_message(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION, msg);
        assert!(formatted.ends_with("line1\nline2\n"));
        assert!(formatted.contains("\"MessageID\": \"0x1\""));
        assert!(!formatted.contains("MainMessage"));
    }

    #[test]
    fn test_plain_message_is_kept() {
        let formatted = format_message(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL, "plain text");
        assert!(formatted.contains("plain text"));
    }
}
