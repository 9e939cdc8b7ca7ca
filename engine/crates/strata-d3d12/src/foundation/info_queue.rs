use std::ffi::c_void;

use windows::Win32::Graphics::Direct3D12::*;
use windows::core::{Interface, PCSTR};

/// 将 debug layer 的消息转发到 `log`
///
/// 需要 ID3D12InfoQueue1（Windows 11 或者较新的 Agility SDK），不支持时只能通过调试器查看消息
pub struct InfoQueueCallback {
    queue: ID3D12InfoQueue1,
    cookie: u32,
}

// new & init
impl InfoQueueCallback {
    pub fn register(device: &ID3D12Device) -> Option<Self> {
        let queue = match device.cast::<ID3D12InfoQueue1>() {
            Ok(queue) => queue,
            Err(e) => {
                log::warn!("ID3D12InfoQueue1 is not available, debug messages are not forwarded: {}", e);
                return None;
            }
        };

        let mut cookie = 0u32;
        let result = unsafe {
            queue.RegisterMessageCallback(
                Some(d3d12_message_callback),
                D3D12_MESSAGE_CALLBACK_FLAG_NONE,
                std::ptr::null(),
                &mut cookie,
            )
        };
        match result {
            Ok(()) => Some(Self { queue, cookie }),
            Err(e) => {
                log::warn!("failed to register d3d12 message callback: {}", e);
                None
            }
        }
    }
}

// destroy
impl InfoQueueCallback {
    pub fn destroy(self) {
        if let Err(e) = unsafe { self.queue.UnregisterMessageCallback(self.cookie) } {
            log::warn!("failed to unregister d3d12 message callback: {}", e);
        }
    }
}

/// debug layer 的回调函数
///
/// # Safety
/// 由 debug layer 调用，`description` 在回调期间有效
unsafe extern "system" fn d3d12_message_callback(
    category: D3D12_MESSAGE_CATEGORY,
    severity: D3D12_MESSAGE_SEVERITY,
    id: D3D12_MESSAGE_ID,
    description: PCSTR,
    _context: *mut c_void,
) {
    let msg = if description.is_null() { String::new() } else { unsafe { description.to_string() }.unwrap_or_default() };
    let format_msg = format!("[{:?}] [{:?}] {}", category, id, msg);

    match severity {
        D3D12_MESSAGE_SEVERITY_CORRUPTION | D3D12_MESSAGE_SEVERITY_ERROR => log::error!("{}", format_msg),
        D3D12_MESSAGE_SEVERITY_WARNING => log::warn!("{}", format_msg),
        _ => log::info!("{}", format_msg),
    }
}
