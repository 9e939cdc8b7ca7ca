use ash::vk;
use strata_gfx::error::{GfxError, GfxResult};

use crate::foundation::device::DeviceFunctions;

/// binary semaphore，用于 acquire 与 present 之间的 GPU 同步
pub struct VulkanSemaphore {
    handle: vk::Semaphore,
}

impl VulkanSemaphore {
    pub fn new(device: &DeviceFunctions, name: &str) -> GfxResult<Self> {
        let handle = unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .map_err(|e| GfxError::SemaphoreCreateFailed(format!("{name}: {e:?}")))?;
        device.set_object_debug_name(handle, format!("Semaphore::{name}"));
        Ok(Self { handle })
    }

    /// 初始值为 `initial_value` 的 timeline semaphore
    pub fn new_timeline(device: &DeviceFunctions, initial_value: u64, name: &str) -> GfxResult<Self> {
        let mut timeline_ci = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let semaphore_ci = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_ci);
        let handle = unsafe { device.create_semaphore(&semaphore_ci, None) }
            .map_err(|e| GfxError::SemaphoreCreateFailed(format!("{name}: {e:?}")))?;
        device.set_object_debug_name(handle, format!("TimelineSemaphore::{name}"));
        Ok(Self { handle })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }

    pub fn destroy(self, device: &DeviceFunctions) {
        unsafe { device.destroy_semaphore(self.handle, None) };
    }
}
