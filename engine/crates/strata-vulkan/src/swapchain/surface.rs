use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use strata_gfx::error::{GfxError, GfxResult};

/// 窗口对应的 vk surface，由 VulkanDevice 持有，生命周期长于 swapchain
pub struct VulkanSurface {
    pub(crate) handle: vk::SurfaceKHR,
    pub(crate) pf: ash::khr::surface::Instance,
}

// new & init
impl VulkanSurface {
    pub fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        raw_display_handle: RawDisplayHandle,
        raw_window_handle: RawWindowHandle,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("VulkanSurface::new");

        let pf = ash::khr::surface::Instance::new(entry, instance);
        let handle =
            unsafe { ash_window::create_surface(entry, instance, raw_display_handle, raw_window_handle, None) }
                .map_err(|e| GfxError::SurfaceCreateFailed(format!("{e:?}")))?;
        Ok(Self { handle, pf })
    }
}

// getters
impl VulkanSurface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.pf
    }

    pub fn capabilities(&self, pdevice: vk::PhysicalDevice) -> GfxResult<vk::SurfaceCapabilitiesKHR> {
        unsafe { self.pf.get_physical_device_surface_capabilities(pdevice, self.handle) }
            .map_err(|e| GfxError::SwapchainCreateFailed(format!("surface capabilities: {e:?}")))
    }

    pub fn formats(&self, pdevice: vk::PhysicalDevice) -> GfxResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe { self.pf.get_physical_device_surface_formats(pdevice, self.handle) }
            .map_err(|e| GfxError::SwapchainCreateFailed(format!("surface formats: {e:?}")))
    }

    pub fn present_modes(&self, pdevice: vk::PhysicalDevice) -> GfxResult<Vec<vk::PresentModeKHR>> {
        unsafe { self.pf.get_physical_device_surface_present_modes(pdevice, self.handle) }
            .map_err(|e| GfxError::SwapchainCreateFailed(format!("surface present modes: {e:?}")))
    }
}

// destroy
impl VulkanSurface {
    /// 需要在 swapchain 销毁之后调用
    pub fn destroy(self) {
        unsafe { self.pf.destroy_surface(self.handle, None) }
    }
}
