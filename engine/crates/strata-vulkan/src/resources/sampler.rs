use ash::vk;
use strata_gfx::error::{GfxError, GfxResult};
use strata_gfx::resources::sampler::SamplerDesc;

use crate::convert;
use crate::foundation::device::DeviceFunctions;

pub struct VulkanSampler {
    handle: vk::Sampler,
}

// new & init
impl VulkanSampler {
    /// - `max_device_anisotropy`: 设备支持的最大各向异性，desc 中的值会被截断
    pub fn new(device: &DeviceFunctions, desc: &SamplerDesc, max_device_anisotropy: f32) -> GfxResult<Self> {
        let (anisotropy_enable, max_anisotropy) = match desc.max_anisotropy {
            Some(value) => (true, value.clamp(1.0, max_device_anisotropy.max(1.0))),
            None => (false, 1.0),
        };
        let sampler_ci = vk::SamplerCreateInfo::default()
            .mag_filter(convert::filter(desc.mag_filter))
            .min_filter(convert::filter(desc.min_filter))
            .mipmap_mode(convert::mipmap_mode(desc.mipmap_filter))
            .address_mode_u(convert::address_mode(desc.address_u))
            .address_mode_v(convert::address_mode(desc.address_v))
            .address_mode_w(convert::address_mode(desc.address_w))
            .anisotropy_enable(anisotropy_enable)
            .max_anisotropy(max_anisotropy)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        let handle = unsafe { device.create_sampler(&sampler_ci, None) }
            .map_err(|e| GfxError::SamplerCreateFailed(format!("{}: {e:?}", desc.name)))?;
        device.set_object_debug_name(handle, format!("Sampler::{}", desc.name));
        Ok(Self { handle })
    }
}

// getters
impl VulkanSampler {
    #[inline]
    pub fn vk_sampler(&self) -> vk::Sampler {
        self.handle
    }
}

// destroy
impl VulkanSampler {
    pub fn destroy(self, device: &DeviceFunctions) {
        unsafe { device.destroy_sampler(self.handle, None) };
    }
}
