use ash::vk;
use strata_gfx::backend::RhiTexture;
use strata_gfx::basic::format::TextureFormat;
use strata_gfx::basic::types::Extent2D;
use strata_gfx::error::{GfxError, GfxResult};
use strata_gfx::handles::ImageUsage;
use strata_gfx::resources::texture::TextureDesc;
use vk_mem::Alloc;

use crate::convert;
use crate::foundation::device::DeviceFunctions;

/// 2D 纹理以及覆盖全部 mip 的 view
///
/// swapchain image 的内存由 swapchain 管理，此时 `allocation` 为 None
pub struct VulkanTexture {
    handle: vk::Image,
    view: vk::ImageView,
    allocation: Option<vk_mem::Allocation>,

    extent: Extent2D,
    format: TextureFormat,
    mip_levels: u32,
}

// new & init
impl VulkanTexture {
    pub fn new(allocator: &vk_mem::Allocator, device: &DeviceFunctions, desc: &TextureDesc) -> GfxResult<Self> {
        let _span = tracy_client::span!("VulkanTexture::new");

        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(convert::format(desc.format))
            .extent(convert::extent_3d(desc.extent))
            .mip_levels(desc.mip_levels.max(1))
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(Self::usage_of(desc.format, desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (handle, mut allocation) = unsafe { allocator.create_image(&image_ci, &alloc_ci) }
            .map_err(|e| GfxError::ImageCreateFailed(format!("{}: {e:?}", desc.name)))?;

        let view = match Self::create_view(device, handle, desc.format, desc.mip_levels.max(1)) {
            Ok(view) => view,
            Err(e) => {
                unsafe { allocator.destroy_image(handle, &mut allocation) };
                return Err(GfxError::ImageViewCreateFailed(format!("{}: {e:?}", desc.name)));
            }
        };

        device.set_object_debug_name(handle, format!("Image::{}", desc.name));
        device.set_object_debug_name(view, format!("ImageView::{}", desc.name));
        Ok(Self {
            handle,
            view,
            allocation: Some(allocation),
            extent: desc.extent,
            format: desc.format,
            mip_levels: desc.mip_levels.max(1),
        })
    }

    /// 包装 swapchain 的 image，只创建 view
    pub fn from_swapchain_image(
        device: &DeviceFunctions,
        image: vk::Image,
        extent: Extent2D,
        format: TextureFormat,
        name: &str,
    ) -> GfxResult<Self> {
        let view = Self::create_view(device, image, format, 1)
            .map_err(|e| GfxError::ImageViewCreateFailed(format!("{name}: {e:?}")))?;
        device.set_object_debug_name(image, format!("Image::{name}"));
        device.set_object_debug_name(view, format!("ImageView::{name}"));
        Ok(Self {
            handle: image,
            view,
            allocation: None,
            extent,
            format,
            mip_levels: 1,
        })
    }

    /// 所有纹理都可以作为拷贝的源和目标，并且可以被采样
    fn usage_of(format: TextureFormat, usage: ImageUsage) -> vk::ImageUsageFlags {
        let mut flags =
            vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED;
        if format.is_depth() {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        } else {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        // Temporary 的内容之后可能被提升为 storage image
        let storage = usage.is_storage() || (usage == ImageUsage::Temporary && convert::supports_storage(format));
        if storage {
            flags |= vk::ImageUsageFlags::STORAGE;
        }
        flags
    }

    /// 深度格式的 view 只包含 depth aspect，用于采样
    fn create_view(
        device: &DeviceFunctions,
        image: vk::Image,
        format: TextureFormat,
        mip_levels: u32,
    ) -> Result<vk::ImageView, vk::Result> {
        let aspect_mask =
            if format.is_depth() { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR };
        let view_ci = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(convert::format(format))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe { device.create_image_view(&view_ci, None) }
    }
}

// getters
impl VulkanTexture {
    #[inline]
    pub fn vk_image(&self) -> vk::Image {
        self.handle
    }

    #[inline]
    pub fn vk_view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// barrier 使用的完整 subresource range
    #[inline]
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: convert::aspect_of_format(self.format),
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

// destroy
impl VulkanTexture {
    pub fn destroy(self, allocator: &vk_mem::Allocator, device: &DeviceFunctions) {
        unsafe {
            device.destroy_image_view(self.view, None);
            if let Some(mut allocation) = self.allocation {
                allocator.destroy_image(self.handle, &mut allocation);
            }
        }
    }

    /// swapchain image 只需要销毁 view
    pub fn destroy_view(self, device: &DeviceFunctions) {
        debug_assert!(self.allocation.is_none(), "allocated image must be destroyed with the allocator");
        unsafe { device.destroy_image_view(self.view, None) };
    }
}

impl RhiTexture for VulkanTexture {
    #[inline]
    fn extent(&self) -> Extent2D {
        self.extent
    }

    #[inline]
    fn format(&self) -> TextureFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_flags() {
        let depth = VulkanTexture::usage_of(TextureFormat::D32Float, ImageUsage::Temporary);
        assert!(depth.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(!depth.contains(vk::ImageUsageFlags::STORAGE));

        let temp = VulkanTexture::usage_of(TextureFormat::Rgba16Float, ImageUsage::Temporary);
        assert!(temp.contains(vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::COLOR_ATTACHMENT));

        let sampled = VulkanTexture::usage_of(TextureFormat::Rgba8Srgb, ImageUsage::Sampled);
        assert!(sampled.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(!sampled.contains(vk::ImageUsageFlags::STORAGE));

        let rw = VulkanTexture::usage_of(TextureFormat::Rgba8Unorm, ImageUsage::ReadWrite);
        assert!(rw.contains(vk::ImageUsageFlags::STORAGE));
    }
}
