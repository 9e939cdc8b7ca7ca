use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use strata_gfx::backend::{AcquireResult, PresentResult, RhiSwapchain, SwapchainDesc};
use strata_gfx::basic::format::TextureFormat;
use strata_gfx::basic::types::Extent2D;
use strata_gfx::error::{GfxError, GfxResult};

use crate::commands::queue::VulkanQueue;
use crate::commands::semaphore::VulkanSemaphore;
use crate::convert;
use crate::foundation::device::DeviceFunctions;
use crate::resources::texture::VulkanTexture;
use crate::swapchain::surface::VulkanSurface;
use crate::vulkan_device::VulkanDevice;

pub struct VulkanSwapchain {
    handle: vk::SwapchainKHR,
    images: Vec<VulkanTexture>,

    format: TextureFormat,
    extent: Extent2D,

    device: Arc<DeviceFunctions>,
}

/// 根据 surface 能力修正之后的创建参数
struct SwapchainParams {
    surface_format: vk::SurfaceFormatKHR,
    format: TextureFormat,
    present_mode: vk::PresentModeKHR,
    image_count: u32,
    extent: vk::Extent2D,
    transform: vk::SurfaceTransformFlagsKHR,
    usage: vk::ImageUsageFlags,
}

// new & init
impl VulkanSwapchain {
    pub fn new(
        device: Arc<DeviceFunctions>,
        surface: &VulkanSurface,
        pdevice: vk::PhysicalDevice,
        desc: &SwapchainDesc,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("VulkanSwapchain::new");

        let (handle, params) = Self::create_swapchain(&device, surface, pdevice, desc, vk::SwapchainKHR::null())?;
        let images = match Self::wrap_images(&device, handle, &params) {
            Ok(images) => images,
            Err(e) => {
                if let Some(loader) = device.swapchain() {
                    unsafe { loader.destroy_swapchain(handle, None) };
                }
                return Err(e);
            }
        };

        Ok(Self {
            handle,
            images,
            format: params.format,
            extent: convert::extent_from_vk(params.extent),
            device,
        })
    }

    /// 调用方保证设备已经 idle，旧的 image 不再被使用
    pub fn recreate(
        &mut self,
        surface: &VulkanSurface,
        pdevice: vk::PhysicalDevice,
        desc: &SwapchainDesc,
    ) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanSwapchain::recreate");

        let (handle, params) = Self::create_swapchain(&self.device, surface, pdevice, desc, self.handle)?;
        let images = match Self::wrap_images(&self.device, handle, &params) {
            Ok(images) => images,
            Err(e) => {
                if let Some(loader) = self.device.swapchain() {
                    unsafe { loader.destroy_swapchain(handle, None) };
                }
                return Err(e);
            }
        };

        // 旧的 swapchain 已经 retired
        self.destroy_inner();
        self.handle = handle;
        self.images = images;
        self.format = params.format;
        self.extent = convert::extent_from_vk(params.extent);
        Ok(())
    }

    fn choose_params(
        surface: &VulkanSurface,
        pdevice: vk::PhysicalDevice,
        desc: &SwapchainDesc,
    ) -> GfxResult<SwapchainParams> {
        let capabilities = surface.capabilities(pdevice)?;
        let formats = surface.formats(pdevice)?;
        let present_modes = surface.present_modes(pdevice)?;

        // 优先使用请求的格式，否则使用第一个可以识别的格式
        let wanted = convert::format(desc.format);
        let surface_format = formats
            .iter()
            .find(|f| f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .or_else(|| formats.iter().find(|f| convert::texture_format(f.format).is_some()))
            .copied()
            .ok_or_else(|| GfxError::SwapchainCreateFailed("no supported surface format".to_string()))?;
        let format = convert::texture_format(surface_format.format)
            .ok_or_else(|| GfxError::SwapchainCreateFailed(format!("{:?}", surface_format.format)))?;
        if format != desc.format {
            log::warn!("swapchain format {:?} is not supported, use {:?}", desc.format, format);
        }

        let present_mode = Self::choose_present_mode(&present_modes, desc.vsync);

        // max_image_count == 0，表示不限制 image 数量
        let image_count = if capabilities.max_image_count == 0 {
            desc.image_count.max(capabilities.min_image_count)
        } else {
            desc.image_count.clamp(capabilities.min_image_count, capabilities.max_image_count)
        };

        let extent = Self::calculate_swapchain_extent(&capabilities, convert::extent(desc.extent));
        log::info!(
            "create swapchain:
            surface current extent: {}x{}, min extent: {}x{}, max extent: {}x{}
            requested extent: {}x{}
            final swapchain extent: {}x{}, images: {}, present mode: {:?}",
            capabilities.current_extent.width,
            capabilities.current_extent.height,
            capabilities.min_image_extent.width,
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.width,
            capabilities.max_image_extent.height,
            desc.extent.width,
            desc.extent.height,
            extent.width,
            extent.height,
            image_count,
            present_mode
        );

        // clear 与 blit 需要 TRANSFER_DST，readback 需要 TRANSFER_SRC
        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT
            | (capabilities.supported_usage_flags
                & (vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC));

        Ok(SwapchainParams {
            surface_format,
            format,
            present_mode,
            image_count,
            extent,
            transform: capabilities.current_transform,
            usage,
        })
    }

    fn create_swapchain(
        device: &DeviceFunctions,
        surface: &VulkanSurface,
        pdevice: vk::PhysicalDevice,
        desc: &SwapchainDesc,
        old_swapchain: vk::SwapchainKHR,
    ) -> GfxResult<(vk::SwapchainKHR, SwapchainParams)> {
        let loader = device
            .swapchain()
            .ok_or_else(|| GfxError::SwapchainCreateFailed("device is created without surface".to_string()))?;
        let params = Self::choose_params(surface, pdevice, desc)?;

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(params.image_count)
            .image_format(params.surface_format.format)
            .image_color_space(params.surface_format.color_space)
            .image_extent(params.extent)
            .image_array_layers(1)
            .image_usage(params.usage)
            .pre_transform(params.transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(params.present_mode)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let handle = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(|e| GfxError::SwapchainCreateFailed(format!("{e:?}")))?;
        device.set_object_debug_name(handle, "Swapchain::main");
        Ok((handle, params))
    }

    fn wrap_images(
        device: &DeviceFunctions,
        handle: vk::SwapchainKHR,
        params: &SwapchainParams,
    ) -> GfxResult<Vec<VulkanTexture>> {
        let loader = device
            .swapchain()
            .ok_or_else(|| GfxError::SwapchainCreateFailed("device is created without surface".to_string()))?;
        let vk_images = unsafe { loader.get_swapchain_images(handle) }
            .map_err(|e| GfxError::SwapchainCreateFailed(format!("swapchain images: {e:?}")))?;

        let extent = convert::extent_from_vk(params.extent);
        let mut images = Vec::with_capacity(vk_images.len());
        for (idx, image) in vk_images.into_iter().enumerate() {
            match VulkanTexture::from_swapchain_image(device, image, extent, params.format, &format!("swapchain-{idx}")) {
                Ok(texture) => images.push(texture),
                Err(e) => {
                    images.into_iter().for_each(|texture: VulkanTexture| texture.destroy_view(device));
                    return Err(e);
                }
            }
        }
        Ok(images)
    }
}

// tools
impl VulkanSwapchain {
    /// 确定 window 的 extent 尺寸
    ///
    /// 如果 surface_capabilities.current_extent 包含特殊值 0xFFFFFFFF，则表示可以自己设置交换链的 extent
    pub fn calculate_swapchain_extent(
        surface_capabilities: &vk::SurfaceCapabilitiesKHR,
        window_physical_extent: vk::Extent2D,
    ) -> vk::Extent2D {
        let surface_extent = surface_capabilities.current_extent;
        if surface_extent.width == u32::MAX || surface_extent.height == u32::MAX {
            let width = window_physical_extent
                .width
                .clamp(surface_capabilities.min_image_extent.width, surface_capabilities.max_image_extent.width);
            let height = window_physical_extent
                .height
                .clamp(surface_capabilities.min_image_extent.height, surface_capabilities.max_image_extent.height);
            vk::Extent2D { width, height }
        } else {
            surface_extent
        }
    }

    /// vsync 使用 FIFO，否则优先 MAILBOX，然后是 IMMEDIATE
    pub fn choose_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
        if vsync {
            return vk::PresentModeKHR::FIFO;
        }
        [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
            .into_iter()
            .find(|mode| available.contains(mode))
            .unwrap_or(vk::PresentModeKHR::FIFO)
    }
}

// destroy
impl VulkanSwapchain {
    fn destroy_inner(&mut self) {
        std::mem::take(&mut self.images).into_iter().for_each(|image| image.destroy_view(&self.device));
        if let Some(loader) = self.device.swapchain() {
            unsafe { loader.destroy_swapchain(self.handle, None) };
        }
        self.handle = vk::SwapchainKHR::null();
    }

    pub fn destroy(mut self) {
        self.destroy_inner();
    }
}

impl RhiSwapchain<VulkanDevice> for VulkanSwapchain {
    #[inline]
    fn extent(&self) -> Extent2D {
        self.extent
    }

    #[inline]
    fn format(&self) -> TextureFormat {
        self.format
    }

    #[inline]
    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    #[inline]
    fn image(&self, index: u32) -> &VulkanTexture {
        &self.images[index as usize]
    }

    fn acquire_next_image(&mut self, signal: &VulkanSemaphore, timeout: Duration) -> GfxResult<AcquireResult> {
        let _span = tracy_client::span!("VulkanSwapchain::acquire_next_image");

        let loader = self
            .device
            .swapchain()
            .ok_or_else(|| GfxError::AcquireNextImageFailed("device is created without surface".to_string()))?;
        let timeout_ns = timeout.as_nanos().min(u64::MAX as u128) as u64;
        let result = unsafe { loader.acquire_next_image(self.handle, timeout_ns, signal.handle(), vk::Fence::null()) };

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::warn!("swapchain acquire image index {} is not optimal", index);
                }
                Ok(AcquireResult::Acquired { index, suboptimal })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when acquire next image");
                Ok(AcquireResult::OutOfDate)
            }
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(GfxError::DeviceLost),
            Err(e) => Err(GfxError::AcquireNextImageFailed(format!("{e:?}"))),
        }
    }

    fn present(&mut self, queue: &VulkanQueue, image_index: u32, wait: &VulkanSemaphore) -> GfxResult<PresentResult> {
        let _span = tracy_client::span!("VulkanSwapchain::present");

        let loader = self
            .device
            .swapchain()
            .ok_or_else(|| GfxError::PresentFailed("device is created without surface".to_string()))?;
        let wait_semaphores = [wait.handle()];
        let image_indices = [image_index];
        let swapchains = [self.handle];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .image_indices(&image_indices)
            .swapchains(&swapchains);

        let result = {
            let _guard = queue.lock();
            unsafe { loader.queue_present(queue.vk_queue(), &present_info) }
        };
        match result {
            Ok(false) => Ok(PresentResult::Optimal),
            Ok(true) => {
                log::warn!("swapchain present image index {} is not optimal", image_index);
                Ok(PresentResult::Suboptimal)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("swapchain is out of date when present image");
                Ok(PresentResult::OutOfDate)
            }
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(GfxError::DeviceLost),
            Err(e) => Err(GfxError::PresentFailed(format!("{e:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_mode() {
        let all = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX];
        assert_eq!(VulkanSwapchain::choose_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(VulkanSwapchain::choose_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            VulkanSwapchain::choose_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_extent_clamped_when_surface_is_flexible() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        };
        let extent = VulkanSwapchain::calculate_swapchain_extent(&caps, vk::Extent2D { width: 4096, height: 300 });
        assert_eq!((extent.width, extent.height), (1024, 300));
    }
}
