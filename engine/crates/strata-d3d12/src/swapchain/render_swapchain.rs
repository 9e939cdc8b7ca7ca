use std::sync::Arc;
use std::time::Duration;

use strata_gfx::backend::{AcquireResult, PresentResult, RhiSwapchain, SwapchainDesc};
use strata_gfx::basic::format::TextureFormat;
use strata_gfx::basic::types::Extent2D;
use strata_gfx::error::{GfxError, GfxResult};
use windows::Win32::Foundation::{BOOL, HWND};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::core::Interface;

use crate::commands::queue::D3D12Queue;
use crate::commands::semaphore::D3D12Semaphore;
use crate::convert;
use crate::d3d12_device::D3D12Device;
use crate::foundation::device::DeviceShared;
use crate::resources::texture::D3D12Texture;

/// flip model 要求的 back buffer 数量范围
const MIN_BUFFER_COUNT: u32 = 2;
const MAX_BUFFER_COUNT: u32 = 16;

/// flip discard 模式的 swapchain
///
/// DXGI 不会报告 out of date，窗口尺寸变化需要由调用方主动 resize
pub struct D3D12Swapchain {
    swapchain: IDXGISwapChain3,
    images: Vec<D3D12Texture>,

    format: TextureFormat,
    extent: Extent2D,
    vsync: bool,
    /// 关闭 vsync 时是否可以使用 tearing
    tearing: bool,

    shared: Arc<DeviceShared>,
}

// swapchain 只会被持有 Context 的线程使用
unsafe impl Send for D3D12Swapchain {}
unsafe impl Sync for D3D12Swapchain {}

// new & init
impl D3D12Swapchain {
    pub fn new(
        shared: Arc<DeviceShared>,
        factory: &IDXGIFactory4,
        queue: &ID3D12CommandQueue,
        hwnd: HWND,
        tearing: bool,
        desc: &SwapchainDesc,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("D3D12Swapchain::new");

        let (format, buffer_format) = Self::choose_format(desc.format);
        let buffer_count = Self::buffer_count(desc.image_count);
        let extent = Self::buffer_extent(desc.extent);
        let swapchain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: extent.width,
            Height: extent.height,
            Format: buffer_format,
            Stereo: BOOL::from(false),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: buffer_count,
            Scaling: DXGI_SCALING_STRETCH,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
            Flags: Self::swapchain_flags(tearing).0 as u32,
        };

        let swapchain1 =
            unsafe { factory.CreateSwapChainForHwnd(queue, hwnd, &swapchain_desc, None, None::<&IDXGIOutput>) }
                .map_err(|e| GfxError::SwapchainCreateFailed(e.to_string()))?;
        let swapchain = swapchain1
            .cast::<IDXGISwapChain3>()
            .map_err(|e| GfxError::SwapchainCreateFailed(format!("IDXGISwapChain3: {e}")))?;

        log::info!(
            "create swapchain: requested extent: {}x{}, final extent: {}x{}, buffers: {}, format: {:?}, tearing: {}",
            desc.extent.width,
            desc.extent.height,
            extent.width,
            extent.height,
            buffer_count,
            format,
            tearing
        );

        let mut swapchain = Self {
            swapchain,
            images: Vec::new(),
            format,
            extent,
            vsync: desc.vsync,
            tearing,
            shared,
        };
        if let Err(e) = swapchain.wrap_buffers(buffer_count) {
            swapchain.destroy();
            return Err(e);
        }
        Ok(swapchain)
    }

    /// 调用方保证设备已经 idle，旧的 back buffer 不再被使用
    ///
    /// ResizeBuffers 要求所有 back buffer 的引用都已经释放
    pub fn recreate(&mut self, desc: &SwapchainDesc) -> GfxResult<()> {
        let _span = tracy_client::span!("D3D12Swapchain::recreate");

        self.release_buffers();

        let (format, buffer_format) = Self::choose_format(desc.format);
        let buffer_count = Self::buffer_count(desc.image_count);
        let extent = Self::buffer_extent(desc.extent);
        unsafe {
            self.swapchain.ResizeBuffers(
                buffer_count,
                extent.width,
                extent.height,
                buffer_format,
                Self::swapchain_flags(self.tearing),
            )
        }
        .map_err(|e| convert::device_error(e, |msg| GfxError::SwapchainCreateFailed(format!("resize: {msg}"))))?;

        log::info!("resize swapchain to {}x{}, buffers: {}", extent.width, extent.height, buffer_count);
        self.format = format;
        self.extent = extent;
        self.vsync = desc.vsync;
        self.wrap_buffers(buffer_count)
    }

    fn wrap_buffers(&mut self, buffer_count: u32) -> GfxResult<()> {
        for idx in 0..buffer_count {
            let buffer: ID3D12Resource = unsafe { self.swapchain.GetBuffer(idx) }
                .map_err(|e| GfxError::SwapchainCreateFailed(format!("back buffer {idx}: {e}")))?;
            let texture = D3D12Texture::from_swapchain_buffer(
                &self.shared,
                buffer,
                self.extent,
                self.format,
                &format!("swapchain-{idx}"),
            )?;
            self.images.push(texture);
        }
        Ok(())
    }

    /// 返回对外暴露的格式以及 back buffer 的格式，不支持的格式退回 Bgra8Unorm
    fn choose_format(requested: TextureFormat) -> (TextureFormat, DXGI_FORMAT) {
        match convert::swapchain_buffer_format(requested) {
            Some(buffer_format) => (requested, buffer_format),
            None => {
                log::warn!("swapchain format {:?} is not supported, use {:?}", requested, TextureFormat::Bgra8Unorm);
                (TextureFormat::Bgra8Unorm, DXGI_FORMAT_B8G8R8A8_UNORM)
            }
        }
    }

    #[inline]
    fn buffer_count(requested: u32) -> u32 {
        requested.clamp(MIN_BUFFER_COUNT, MAX_BUFFER_COUNT)
    }

    /// 最小化时窗口尺寸为 0，DXGI 会把 0 解释为窗口的当前尺寸
    #[inline]
    fn buffer_extent(requested: Extent2D) -> Extent2D {
        Extent2D::new(requested.width.max(1), requested.height.max(1))
    }

    #[inline]
    fn swapchain_flags(tearing: bool) -> DXGI_SWAP_CHAIN_FLAG {
        if tearing { DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING } else { DXGI_SWAP_CHAIN_FLAG(0) }
    }
}

// destroy
impl D3D12Swapchain {
    fn release_buffers(&mut self) {
        std::mem::take(&mut self.images).into_iter().for_each(|image| image.destroy(&self.shared));
    }

    pub fn destroy(mut self) {
        self.release_buffers();
    }
}

impl RhiSwapchain<D3D12Device> for D3D12Swapchain {
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
    fn image(&self, index: u32) -> &D3D12Texture {
        &self.images[index as usize]
    }

    /// flip model 中下一张 back buffer 是确定的，可用性由 Present 的阻塞保证
    fn acquire_next_image(&mut self, signal: &D3D12Semaphore, _timeout: Duration) -> GfxResult<AcquireResult> {
        let _span = tracy_client::span!("D3D12Swapchain::acquire_next_image");

        let index = unsafe { self.swapchain.GetCurrentBackBufferIndex() };
        signal.signal_from_host()?;
        Ok(AcquireResult::Acquired {
            index,
            suboptimal: false,
        })
    }

    fn present(&mut self, queue: &D3D12Queue, image_index: u32, wait: &D3D12Semaphore) -> GfxResult<PresentResult> {
        let _span = tracy_client::span!("D3D12Swapchain::present");

        let expected = unsafe { self.swapchain.GetCurrentBackBufferIndex() };
        if expected != image_index {
            log::warn!("present image index {} but current back buffer is {}", image_index, expected);
        }

        let (sync_interval, flags) = if self.vsync {
            (1, DXGI_PRESENT(0))
        } else if self.tearing {
            (0, DXGI_PRESENT_ALLOW_TEARING)
        } else {
            (0, DXGI_PRESENT(0))
        };

        let result = {
            let _guard = queue.lock();
            wait.wait(queue.native())?;
            unsafe { self.swapchain.Present(sync_interval, flags) }
        };
        // DXGI_STATUS_OCCLUDED 是成功码，窗口被遮挡时不需要处理
        result.ok().map_err(|e| convert::device_error(e, GfxError::PresentFailed))?;
        Ok(PresentResult::Optimal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choose_format() {
        assert_eq!(
            D3D12Swapchain::choose_format(TextureFormat::Bgra8Srgb),
            (TextureFormat::Bgra8Srgb, DXGI_FORMAT_B8G8R8A8_UNORM)
        );
        assert_eq!(
            D3D12Swapchain::choose_format(TextureFormat::D32Float),
            (TextureFormat::Bgra8Unorm, DXGI_FORMAT_B8G8R8A8_UNORM)
        );
    }

    #[test]
    fn test_buffer_count_and_extent() {
        assert_eq!(D3D12Swapchain::buffer_count(1), 2);
        assert_eq!(D3D12Swapchain::buffer_count(3), 3);
        assert_eq!(D3D12Swapchain::buffer_count(64), 16);
        assert_eq!(D3D12Swapchain::buffer_extent(Extent2D::new(0, 720)), Extent2D::new(1, 720));
    }
}
