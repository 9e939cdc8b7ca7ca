use std::time::Duration;

use crate::backend::{AcquireResult, PresentResult, RhiDevice, RhiSwapchain, SwapchainDesc};
use crate::basic::format::TextureFormat;
use crate::basic::types::Extent2D;
use crate::commands::command_recorder::CommandRecorder;
use crate::commands::queue::Queue;
use crate::error::GfxResult;
use crate::resources::texture::TextureDesc;
use crate::sync::resource_state::ImageState;
use crate::sync::state_tracker::ImageBarrierDesc;

/// swapchain 以及与其同尺寸的深度图
///
/// suboptimal / out-of-date 或者 resize 时整体重建（包括深度图），`current_index` 归零
pub struct Swapchain<D: RhiDevice> {
    native: D::Swapchain,
    desc: SwapchainDesc,
    image_states: Vec<ImageState>,

    depth: D::Texture,
    depth_format: TextureFormat,
    depth_state: ImageState,

    /// 只在 acquire 成功与对应的 present 之间有效
    current_index: u32,
    acquired: bool,
    /// acquire 时当前 image 与深度图的状态，帧在提交前被丢弃时用于恢复
    acquired_states: (ImageState, ImageState),
}

// new & init
impl<D: RhiDevice> Swapchain<D> {
    pub fn new(device: &D, desc: SwapchainDesc, depth_format: TextureFormat) -> GfxResult<Self> {
        let native = device.create_swapchain(&desc)?;
        let depth = device.create_texture(&TextureDesc::depth(desc.extent, depth_format))?;
        let image_count = native.image_count();
        log::info!(
            "swapchain created: extent {}x{}, {} images, format {:?}",
            desc.extent.width,
            desc.extent.height,
            image_count,
            desc.format
        );

        Ok(Self {
            native,
            desc,
            image_states: vec![ImageState::UNDEFINED; image_count as usize],
            depth,
            depth_format,
            depth_state: ImageState::UNDEFINED,
            current_index: 0,
            acquired: false,
            acquired_states: (ImageState::UNDEFINED, ImageState::UNDEFINED),
        })
    }

    /// 销毁并重建 swapchain 与深度图。调用方需保证设备已经 idle
    pub fn recreate(&mut self, device: &D, extent: Extent2D) -> GfxResult<()> {
        let _span = tracy_client::span!("Swapchain::recreate");
        self.desc.extent = extent;
        device.recreate_swapchain(&mut self.native, &self.desc)?;

        let depth = device.create_texture(&TextureDesc::depth(extent, self.depth_format))?;
        device.destroy_texture(std::mem::replace(&mut self.depth, depth));
        self.depth_state = ImageState::UNDEFINED;

        self.image_states = vec![ImageState::UNDEFINED; self.native.image_count() as usize];
        self.current_index = 0;
        self.acquired = false;

        log::info!("swapchain recreated: extent {}x{}", extent.width, extent.height);
        Ok(())
    }
}

impl<D: RhiDevice> Swapchain<D> {
    pub fn acquire(&mut self, signal: &D::Semaphore, timeout: Duration) -> GfxResult<AcquireResult> {
        let _span = tracy_client::span!("Swapchain::acquire");
        let result = self.native.acquire_next_image(signal, timeout)?;
        if let AcquireResult::Acquired { index, .. } = result {
            debug_assert!(index < self.image_count());
            self.current_index = index;
            self.acquired = true;
            self.acquired_states = (self.image_states[index as usize], self.depth_state);
        }
        Ok(result)
    }

    pub fn present(&mut self, queue: &Queue<D>, wait: &D::Semaphore) -> GfxResult<PresentResult> {
        let _span = tracy_client::span!("Swapchain::present");
        assert!(self.acquired, "present without acquired swapchain image");
        self.acquired = false;
        self.native.present(queue.native(), self.current_index, wait)
    }

    /// 放弃当前 image，不再 present
    ///
    /// `restore_states` 为 true 时录制的 barrier 没有被提交，状态回退到 acquire 时的值
    pub(crate) fn release_acquired(&mut self, restore_states: bool) {
        if restore_states {
            let (image_state, depth_state) = self.acquired_states;
            self.image_states[self.current_index as usize] = image_state;
            self.depth_state = depth_state;
        }
        self.acquired = false;
    }

    /// 将当前 image 转换到指定状态
    pub fn transition_current(&mut self, recorder: &mut CommandRecorder<D>, new: ImageState) -> ImageBarrierDesc {
        assert!(self.acquired, "swapchain image is not acquired");
        let index = self.current_index;
        recorder.transition_image(self.native.image(index), &mut self.image_states[index as usize], new)
    }

    pub fn transition_depth(&mut self, recorder: &mut CommandRecorder<D>, new: ImageState) -> ImageBarrierDesc {
        recorder.transition_image(&self.depth, &mut self.depth_state, new)
    }

    /// 当前 image 与其状态，用于拷贝等需要同时访问其他资源的命令
    #[inline]
    pub(crate) fn current_image_mut(&mut self) -> (&D::Texture, &mut ImageState) {
        assert!(self.acquired, "swapchain image is not acquired");
        let index = self.current_index;
        (self.native.image(index), &mut self.image_states[index as usize])
    }
}

// getters
impl<D: RhiDevice> Swapchain<D> {
    #[inline]
    pub fn extent(&self) -> Extent2D {
        self.desc.extent
    }

    #[inline]
    pub fn format(&self) -> TextureFormat {
        self.native.format()
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.native.image_count()
    }

    #[inline]
    pub fn current_index(&self) -> u32 {
        self.current_index
    }

    #[inline]
    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    #[inline]
    pub fn current_image(&self) -> &D::Texture {
        self.native.image(self.current_index)
    }

    #[inline]
    pub fn depth(&self) -> &D::Texture {
        &self.depth
    }

    #[inline]
    pub fn current_state(&self) -> ImageState {
        self.image_states[self.current_index as usize]
    }

    #[inline]
    pub fn depth_format(&self) -> TextureFormat {
        self.depth_format
    }

    #[inline]
    pub fn native(&self) -> &D::Swapchain {
        &self.native
    }
}

// destroy
impl<D: RhiDevice> Swapchain<D> {
    pub fn destroy(self, device: &D) {
        device.destroy_texture(self.depth);
        device.destroy_swapchain(self.native);
    }
}
