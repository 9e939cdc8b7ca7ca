use std::sync::atomic::{AtomicU64, Ordering};

use strata_gfx::error::{GfxError, GfxResult};
use windows::Win32::Graphics::Direct3D12::*;

use crate::convert;
use crate::foundation::device::set_debug_name;

/// 用 fence 模拟的 binary semaphore
///
/// 每次 signal 都会把期望值加一，wait 等待最近一次 signal 的值，
/// 所以 wait 必须在对应的 signal 之后按顺序发出。
pub struct D3D12Semaphore {
    fence: ID3D12Fence,
    value: AtomicU64,
}

// fence 是自由线程的对象
unsafe impl Send for D3D12Semaphore {}
unsafe impl Sync for D3D12Semaphore {}

impl D3D12Semaphore {
    pub fn new(device: &ID3D12Device, name: &str) -> GfxResult<Self> {
        let fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }
            .map_err(|e| GfxError::SemaphoreCreateFailed(format!("{name}: {e}")))?;
        set_debug_name(&fence, format!("Semaphore::{name}"));
        Ok(Self {
            fence,
            value: AtomicU64::new(0),
        })
    }

    /// 在 GPU 队列上 signal
    pub fn signal(&self, queue: &ID3D12CommandQueue) -> GfxResult<()> {
        let value = self.value.fetch_add(1, Ordering::AcqRel) + 1;
        unsafe { queue.Signal(&self.fence, value) }.map_err(|e| convert::device_error(e, GfxError::SubmitFailed))
    }

    /// 由 CPU 直接 signal，用于没有 acquire 语义的 swapchain
    pub fn signal_from_host(&self) -> GfxResult<()> {
        let value = self.value.fetch_add(1, Ordering::AcqRel) + 1;
        unsafe { self.fence.Signal(value) }.map_err(|e| convert::device_error(e, GfxError::AcquireNextImageFailed))
    }

    /// 让 GPU 队列等待最近一次 signal，从未 signal 过时直接返回
    pub fn wait(&self, queue: &ID3D12CommandQueue) -> GfxResult<()> {
        let value = self.value.load(Ordering::Acquire);
        if value == 0 {
            return Ok(());
        }
        unsafe { queue.Wait(&self.fence, value) }.map_err(|e| convert::device_error(e, GfxError::SubmitFailed))
    }

    #[inline]
    pub fn fence(&self) -> &ID3D12Fence {
        &self.fence
    }
}
