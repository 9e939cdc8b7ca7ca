use std::sync::Arc;
use std::time::{Duration, Instant};

use itertools::Itertools;
use parking_lot::Mutex;
use strata_gfx::backend::{QueueSubmit, RhiQueue};
use strata_gfx::error::{GfxError, GfxResult};
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::System::Threading::{CreateEventW, INFINITE, WaitForSingleObject};
use windows::core::PCWSTR;

use crate::convert;
use crate::d3d12_device::D3D12Device;
use crate::foundation::device::set_debug_name;

/// 一个原生 command queue 以及属于它的 timeline fence
///
/// 多个 `D3D12Queue` 可能指向同一个原生 queue，`lock` 在它们之间共享，
/// 保证 ExecuteCommandLists 与随后的 fence signal 在 queue 上连续出现。
pub struct D3D12Queue {
    queue: ID3D12CommandQueue,
    lock: Arc<Mutex<()>>,

    timeline: ID3D12Fence,
    event: HANDLE,
    /// 同一个 event 不能被两个线程同时等待
    wait_lock: Mutex<()>,

    name: String,
}

// fence、queue 都是自由线程的对象，event 的使用由 wait_lock 串行化
unsafe impl Send for D3D12Queue {}
unsafe impl Sync for D3D12Queue {}

// new & init
impl D3D12Queue {
    pub fn new(device: &ID3D12Device, queue: ID3D12CommandQueue, lock: Arc<Mutex<()>>, name: &str) -> GfxResult<Self> {
        let timeline: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }
            .map_err(|e| GfxError::FenceCreateFailed(format!("{name}: {e}")))?;
        set_debug_name(&timeline, format!("Fence::{name}-timeline"));
        let event = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }
            .map_err(|e| GfxError::FenceCreateFailed(format!("{name} event: {e}")))?;

        Ok(Self {
            queue,
            lock,
            timeline,
            event,
            wait_lock: Mutex::new(()),
            name: name.to_string(),
        })
    }
}

// getters
impl D3D12Queue {
    #[inline]
    pub fn native(&self) -> &ID3D12CommandQueue {
        &self.queue
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// present 时同样需要持有该锁
    #[inline]
    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.lock.lock()
    }
}

// destroy
impl D3D12Queue {
    pub fn destroy(self) {
        if let Err(e) = unsafe { CloseHandle(self.event) } {
            log::warn!("failed to close event of queue {}: {}", self.name, e);
        }
    }
}

impl RhiQueue<D3D12Device> for D3D12Queue {
    fn submit(&self, submit: &QueueSubmit<'_, D3D12Device>) -> GfxResult<()> {
        let _span = tracy_client::span!("D3D12Queue::submit");

        let lists = submit.command_lists.iter().map(|cmd| Some(cmd.base().clone())).collect_vec();

        let _guard = self.lock();
        // D3D12 的 wait 对整个 queue 生效，没有 stage 的概念
        for wait in submit.waits {
            wait.semaphore.wait(&self.queue)?;
        }
        unsafe { self.queue.ExecuteCommandLists(&lists) };
        for semaphore in submit.signals {
            semaphore.signal(&self.queue)?;
        }
        unsafe { self.queue.Signal(&self.timeline, submit.timeline_value) }.map_err(|e| {
            convert::device_error(e, |msg| GfxError::SubmitFailed(format!("{}: {msg}", self.name)))
        })
    }

    /// 设备移除后 fence 的值会变成 u64::MAX
    fn completed_value(&self) -> GfxResult<u64> {
        match unsafe { self.timeline.GetCompletedValue() } {
            u64::MAX => Err(GfxError::DeviceLost),
            value => Ok(value),
        }
    }

    fn wait_value(&self, value: u64, timeout: Option<Duration>) -> GfxResult<bool> {
        let _span = tracy_client::span!("D3D12Queue::wait_value");

        let deadline = timeout.map(|t| Instant::now() + t);
        let _guard = self.wait_lock.lock();
        loop {
            if self.completed_value()? >= value {
                return Ok(true);
            }

            let timeout_ms = deadline.map_or(INFINITE, |deadline| {
                deadline.saturating_duration_since(Instant::now()).as_millis().min((INFINITE - 1) as u128) as u32
            });
            unsafe { self.timeline.SetEventOnCompletion(value, self.event) }.map_err(|e| {
                convert::device_error(e, |msg| GfxError::FenceWaitFailed(format!("{}: {msg}", self.name)))
            })?;
            // 之前超时的等待可能在之后触发 event，所以被唤醒后需要重新检查 fence 的值
            match unsafe { WaitForSingleObject(self.event, timeout_ms) } {
                WAIT_OBJECT_0 => continue,
                WAIT_TIMEOUT => return Ok(self.completed_value()? >= value),
                other => {
                    return Err(GfxError::FenceWaitFailed(format!(
                        "{}: WaitForSingleObject returns {:?}",
                        self.name, other
                    )));
                }
            }
        }
    }
}
