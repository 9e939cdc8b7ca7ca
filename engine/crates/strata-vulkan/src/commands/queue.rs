use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use itertools::Itertools;
use parking_lot::Mutex;
use strata_gfx::backend::{QueueSubmit, RhiQueue};
use strata_gfx::error::{GfxError, GfxResult};

use crate::commands::semaphore::VulkanSemaphore;
use crate::convert;
use crate::foundation::device::DeviceFunctions;
use crate::vulkan_device::VulkanDevice;

/// graphics queue family 中的一个 queue，以及属于它的 timeline semaphore
///
/// 多个 `VulkanQueue` 可能指向同一个 `vk::Queue`，`lock` 在它们之间共享，
/// 用于满足 vkQueueSubmit 与 vkQueuePresentKHR 的外部同步要求。
pub struct VulkanQueue {
    handle: vk::Queue,
    family_index: u32,
    lock: Arc<Mutex<()>>,

    timeline: VulkanSemaphore,

    device: Arc<DeviceFunctions>,
    name: String,
}

// new & init
impl VulkanQueue {
    pub fn new(
        device: Arc<DeviceFunctions>,
        family_index: u32,
        queue_index: u32,
        lock: Arc<Mutex<()>>,
        name: &str,
    ) -> GfxResult<Self> {
        let handle = unsafe { device.get_device_queue(family_index, queue_index) };
        device.set_object_debug_name(handle, format!("Queue::{name}"));
        let timeline = VulkanSemaphore::new_timeline(&device, 0, &format!("{name}-timeline"))?;
        Ok(Self {
            handle,
            family_index,
            lock,
            timeline,
            device,
            name: name.to_string(),
        })
    }
}

// getters
impl VulkanQueue {
    #[inline]
    pub fn vk_queue(&self) -> vk::Queue {
        self.handle
    }

    #[inline]
    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 调用 present 时同样需要持有该锁
    #[inline]
    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.lock.lock()
    }
}

// destroy
impl VulkanQueue {
    pub fn destroy(self) {
        self.timeline.destroy(&self.device);
    }
}

impl RhiQueue<VulkanDevice> for VulkanQueue {
    fn submit(&self, submit: &QueueSubmit<'_, VulkanDevice>) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanQueue::submit");

        let command_buffer_infos = submit
            .command_lists
            .iter()
            .map(|cmd| vk::CommandBufferSubmitInfo::default().command_buffer(cmd.vk_handle()))
            .collect_vec();
        let wait_infos = submit
            .waits
            .iter()
            .map(|wait| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(wait.semaphore.handle())
                    .stage_mask(convert::pipeline_stages(wait.stage))
            })
            .collect_vec();
        // timeline 在所有命令完成之后才会被 signal
        let signal_infos = submit
            .signals
            .iter()
            .map(|semaphore| {
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(semaphore.handle())
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            })
            .chain(std::iter::once(
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(self.timeline.handle())
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
                    .value(submit.timeline_value),
            ))
            .collect_vec();

        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(&command_buffer_infos)
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos);

        let _guard = self.lock();
        unsafe { self.device.queue_submit2(self.handle, std::slice::from_ref(&submit_info), vk::Fence::null()) }
            .map_err(|e| match e {
                vk::Result::ERROR_DEVICE_LOST => GfxError::DeviceLost,
                e => GfxError::SubmitFailed(format!("{}: {e:?}", self.name)),
            })
    }

    fn completed_value(&self) -> GfxResult<u64> {
        unsafe { self.device.get_semaphore_counter_value(self.timeline.handle()) }.map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => GfxError::DeviceLost,
            e => GfxError::FenceWaitFailed(format!("{}: {e:?}", self.name)),
        })
    }

    fn wait_value(&self, value: u64, timeout: Option<Duration>) -> GfxResult<bool> {
        let _span = tracy_client::span!("VulkanQueue::wait_value");

        let timeout_ns = timeout.map_or(u64::MAX, |t| t.as_nanos().min(u64::MAX as u128) as u64);
        let semaphores = [self.timeline.handle()];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default().semaphores(&semaphores).values(&values);
        match unsafe { self.device.wait_semaphores(&wait_info, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(GfxError::DeviceLost),
            Err(e) => Err(GfxError::FenceWaitFailed(format!("{}: {e:?}", self.name))),
        }
    }
}
