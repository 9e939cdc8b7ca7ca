use std::time::Duration;

use itertools::Itertools;

use crate::backend::{AcquireResult, PresentResult, RhiDevice, SwapchainDesc};
use crate::basic::types::Extent2D;
use crate::commands::command_recorder::CommandRecorder;
use crate::commands::queue::Queue;
use crate::commands::submit_info::SubmitInfo;
use crate::error::{GfxError, GfxResult};
use crate::frame::frame_counter::FrameCounter;
use crate::frame::frame_slot::FrameSlot;
use crate::frame::swapchain::Swapchain;
use crate::settings::GfxSettings;
use crate::sync::resource_state::{ImageState, PipelineStages};

/// 一帧所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

/// 帧调度器
///
/// 拥有 N 个 [`FrameSlot`] 与 swapchain，按顺序轮转使用 slot：
/// - BeginFrame：等待 slot 的 fence → acquire → 开始录制
/// - EndFrame：转换到 Present → 结束录制 → 提交 → present → 切换到下一个 slot
pub struct FrameScheduler<D: RhiDevice> {
    slots: Vec<FrameSlot<D>>,
    swapchain: Swapchain<D>,
    counter: FrameCounter,
    phase: FramePhase,

    fence_timeout: Duration,
    /// 最近一次非零的 extent，窗口最小化时延迟重建
    desired_extent: Extent2D,
    resize_pending: bool,
}

// new & init
impl<D: RhiDevice> FrameScheduler<D> {
    pub fn new(device: &D, queue: &Queue<D>, settings: &GfxSettings, extent: Extent2D) -> GfxResult<Self> {
        let frames_in_flight = settings.frames_in_flight as usize;
        let swapchain = Swapchain::new(
            device,
            SwapchainDesc {
                extent,
                image_count: settings.frames_in_flight,
                format: settings.color_format,
                vsync: settings.vsync,
            },
            settings.depth_format,
        )?;
        let slots = (0..frames_in_flight).map(|index| FrameSlot::new(device, queue, index)).try_collect()?;

        Ok(Self {
            slots,
            swapchain,
            counter: FrameCounter::new(frames_in_flight),
            phase: FramePhase::Idle,
            fence_timeout: Duration::from_millis(settings.fence_timeout_ms),
            desired_extent: extent,
            resize_pending: false,
        })
    }
}

// frame
impl<D: RhiDevice> FrameScheduler<D> {
    pub fn begin_frame(&mut self, device: &D, queue: &Queue<D>) -> GfxResult<()> {
        let _span = tracy_client::span!("FrameScheduler::begin_frame");
        assert_eq!(self.phase, FramePhase::Idle, "begin_frame called while a frame is in progress");

        // 等待该 slot 上一次的提交执行完毕，之后 command list 才可以复用
        let slot_index = self.counter.current_frame();
        queue.wait_timeout(self.slots[slot_index].fence_value, self.fence_timeout)?;

        self.phase = FramePhase::Acquiring;
        let began = self.acquire(device).and_then(|_| self.slots[slot_index].recorder.begin());
        if let Err(err) = began {
            self.phase = FramePhase::Idle;
            return Err(err);
        }
        self.phase = FramePhase::Recording;
        Ok(())
    }

    /// 结束当前帧并 present
    ///
    /// 任何一步失败都会回到 `Idle`，失败的帧被丢弃，调用方可以直接开始下一帧
    pub fn end_frame(&mut self, device: &D, queue: &mut Queue<D>) -> GfxResult<()> {
        let _span = tracy_client::span!("FrameScheduler::end_frame");
        assert_eq!(self.phase, FramePhase::Recording, "end_frame called without begin_frame");

        let result = match self.submit_and_present(queue) {
            Ok(result) => result,
            Err(err) => {
                log::error!("{} end_frame failed: {}", self.counter.frame_name(), err);
                self.abandon_frame(device)?;
                return Err(err);
            }
        };
        self.phase = FramePhase::Idle;
        if result.need_recreate() {
            log::warn!("{} swapchain present returned {:?}, recreate", self.counter.frame_name(), result);
            self.recreate_swapchain(device)?;
        }

        self.counter.next_frame();
        Ok(())
    }

    fn submit_and_present(&mut self, queue: &mut Queue<D>) -> GfxResult<PresentResult> {
        let slot = &mut self.slots[self.counter.current_frame()];
        self.swapchain.transition_current(&mut slot.recorder, ImageState::PRESENT);
        slot.recorder.end()?;

        // swapchain image 的第一次写入可能位于任意 stage（拷贝、blit 为 transfer，clear 为 all commands）
        let info = SubmitInfo::new()
            .wait(&slot.acquire_semaphore, PipelineStages::ALL_COMMANDS)
            .signal(&slot.render_semaphore);
        slot.fence_value = queue.submit(&mut [&mut slot.recorder], &info)?;
        self.phase = FramePhase::Submitted;

        self.phase = FramePhase::Presenting;
        self.swapchain.present(queue, &slot.render_semaphore)
    }

    /// 丢弃失败的帧，回到 `Idle`
    ///
    /// 提交之前失败时 acquire semaphore 已被 signal 却不会再被等待，需要在设备 idle 后替换
    fn abandon_frame(&mut self, device: &D) -> GfxResult<()> {
        let submitted = self.phase != FramePhase::Recording;
        self.phase = FramePhase::Idle;
        self.swapchain.release_acquired(!submitted);
        if !submitted {
            device.wait_idle()?;
            self.slots[self.counter.current_frame()].reset_acquire_semaphore(device)?;
        }
        Ok(())
    }

    /// acquire 下一张 swapchain image
    ///
    /// suboptimal 或 out-of-date 时重建 swapchain 并重试一次，重试仍然 out-of-date 则视为失败
    fn acquire(&mut self, device: &D) -> GfxResult<()> {
        let slot_index = self.counter.current_frame();
        let result = self.swapchain.acquire(&self.slots[slot_index].acquire_semaphore, self.fence_timeout)?;
        match result {
            AcquireResult::Acquired { suboptimal: false, .. } => return Ok(()),
            _ => log::warn!("{} swapchain acquire returned {:?}, recreate", self.counter.frame_name(), result),
        }

        self.recreate_swapchain(device)?;
        self.slots[slot_index].reset_acquire_semaphore(device)?;

        match self.swapchain.acquire(&self.slots[slot_index].acquire_semaphore, self.fence_timeout)? {
            AcquireResult::Acquired { suboptimal, .. } => {
                if suboptimal {
                    log::warn!("swapchain still suboptimal after recreation");
                }
                Ok(())
            }
            AcquireResult::OutOfDate => {
                Err(GfxError::AcquireNextImageFailed("swapchain out of date after recreation".to_string()))
            }
        }
    }

    fn recreate_swapchain(&mut self, device: &D) -> GfxResult<()> {
        device.wait_idle()?;
        self.swapchain.recreate(device, self.desired_extent)?;
        self.resize_pending = false;
        Ok(())
    }

    /// 窗口尺寸变化。extent 为 0 时延迟到下一次非零的 resize 再重建
    pub fn resize(&mut self, device: &D, extent: Extent2D) -> GfxResult<()> {
        assert_eq!(self.phase, FramePhase::Idle, "resize inside a frame");
        if extent.is_zero() {
            log::debug!("resize to zero extent, defer swapchain recreation");
            self.resize_pending = true;
            return Ok(());
        }
        if extent == self.swapchain.extent() && !self.resize_pending {
            return Ok(());
        }
        self.desired_extent = extent;
        self.recreate_swapchain(device)
    }
}

// getters
impl<D: RhiDevice> FrameScheduler<D> {
    #[inline]
    pub fn current_frame(&self) -> usize {
        self.counter.current_frame()
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.counter.frame_id()
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.phase == FramePhase::Recording
    }

    #[inline]
    pub fn resize_pending(&self) -> bool {
        self.resize_pending
    }

    #[inline]
    pub fn swapchain(&self) -> &Swapchain<D> {
        &self.swapchain
    }

    #[inline]
    pub fn slot(&self, index: usize) -> &FrameSlot<D> {
        &self.slots[index]
    }

    /// 当前帧的 recorder 与 swapchain
    #[inline]
    pub(crate) fn frame_parts(&mut self) -> (&mut CommandRecorder<D>, &mut Swapchain<D>) {
        assert_eq!(self.phase, FramePhase::Recording, "no frame is recording");
        let slot_index = self.counter.current_frame();
        (&mut self.slots[slot_index].recorder, &mut self.swapchain)
    }
}

// destroy
impl<D: RhiDevice> FrameScheduler<D> {
    /// 调用方需保证设备已经 idle
    pub fn destroy(self, device: &D) {
        debug_assert_eq!(self.phase, FramePhase::Idle, "frame scheduler destroyed inside a frame");
        for slot in self.slots {
            slot.destroy(device);
        }
        self.swapchain.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessDevice, ScriptedAcquire, ScriptedPresent};
    use crate::commands::command_recorder::RecorderState;

    fn scheduler(device: &HeadlessDevice) -> (Queue<HeadlessDevice>, FrameScheduler<HeadlessDevice>) {
        crate::test_utils::setup();
        let queue = Queue::new(device.create_queue(0, "graphics").unwrap(), "graphics");
        let scheduler = FrameScheduler::new(device, &queue, &GfxSettings::default(), Extent2D::new(32, 32)).unwrap();
        (queue, scheduler)
    }

    #[test]
    fn test_phase_cycle() {
        let device = HeadlessDevice::default();
        let (mut queue, mut scheduler) = scheduler(&device);
        assert_eq!(scheduler.phase(), FramePhase::Idle);

        scheduler.begin_frame(&device, &queue).unwrap();
        assert_eq!(scheduler.phase(), FramePhase::Recording);
        assert!(scheduler.swapchain().is_acquired());
        {
            let (recorder, _) = scheduler.frame_parts();
            assert_eq!(recorder.state(), RecorderState::Recording);
        }

        scheduler.end_frame(&device, &mut queue).unwrap();
        assert_eq!(scheduler.phase(), FramePhase::Idle);
        assert!(!scheduler.swapchain().is_acquired());
        assert_eq!(scheduler.slot(0).fence_value(), 1);
        assert_eq!(scheduler.slot(0).recorder().state(), RecorderState::Submitted);
        assert_eq!(scheduler.current_frame(), 1);

        scheduler.destroy(&device);
        queue.destroy(&device);
    }

    #[test]
    fn test_acquire_failure_returns_to_idle() {
        let device = HeadlessDevice::default();
        let probe = device.probe();
        let (queue, mut scheduler) = scheduler(&device);

        probe.script_acquire(ScriptedAcquire::Fail);
        assert!(scheduler.begin_frame(&device, &queue).is_err());
        assert_eq!(scheduler.phase(), FramePhase::Idle);
        assert_eq!(probe.swapchain_creations(), 1);

        scheduler.destroy(&device);
        queue.destroy(&device);
    }

    #[test]
    fn test_present_failure_returns_to_idle() {
        let device = HeadlessDevice::default();
        let probe = device.probe();
        let (mut queue, mut scheduler) = scheduler(&device);

        scheduler.begin_frame(&device, &queue).unwrap();
        probe.script_present(ScriptedPresent::Fail);
        assert!(matches!(scheduler.end_frame(&device, &mut queue), Err(GfxError::PresentFailed(_))));
        assert_eq!(scheduler.phase(), FramePhase::Idle);
        assert!(!scheduler.swapchain().is_acquired());
        // 提交已经发生，slot 的 fence 值保留
        assert_eq!(scheduler.slot(0).fence_value(), 1);

        scheduler.begin_frame(&device, &queue).unwrap();
        scheduler.end_frame(&device, &mut queue).unwrap();
        assert_eq!(scheduler.phase(), FramePhase::Idle);
        assert_eq!(probe.present_count(), 2);

        scheduler.destroy(&device);
        queue.destroy(&device);
    }

    #[test]
    fn test_submit_failure_discards_frame() {
        let device = HeadlessDevice::default();
        let probe = device.probe();
        let (mut queue, mut scheduler) = scheduler(&device);

        scheduler.begin_frame(&device, &queue).unwrap();
        {
            let (recorder, swapchain) = scheduler.frame_parts();
            swapchain.transition_current(recorder, ImageState::COLOR_ATTACHMENT);
        }
        probe.fail_next_submits(1);
        assert!(matches!(scheduler.end_frame(&device, &mut queue), Err(GfxError::SubmitFailed(_))));
        assert_eq!(scheduler.phase(), FramePhase::Idle);
        assert!(!scheduler.swapchain().is_acquired());
        assert_eq!(scheduler.swapchain().current_state(), ImageState::UNDEFINED);
        assert_eq!(scheduler.slot(0).fence_value(), 0);
        assert_eq!(scheduler.current_frame(), 0);
        assert_eq!(probe.present_count(), 0);

        scheduler.begin_frame(&device, &queue).unwrap();
        scheduler.end_frame(&device, &mut queue).unwrap();
        assert_eq!(scheduler.current_frame(), 1);
        assert_eq!(probe.present_count(), 1);

        scheduler.destroy(&device);
        queue.destroy(&device);
    }

    #[test]
    fn test_frame_waits_on_acquire_for_all_commands() {
        let device = HeadlessDevice::default();
        let probe = device.probe();
        let (mut queue, mut scheduler) = scheduler(&device);

        scheduler.begin_frame(&device, &queue).unwrap();
        scheduler.end_frame(&device, &mut queue).unwrap();
        let submission = probe.last_submission().unwrap();
        assert_eq!(submission.wait_stages.len(), 1);
        assert_eq!(submission.wait_stages[0], PipelineStages::ALL_COMMANDS);

        scheduler.destroy(&device);
        queue.destroy(&device);
    }

    #[test]
    #[should_panic(expected = "end_frame called without begin_frame")]
    fn test_end_without_begin_panics() {
        let device = HeadlessDevice::default();
        let (mut queue, mut scheduler) = scheduler(&device);
        let _ = scheduler.end_frame(&device, &mut queue);
    }
}
