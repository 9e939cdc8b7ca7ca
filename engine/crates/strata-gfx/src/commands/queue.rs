use std::time::Duration;

use itertools::Itertools;

use crate::backend::{QueueSubmit, RhiDevice, RhiQueue};
use crate::commands::command_recorder::{CommandRecorder, RecorderState};
use crate::commands::submit_info::SubmitInfo;
use crate::error::{GfxError, GfxResult};

/// 队列，拥有一条单调递增的 timeline
///
/// 每次提交都会在 timeline 上 signal 一个新的值，GPU 的进度完全通过该值来追踪。
/// 不同的 Queue 是相互独立的同步域。
pub struct Queue<D: RhiDevice> {
    native: D::Queue,
    last_submitted: u64,
    name: String,
}

// new & init
impl<D: RhiDevice> Queue<D> {
    pub fn new(native: D::Queue, name: impl AsRef<str>) -> Self {
        Self {
            native,
            last_submitted: 0,
            name: name.as_ref().to_string(),
        }
    }
}

// submit
impl<D: RhiDevice> Queue<D> {
    /// 提交处于 Executable 状态的 command recorder，返回本次提交在 timeline 上的值
    pub fn submit(&mut self, recorders: &mut [&mut CommandRecorder<D>], info: &SubmitInfo<'_, D>) -> GfxResult<u64> {
        let _span = tracy_client::span!("Queue::submit");
        for recorder in recorders.iter() {
            assert_eq!(
                recorder.state(),
                RecorderState::Executable,
                "command recorder {} submitted without end",
                recorder.name()
            );
        }

        let value = self.last_submitted + 1;
        {
            let command_lists = recorders.iter().map(|recorder| recorder.native()).collect_vec();
            self.native.submit(&QueueSubmit {
                command_lists: &command_lists,
                waits: &info.waits,
                signals: &info.signals,
                timeline_value: value,
            })?;
        }
        self.last_submitted = value;

        for recorder in recorders.iter_mut() {
            recorder.mark_submitted(value);
        }
        Ok(value)
    }

    /// 不需要额外 semaphore 的提交
    #[inline]
    pub fn execute(&mut self, recorders: &mut [&mut CommandRecorder<D>]) -> GfxResult<u64> {
        self.submit(recorders, &SubmitInfo::new())
    }

    /// 提交一个空的 batch，只 signal 下一个 timeline 值
    pub fn signal_next(&mut self) -> GfxResult<u64> {
        self.submit(&mut [], &SubmitInfo::new())
    }
}

// wait
impl<D: RhiDevice> Queue<D> {
    /// 阻塞直到 timeline 到达 `value`
    pub fn wait(&self, value: u64) -> GfxResult<()> {
        if self.native.wait_value(value, None)? {
            Ok(())
        } else {
            Err(GfxError::FenceWaitFailed(format!("queue {} failed to reach {}", self.name, value)))
        }
    }

    /// 阻塞直到 timeline 到达 `value`，超时视为错误
    pub fn wait_timeout(&self, value: u64, timeout: Duration) -> GfxResult<()> {
        if value == 0 {
            return Ok(());
        }
        if self.native.wait_value(value, Some(timeout))? {
            Ok(())
        } else {
            Err(GfxError::FenceTimeout {
                value,
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }

    /// 提交一个空 batch 并等待其完成
    pub fn wait_idle(&mut self) -> GfxResult<()> {
        let value = self.signal_next()?;
        self.wait(value)
    }
}

// getters
impl<D: RhiDevice> Queue<D> {
    #[inline]
    pub fn last_submitted(&self) -> u64 {
        self.last_submitted
    }

    #[inline]
    pub fn completed_value(&self) -> GfxResult<u64> {
        self.native.completed_value()
    }

    #[inline]
    pub fn is_complete(&self, value: u64) -> GfxResult<bool> {
        Ok(self.completed_value()? >= value)
    }

    #[inline]
    pub fn native(&self) -> &D::Queue {
        &self.native
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

// destroy
impl<D: RhiDevice> Queue<D> {
    pub fn destroy(self, device: &D) {
        device.destroy_queue(self.native);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessConfig, HeadlessDevice};

    fn manual_device() -> HeadlessDevice {
        crate::test_utils::setup();
        HeadlessDevice::new(HeadlessConfig {
            auto_signal: false,
            ..Default::default()
        })
    }

    #[test]
    fn test_execute_values_strictly_increase() {
        let device = HeadlessDevice::default();
        crate::test_utils::setup();
        let mut queue = Queue::<HeadlessDevice>::new(device.create_queue(0, "graphics").unwrap(), "graphics");
        let mut rec = CommandRecorder::new(device.create_command_list(queue.native(), "cmd").unwrap(), "cmd");

        let mut last = 0;
        for _ in 0..3 {
            rec.begin().unwrap();
            rec.end().unwrap();
            let value = queue.execute(&mut [&mut rec]).unwrap();
            assert!(value > last);
            assert_eq!(rec.submitted_value(), value);
            last = value;
        }
        assert_eq!(queue.last_submitted(), 3);
    }

    #[test]
    fn test_wait_timeout_reports_error() {
        let device = manual_device();
        let probe = device.probe();
        let mut queue = Queue::<HeadlessDevice>::new(device.create_queue(0, "graphics").unwrap(), "graphics");

        let value = queue.signal_next().unwrap();
        let err = queue.wait_timeout(value, Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, GfxError::FenceTimeout { value: 1, .. }));

        probe.signal_up_to(0, value);
        queue.wait_timeout(value, Duration::from_millis(1)).unwrap();
        assert!(queue.is_complete(value).unwrap());
    }

    #[test]
    fn test_wait_idle_signals_next_value() {
        let device = HeadlessDevice::default();
        let probe = device.probe();
        let mut queue = Queue::<HeadlessDevice>::new(device.create_queue(0, "graphics").unwrap(), "graphics");
        queue.wait_idle().unwrap();
        queue.wait_idle().unwrap();
        assert_eq!(queue.last_submitted(), 2);
        assert_eq!(probe.completed_value(0), 2);
    }

    #[test]
    fn test_queues_are_independent() {
        let device = manual_device();
        let probe = device.probe();
        let mut a = Queue::<HeadlessDevice>::new(device.create_queue(0, "a").unwrap(), "a");
        let mut b = Queue::<HeadlessDevice>::new(device.create_queue(1, "b").unwrap(), "b");
        a.signal_next().unwrap();
        b.signal_next().unwrap();

        probe.signal_up_to(1, 1);
        assert!(!a.is_complete(1).unwrap());
        assert!(b.is_complete(1).unwrap());
    }

    #[test]
    fn test_unended_recorder_rejected_before_native_submit() {
        let device = HeadlessDevice::default();
        let probe = device.probe();
        crate::test_utils::setup();
        let mut queue = Queue::<HeadlessDevice>::new(device.create_queue(0, "graphics").unwrap(), "graphics");
        let mut rec = CommandRecorder::new(device.create_command_list(queue.native(), "cmd").unwrap(), "cmd");
        rec.begin().unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| queue.execute(&mut [&mut rec])));
        assert!(result.is_err());
        assert!(probe.submissions().is_empty());
        assert_eq!(probe.submitted_value(0), 0);
        assert_eq!(queue.last_submitted(), 0);
        assert_eq!(rec.state(), RecorderState::Recording);
    }

    #[test]
    fn test_failed_submit_keeps_recorder_executable() {
        let device = HeadlessDevice::default();
        let probe = device.probe();
        crate::test_utils::setup();
        let mut queue = Queue::<HeadlessDevice>::new(device.create_queue(0, "graphics").unwrap(), "graphics");
        let mut rec = CommandRecorder::new(device.create_command_list(queue.native(), "cmd").unwrap(), "cmd");
        rec.begin().unwrap();
        rec.end().unwrap();

        probe.fail_next_submits(1);
        assert!(matches!(queue.execute(&mut [&mut rec]), Err(GfxError::SubmitFailed(_))));
        assert_eq!(queue.last_submitted(), 0);
        assert_eq!(rec.state(), RecorderState::Executable);

        assert_eq!(queue.execute(&mut [&mut rec]).unwrap(), 1);
        assert_eq!(rec.state(), RecorderState::Submitted);
    }
}
