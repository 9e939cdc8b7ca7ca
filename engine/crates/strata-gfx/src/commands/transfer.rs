use crate::backend::RhiDevice;
use crate::commands::command_recorder::CommandRecorder;
use crate::commands::queue::Queue;
use crate::error::GfxResult;

/// 传输作用域：`begin` 与 `end` 之间录制上传命令
///
/// `end` 会提交并在 CPU 端等待完成，之后释放本次作用域中创建的 staging buffer。
/// 因此作用域结束后，上传的数据对任意 queue 都是可见的。
///
/// `end` 失败时作用域同样结束：没有提交的 staging buffer 立即释放，已经提交但等待失败的
/// staging buffer 保留到下一次成功的 `end`（同一条 timeline 上更晚的值完成意味着它也已完成）。
pub struct TransferContext<D: RhiDevice> {
    recorder: CommandRecorder<D>,
    staging: Vec<D::Buffer>,
    active: bool,
}

// new & init
impl<D: RhiDevice> TransferContext<D> {
    pub fn new(device: &D, queue: &Queue<D>, name: &str) -> GfxResult<Self> {
        let native = device.create_command_list(queue.native(), name)?;
        Ok(Self {
            recorder: CommandRecorder::new(native, name),
            staging: Vec::new(),
            active: false,
        })
    }
}

impl<D: RhiDevice> TransferContext<D> {
    pub fn begin(&mut self) -> GfxResult<()> {
        assert!(!self.active, "transfer scope {} begin twice", self.recorder.name());
        self.recorder.begin()?;
        self.active = true;
        Ok(())
    }

    pub fn end(&mut self, device: &D, queue: &mut Queue<D>) -> GfxResult<()> {
        let _span = tracy_client::span!("TransferContext::end");
        assert!(self.active, "transfer scope {} end without begin", self.recorder.name());
        self.active = false;

        let submitted = self.recorder.end().and_then(|_| queue.execute(&mut [&mut self.recorder]));
        let value = match submitted {
            Ok(value) => value,
            Err(err) => {
                log::error!("transfer scope {} failed to submit: {}", self.recorder.name(), err);
                self.free_staging(device);
                return Err(err);
            }
        };
        if let Err(err) = queue.wait(value) {
            log::error!("transfer scope {} failed to wait for {}: {}", self.recorder.name(), value, err);
            return Err(err);
        }
        self.free_staging(device);
        Ok(())
    }

    fn free_staging(&mut self, device: &D) {
        let staging_count = self.staging.len();
        for buffer in self.staging.drain(..) {
            device.destroy_buffer(buffer);
        }
        if staging_count > 0 {
            log::debug!("transfer scope {} freed {} staging buffers", self.recorder.name(), staging_count);
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub(crate) fn parts(&mut self) -> (&mut CommandRecorder<D>, &mut Vec<D::Buffer>) {
        assert!(self.active, "transfer scope {} is not active", self.recorder.name());
        (&mut self.recorder, &mut self.staging)
    }

    pub fn destroy(mut self, device: &D) {
        debug_assert!(!self.active, "transfer scope destroyed while active");
        for buffer in self.staging.drain(..) {
            device.destroy_buffer(buffer);
        }
        self.recorder.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessConfig, HeadlessDevice};
    use crate::error::GfxError;
    use crate::resources::buffer::{BufferDesc, BufferType};

    fn transfer(device: &HeadlessDevice) -> (Queue<HeadlessDevice>, TransferContext<HeadlessDevice>) {
        crate::test_utils::setup();
        let queue = Queue::new(device.create_queue(0, "graphics").unwrap(), "graphics");
        let transfer = TransferContext::new(device, &queue, "transfer").unwrap();
        (queue, transfer)
    }

    fn push_staging(device: &HeadlessDevice, transfer: &mut TransferContext<HeadlessDevice>) {
        let buffer = device.create_buffer(&BufferDesc::new(16, BufferType::Staging, "staging")).unwrap();
        transfer.parts().1.push(buffer);
    }

    #[test]
    fn test_submit_failure_ends_scope_and_frees_staging() {
        let device = HeadlessDevice::default();
        let probe = device.probe();
        let (mut queue, mut transfer) = transfer(&device);

        transfer.begin().unwrap();
        push_staging(&device, &mut transfer);
        probe.fail_next_submits(1);
        assert!(matches!(transfer.end(&device, &mut queue), Err(GfxError::SubmitFailed(_))));
        assert!(!transfer.is_active());
        assert_eq!(probe.live_buffers(), 0);

        transfer.begin().unwrap();
        transfer.end(&device, &mut queue).unwrap();
        assert_eq!(queue.last_submitted(), 1);

        transfer.destroy(&device);
        queue.destroy(&device);
    }

    #[test]
    fn test_wait_failure_keeps_staging_until_next_scope() {
        let device = HeadlessDevice::new(HeadlessConfig {
            auto_signal: false,
            ..Default::default()
        });
        let probe = device.probe();
        let (mut queue, mut transfer) = transfer(&device);

        transfer.begin().unwrap();
        push_staging(&device, &mut transfer);
        assert!(matches!(transfer.end(&device, &mut queue), Err(GfxError::FenceWaitFailed(_))));
        assert!(!transfer.is_active());
        // 提交已经发生，staging buffer 可能仍在被读取
        assert_eq!(probe.live_buffers(), 1);

        probe.set_auto_signal(true);
        transfer.begin().unwrap();
        transfer.end(&device, &mut queue).unwrap();
        assert_eq!(probe.live_buffers(), 0);

        transfer.destroy(&device);
        queue.destroy(&device);
    }
}
