use crate::backend::RhiDevice;
use crate::commands::command_recorder::CommandRecorder;
use crate::commands::queue::Queue;
use crate::error::GfxResult;

/// 单个 frame in flight 所需的对象
///
/// 在 Context 创建时分配，每帧复用，只在 teardown（设备 idle 之后）销毁
pub struct FrameSlot<D: RhiDevice> {
    pub(crate) recorder: CommandRecorder<D>,
    /// 该 slot 最近一次提交在 graphics timeline 上的值
    pub(crate) fence_value: u64,
    pub(crate) acquire_semaphore: D::Semaphore,
    pub(crate) render_semaphore: D::Semaphore,
}

// new & init
impl<D: RhiDevice> FrameSlot<D> {
    pub fn new(device: &D, queue: &Queue<D>, index: usize) -> GfxResult<Self> {
        let name = format!("frame-{index}");
        let native = device.create_command_list(queue.native(), &name)?;
        Ok(Self {
            recorder: CommandRecorder::new(native, &name),
            fence_value: 0,
            acquire_semaphore: device.create_semaphore(&format!("{name}-acquire"))?,
            render_semaphore: device.create_semaphore(&format!("{name}-render"))?,
        })
    }
}

impl<D: RhiDevice> FrameSlot<D> {
    /// 替换 acquire semaphore
    ///
    /// acquire 返回 suboptimal 时 semaphore 已经被 signal，但是这次 acquire 的结果被丢弃，
    /// 该 semaphore 不会再被等待，只能在设备 idle 之后重新创建
    pub(crate) fn reset_acquire_semaphore(&mut self, device: &D) -> GfxResult<()> {
        let fresh = device.create_semaphore(&format!("{}-acquire", self.recorder.name()))?;
        let old = std::mem::replace(&mut self.acquire_semaphore, fresh);
        device.destroy_semaphore(old);
        Ok(())
    }

    #[inline]
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    #[inline]
    pub fn recorder(&self) -> &CommandRecorder<D> {
        &self.recorder
    }

    pub fn destroy(self, device: &D) {
        self.recorder.destroy(device);
        device.destroy_semaphore(self.acquire_semaphore);
        device.destroy_semaphore(self.render_semaphore);
    }
}
