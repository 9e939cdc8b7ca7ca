use crate::backend::{BufferBarrier, ImageBarrier, RhiCommandList, RhiDevice, RhiTexture};
use crate::commands::barrier_batch::BarrierBatch;
use crate::error::GfxResult;
use crate::handles::ShaderHandle;
use crate::sync::resource_state::{BufferState, ImageState};
use crate::sync::state_tracker::{BufferBarrierDesc, ImageBarrierDesc, ResourceStateTracker};

/// command list 的录制状态
///
/// `Initial → Recording → Executable → Submitted → Initial`（begin 时隐式 reset）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Initial,
    Recording,
    Executable,
    Submitted,
}

/// 对原生 command list 的封装
///
/// 负责录制状态的检查，并将所有的状态转换交给 [`ResourceStateTracker`]，生成的 barrier 立即录制。
pub struct CommandRecorder<D: RhiDevice> {
    native: D::CommandList,
    state: RecorderState,
    /// 最近一次提交对应的 timeline 值
    submitted_value: u64,

    bound_shader: Option<ShaderHandle>,
    in_rendering: bool,

    name: String,
}

// new & init
impl<D: RhiDevice> CommandRecorder<D> {
    pub fn new(native: D::CommandList, name: impl AsRef<str>) -> Self {
        Self {
            native,
            state: RecorderState::Initial,
            submitted_value: 0,
            bound_shader: None,
            in_rendering: false,
            name: name.as_ref().to_string(),
        }
    }
}

// 基础命令
impl<D: RhiDevice> CommandRecorder<D> {
    /// 重置并开始录制
    ///
    /// 调用方需保证上一次提交已经执行完毕（由 FrameScheduler 的 fence 等待保证）
    pub fn begin(&mut self) -> GfxResult<()> {
        assert_ne!(self.state, RecorderState::Recording, "command recorder {} begin twice", self.name);
        self.native.reset()?;
        self.native.begin()?;
        self.state = RecorderState::Recording;
        self.bound_shader = None;
        self.in_rendering = false;
        Ok(())
    }

    pub fn end(&mut self) -> GfxResult<()> {
        assert_eq!(self.state, RecorderState::Recording, "command recorder {} end without begin", self.name);
        assert!(!self.in_rendering, "command recorder {} end inside rendering", self.name);
        // 结束失败的 command list 不可再提交，需要重新 begin
        if let Err(err) = self.native.end() {
            self.state = RecorderState::Initial;
            return Err(err);
        }
        self.state = RecorderState::Executable;
        Ok(())
    }

    pub(crate) fn mark_submitted(&mut self, value: u64) {
        assert_eq!(self.state, RecorderState::Executable, "command recorder {} is not executable", self.name);
        self.state = RecorderState::Submitted;
        self.submitted_value = value;
    }

    /// 获取原生 command list 以录制命令，只能在 Recording 状态下调用
    #[inline]
    pub fn cmd(&mut self) -> &mut D::CommandList {
        assert_eq!(self.state, RecorderState::Recording, "command recorder {} is not recording", self.name);
        &mut self.native
    }
}

// 状态转换
impl<D: RhiDevice> CommandRecorder<D> {
    pub fn transition_image(
        &mut self,
        texture: &D::Texture,
        current: &mut ImageState,
        new: ImageState,
    ) -> ImageBarrierDesc {
        debug_assert!(!self.in_rendering, "image transition inside rendering");
        let desc = ResourceStateTracker::transition_image(current, new, texture.format());
        self.cmd().barriers(&[ImageBarrier { texture, desc }], &[]);
        desc
    }

    pub fn transition_buffer(
        &mut self,
        buffer: &D::Buffer,
        current: &mut BufferState,
        new: BufferState,
    ) -> BufferBarrierDesc {
        debug_assert!(!self.in_rendering, "buffer transition inside rendering");
        let desc = ResourceStateTracker::transition_buffer(current, new);
        self.cmd().barriers(&[], &[BufferBarrier { buffer, desc }]);
        desc
    }

    /// 将 batch 中的所有 barrier 作为一次调用录制
    pub fn flush_barriers(&mut self, batch: BarrierBatch<'_, D>) {
        let _span = tracy_client::span!("CommandRecorder::flush_barriers");
        if batch.is_empty() {
            return;
        }
        self.emit_barriers(&batch.images, &batch.buffers);
    }

    /// 录制已经由 [`ResourceStateTracker`] 计算好的 barrier
    pub(crate) fn emit_barriers(&mut self, images: &[ImageBarrier<'_, D>], buffers: &[BufferBarrier<'_, D>]) {
        debug_assert!(!self.in_rendering, "barrier inside rendering");
        self.cmd().barriers(images, buffers);
    }
}

// getters
impl<D: RhiDevice> CommandRecorder<D> {
    #[inline]
    pub fn state(&self) -> RecorderState {
        self.state
    }

    #[inline]
    pub fn submitted_value(&self) -> u64 {
        self.submitted_value
    }

    #[inline]
    pub fn native(&self) -> &D::CommandList {
        &self.native
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn bound_shader(&self) -> Option<ShaderHandle> {
        self.bound_shader
    }

    #[inline]
    pub(crate) fn set_bound_shader(&mut self, shader: ShaderHandle) {
        self.bound_shader = Some(shader);
    }

    #[inline]
    pub fn in_rendering(&self) -> bool {
        self.in_rendering
    }

    #[inline]
    pub(crate) fn set_in_rendering(&mut self, in_rendering: bool) {
        debug_assert_ne!(self.in_rendering, in_rendering, "unbalanced begin/end rendering");
        self.in_rendering = in_rendering;
    }
}

// destroy
impl<D: RhiDevice> CommandRecorder<D> {
    pub fn destroy(self, device: &D) {
        debug_assert_ne!(self.state, RecorderState::Recording, "command recorder {} destroyed while recording", self.name);
        device.destroy_command_list(self.native);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessCommand, HeadlessDevice};
    use crate::backend::RhiDevice;
    use crate::basic::format::TextureFormat;
    use crate::handles::ImageUsage;
    use crate::resources::texture::TextureDesc;
    use crate::sync::resource_state::ImageLayout;

    fn recorder(device: &HeadlessDevice) -> CommandRecorder<HeadlessDevice> {
        crate::test_utils::setup();
        let queue = device.create_queue(0, "graphics").unwrap();
        CommandRecorder::new(device.create_command_list(&queue, "test").unwrap(), "test")
    }

    #[test]
    fn test_state_machine() {
        let device = HeadlessDevice::default();
        let mut rec = recorder(&device);
        assert_eq!(rec.state(), RecorderState::Initial);

        rec.begin().unwrap();
        assert_eq!(rec.state(), RecorderState::Recording);
        rec.end().unwrap();
        assert_eq!(rec.state(), RecorderState::Executable);

        rec.mark_submitted(1);
        assert_eq!(rec.state(), RecorderState::Submitted);
        assert_eq!(rec.submitted_value(), 1);

        rec.begin().unwrap();
        assert_eq!(rec.state(), RecorderState::Recording);
    }

    #[test]
    #[should_panic]
    fn test_double_end_panics() {
        let device = HeadlessDevice::default();
        let mut rec = recorder(&device);
        rec.begin().unwrap();
        rec.end().unwrap();
        let _ = rec.end();
    }

    #[test]
    #[should_panic]
    fn test_command_outside_recording_panics() {
        let device = HeadlessDevice::default();
        let mut rec = recorder(&device);
        rec.cmd().dispatch(1, 1, 1);
    }

    #[test]
    fn test_transition_emits_barrier_immediately() {
        let device = HeadlessDevice::default();
        let texture = device
            .create_texture(&TextureDesc::new_2d(4, 4, TextureFormat::Rgba8Unorm, ImageUsage::Sampled))
            .unwrap();
        let mut rec = recorder(&device);
        rec.begin().unwrap();

        let mut state = ImageState::UNDEFINED;
        rec.transition_image(&texture, &mut state, ImageState::for_layout(ImageLayout::TransferDst));
        rec.cmd().dispatch(1, 1, 1);

        let commands = rec.native().commands();
        assert_eq!(commands.len(), 2);
        assert!(matches!(&commands[0], HeadlessCommand::Barrier { images, .. } if images.len() == 1));
        assert_eq!(state, ImageState::TRANSFER_DST);
    }

    #[test]
    fn test_barrier_batch_single_call() {
        let device = HeadlessDevice::default();
        let desc = TextureDesc::new_2d(4, 4, TextureFormat::Rgba8Unorm, ImageUsage::Sampled);
        let a = device.create_texture(&desc).unwrap();
        let b = device.create_texture(&desc).unwrap();
        let mut rec = recorder(&device);
        rec.begin().unwrap();

        let mut state_a = ImageState::UNDEFINED;
        let mut state_b = ImageState::UNDEFINED;
        let mut batch = BarrierBatch::new();
        batch.image(&a, &mut state_a, ImageState::TRANSFER_SRC).image(&b, &mut state_b, ImageState::TRANSFER_DST);
        assert_eq!(batch.len(), 2);
        rec.flush_barriers(batch);

        let commands = rec.native().commands();
        assert_eq!(commands.len(), 1);
        assert!(matches!(&commands[0], HeadlessCommand::Barrier { images, .. } if images.len() == 2));
    }
}
