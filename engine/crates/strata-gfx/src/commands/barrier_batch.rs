use crate::backend::{BufferBarrier, ImageBarrier, RhiDevice, RhiTexture};
use crate::sync::resource_state::{BufferState, ImageState};
use crate::sync::state_tracker::ResourceStateTracker;

/// 收集多个 barrier，通过 [`CommandRecorder::flush_barriers`] 一次性提交
///
/// 加入 batch 时立即更新资源的状态，因此 batch 必须在下一条使用这些资源的命令之前 flush
///
/// [`CommandRecorder::flush_barriers`]: crate::commands::command_recorder::CommandRecorder::flush_barriers
pub struct BarrierBatch<'a, D: RhiDevice> {
    pub(crate) images: Vec<ImageBarrier<'a, D>>,
    pub(crate) buffers: Vec<BufferBarrier<'a, D>>,
}

impl<D: RhiDevice> Default for BarrierBatch<'_, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, D: RhiDevice> BarrierBatch<'a, D> {
    pub fn new() -> Self {
        Self {
            images: Vec::new(),
            buffers: Vec::new(),
        }
    }

    pub fn image(&mut self, texture: &'a D::Texture, current: &mut ImageState, new: ImageState) -> &mut Self {
        let desc = ResourceStateTracker::transition_image(current, new, texture.format());
        self.images.push(ImageBarrier { texture, desc });
        self
    }

    pub fn buffer(&mut self, buffer: &'a D::Buffer, current: &mut BufferState, new: BufferState) -> &mut Self {
        let desc = ResourceStateTracker::transition_buffer(current, new);
        self.buffers.push(BufferBarrier { buffer, desc });
        self
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.buffers.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.images.len() + self.buffers.len()
    }
}
