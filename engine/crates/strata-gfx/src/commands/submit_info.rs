use crate::backend::{RhiDevice, SemaphoreWait};
use crate::sync::resource_state::PipelineStages;

/// 提交时需要等待与 signal 的 binary semaphore
///
/// timeline 的值由 [`Queue`](crate::commands::queue::Queue) 自动分配，不在这里指定
pub struct SubmitInfo<'a, D: RhiDevice> {
    pub(crate) waits: Vec<SemaphoreWait<'a, D>>,
    pub(crate) signals: Vec<&'a D::Semaphore>,
}

impl<D: RhiDevice> Default for SubmitInfo<'_, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, D: RhiDevice> SubmitInfo<'a, D> {
    pub fn new() -> Self {
        Self {
            waits: Vec::new(),
            signals: Vec::new(),
        }
    }

    #[inline]
    pub fn wait(mut self, semaphore: &'a D::Semaphore, stage: PipelineStages) -> Self {
        self.waits.push(SemaphoreWait { semaphore, stage });
        self
    }

    #[inline]
    pub fn signal(mut self, semaphore: &'a D::Semaphore) -> Self {
        self.signals.push(semaphore);
        self
    }
}
