use std::collections::VecDeque;

use crate::backend::RhiDevice;
use crate::descriptors::descriptor_allocator::{DescriptorAllocator, DescriptorSlot};

/// 等待 GPU 释放的资源
pub enum DeferredResource<D: RhiDevice> {
    Buffer(D::Buffer),
    Texture(D::Texture),
    Sampler(D::Sampler),
    Shader(D::Shader),
}

struct DeferredEntry<D: RhiDevice> {
    resource: DeferredResource<D>,
    slots: Vec<DescriptorSlot>,
    /// graphics queue 到达该值后资源才可以被回收
    retire_value: u64,
}

/// 延迟销毁队列
///
/// 资源在被销毁时可能仍被正在执行的帧引用，因此先记录下 graphics queue 对应的 timeline 值，
/// 等 queue 完成该值之后，才真正销毁原生对象并归还 descriptor slot。
/// 在每次 BeginFrame 时检查，在 teardown 时全部清空。
///
/// 帧录制期间销毁的资源可能被当前帧引用，而当前帧的 timeline 值要到提交时才确定，
/// 因此先放入 pending 列表，由 [`Self::retire_pending`] 在提交之后填入该值。
pub struct DeferredDestroyQueue<D: RhiDevice> {
    entries: VecDeque<DeferredEntry<D>>,
    pending: Vec<(DeferredResource<D>, Vec<DescriptorSlot>)>,
}

impl<D: RhiDevice> Default for DeferredDestroyQueue<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: RhiDevice> DeferredDestroyQueue<D> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            pending: Vec::new(),
        }
    }

    pub fn push(&mut self, resource: DeferredResource<D>, slots: Vec<DescriptorSlot>, retire_value: u64) {
        debug_assert!(self.entries.back().is_none_or(|last| last.retire_value <= retire_value));
        self.entries.push_back(DeferredEntry {
            resource,
            slots,
            retire_value,
        });
    }

    /// 等待当前帧提交之后再确定 retire value
    pub fn push_pending(&mut self, resource: DeferredResource<D>, slots: Vec<DescriptorSlot>) {
        self.pending.push((resource, slots));
    }

    /// 当前帧已经以 `retire_value` 提交
    pub fn retire_pending(&mut self, retire_value: u64) {
        for (resource, slots) in std::mem::take(&mut self.pending) {
            self.push(resource, slots, retire_value);
        }
    }

    /// 回收所有 retire_value 不超过 `completed_value` 的资源，返回回收的数量
    pub fn collect(&mut self, completed_value: u64, device: &D, descriptors: &DescriptorAllocator) -> usize {
        let _span = tracy_client::span!("DeferredDestroyQueue::collect");
        let mut count = 0;
        while self.entries.front().is_some_and(|entry| entry.retire_value <= completed_value) {
            if let Some(entry) = self.entries.pop_front() {
                Self::release(entry, device, descriptors);
                count += 1;
            }
        }
        if count > 0 {
            log::debug!("deferred destroy: released {} resources (completed value {})", count, completed_value);
        }
        count
    }

    /// 不检查 timeline，回收所有资源。调用方需保证设备已经 idle
    pub fn drain(&mut self, device: &D, descriptors: &DescriptorAllocator) -> usize {
        self.retire_pending(u64::MAX);
        let count = self.entries.len();
        for entry in self.entries.drain(..) {
            Self::release(entry, device, descriptors);
        }
        count
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len() + self.pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.pending.is_empty()
    }

    fn release(entry: DeferredEntry<D>, device: &D, descriptors: &DescriptorAllocator) {
        match entry.resource {
            DeferredResource::Buffer(buffer) => device.destroy_buffer(buffer),
            DeferredResource::Texture(texture) => device.destroy_texture(texture),
            DeferredResource::Sampler(sampler) => device.destroy_sampler(sampler),
            DeferredResource::Shader(shader) => device.destroy_shader(shader),
        }
        for slot in entry.slots {
            descriptors.free(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessDevice;
    use crate::descriptors::descriptor_allocator::DescriptorKind;
    use crate::resources::buffer::{BufferDesc, BufferType};
    use crate::settings::DescriptorCapacities;

    #[test]
    fn test_collect_respects_retire_value() {
        crate::test_utils::setup();
        let device = HeadlessDevice::default();
        let probe = device.probe();
        let descriptors = DescriptorAllocator::new(&DescriptorCapacities::default(), |_| u32::MAX);
        let mut queue = DeferredDestroyQueue::<HeadlessDevice>::new();

        for retire in [1, 2, 3] {
            let buffer = device.create_buffer(&BufferDesc::new(16, BufferType::Storage, "b")).unwrap();
            let slot = descriptors.allocate(DescriptorKind::StorageBuffer).unwrap();
            queue.push(DeferredResource::Buffer(buffer), vec![slot], retire);
        }
        assert_eq!(probe.live_buffers(), 3);

        assert_eq!(queue.collect(0, &device, &descriptors), 0);
        assert_eq!(queue.collect(2, &device, &descriptors), 2);
        assert_eq!(probe.live_buffers(), 1);
        assert_eq!(descriptors.live_count(DescriptorKind::StorageBuffer), 1);

        assert_eq!(queue.drain(&device, &descriptors), 1);
        assert!(queue.is_empty());
        assert_eq!(probe.live_buffers(), 0);
    }

    #[test]
    fn test_pending_waits_for_retire_value() {
        crate::test_utils::setup();
        let device = HeadlessDevice::default();
        let probe = device.probe();
        let descriptors = DescriptorAllocator::new(&DescriptorCapacities::default(), |_| u32::MAX);
        let mut queue = DeferredDestroyQueue::<HeadlessDevice>::new();

        let buffer = device.create_buffer(&BufferDesc::new(16, BufferType::Index, "ib")).unwrap();
        queue.push_pending(DeferredResource::Buffer(buffer), Vec::new());
        assert_eq!(queue.len(), 1);

        // pending 中的资源不会被 collect 回收
        assert_eq!(queue.collect(100, &device, &descriptors), 0);

        queue.retire_pending(5);
        assert_eq!(queue.collect(4, &device, &descriptors), 0);
        assert_eq!(queue.collect(5, &device, &descriptors), 1);
        assert_eq!(probe.live_buffers(), 0);
    }
}
