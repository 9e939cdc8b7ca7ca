use parking_lot::Mutex;

use crate::error::{GfxError, GfxResult};
use crate::settings::{DescriptorCapacities, PoolCapacity};

/// bindless descriptor 的种类，每种一个独立的 pool
///
/// 在 Vulkan 中对应全局 descriptor set 中的一个 binding，在 D3D12 中对应 shader visible heap 中的一段区间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    SampledImage,
    StorageImage,
    StorageBuffer,
    ConstantBuffer,
    Sampler,
}

impl DescriptorKind {
    pub const ALL: [Self; 5] =
        [Self::SampledImage, Self::StorageImage, Self::StorageBuffer, Self::ConstantBuffer, Self::Sampler];

    /// 在 bindless layout 中的 binding 编号
    #[inline]
    pub fn binding(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSlot {
    pub index: u32,
    pub kind: DescriptorKind,
}

/// 单个种类的 slot 池
///
/// `[0, next)` 范围内的索引要么存活，要么位于 free list 中
#[derive(Debug)]
struct DescriptorPool {
    kind: DescriptorKind,
    next: u32,
    free_list: Vec<u32>,
    capacity: u32,
    max: u32,
}

impl DescriptorPool {
    fn new(kind: DescriptorKind, capacity: PoolCapacity) -> Self {
        let max = capacity.max.max(1);
        Self {
            kind,
            next: 0,
            free_list: Vec::new(),
            capacity: capacity.initial.clamp(1, max),
            max,
        }
    }

    fn allocate(&mut self) -> GfxResult<u32> {
        if let Some(index) = self.free_list.pop() {
            return Ok(index);
        }

        if self.next == self.capacity {
            if self.capacity == self.max {
                return Err(GfxError::DescriptorExhausted {
                    kind: self.kind,
                    max: self.max,
                });
            }
            let new_capacity = self.capacity.saturating_mul(2).min(self.max);
            log::debug!("descriptor pool {:?} grow: {} -> {}", self.kind, self.capacity, new_capacity);
            self.capacity = new_capacity;
        }

        let index = self.next;
        self.next += 1;
        Ok(index)
    }

    fn free(&mut self, index: u32) {
        debug_assert!(index < self.next, "descriptor {:?} slot {} was never allocated", self.kind, index);
        debug_assert!(!self.free_list.contains(&index), "descriptor {:?} slot {} double free", self.kind, index);
        self.free_list.push(index);
    }

    #[inline]
    fn live_count(&self) -> u32 {
        self.next - self.free_list.len() as u32
    }
}

/// bindless descriptor slot 分配器
///
/// 分配、释放以及写入 descriptor 都在同一把锁内完成，
/// 因此主线程与 thread context 可以同时创建资源。
pub struct DescriptorAllocator {
    pools: Mutex<[DescriptorPool; 5]>,
}

// new & init
impl DescriptorAllocator {
    /// `limit` 为后端 descriptor 表的实际大小，配置的上限不会超过它
    pub fn new(capacities: &DescriptorCapacities, limit: impl Fn(DescriptorKind) -> u32) -> Self {
        let pools = DescriptorKind::ALL.map(|kind| {
            let mut capacity = capacities.get(kind);
            let backend_limit = limit(kind);
            if capacity.max > backend_limit {
                log::warn!("descriptor {:?} max {} exceeds backend limit {}", kind, capacity.max, backend_limit);
                capacity.max = backend_limit;
            }
            DescriptorPool::new(kind, capacity)
        });

        Self {
            pools: Mutex::new(pools),
        }
    }
}

// allocate & free
impl DescriptorAllocator {
    pub fn allocate(&self, kind: DescriptorKind) -> GfxResult<DescriptorSlot> {
        self.allocate_with(kind, |_| {})
    }

    /// 分配一个 slot，并在持有锁的情况下通过 `write` 将 descriptor 写入该 slot
    pub fn allocate_with(
        &self,
        kind: DescriptorKind,
        write: impl FnOnce(DescriptorSlot),
    ) -> GfxResult<DescriptorSlot> {
        let mut pools = self.pools.lock();
        let index = pools[kind as usize].allocate()?;
        let slot = DescriptorSlot { index, kind };
        write(slot);
        Ok(slot)
    }

    /// 在持有锁的情况下重写已有 slot 的内容
    pub fn rewrite(&self, slot: DescriptorSlot, write: impl FnOnce(DescriptorSlot)) {
        let pools = self.pools.lock();
        debug_assert!(slot.index < pools[slot.kind as usize].next);
        write(slot);
    }

    /// 释放 slot。调用方需保证 GPU 已经不再引用该 slot
    pub fn free(&self, slot: DescriptorSlot) {
        self.pools.lock()[slot.kind as usize].free(slot.index);
    }
}

// getters
impl DescriptorAllocator {
    #[inline]
    pub fn capacity(&self, kind: DescriptorKind) -> u32 {
        self.pools.lock()[kind as usize].capacity
    }

    #[inline]
    pub fn max_capacity(&self, kind: DescriptorKind) -> u32 {
        self.pools.lock()[kind as usize].max
    }

    #[inline]
    pub fn live_count(&self, kind: DescriptorKind) -> u32 {
        self.pools.lock()[kind as usize].live_count()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn allocator(initial: u32, max: u32) -> DescriptorAllocator {
        let cap = PoolCapacity::new(initial, max);
        let capacities = DescriptorCapacities {
            sampled_image: cap,
            storage_image: cap,
            storage_buffer: cap,
            constant_buffer: cap,
            sampler: cap,
        };
        DescriptorAllocator::new(&capacities, |_| u32::MAX)
    }

    #[test]
    fn test_slot_roundtrip() {
        let alloc = allocator(4, 16);
        let slot = alloc.allocate(DescriptorKind::SampledImage).unwrap();
        alloc.free(slot);
        let again = alloc.allocate(DescriptorKind::SampledImage).unwrap();
        assert_eq!(again.index, slot.index);
        assert_eq!(alloc.live_count(DescriptorKind::SampledImage), 1);
    }

    #[test]
    fn test_live_slots_unique() {
        let alloc = allocator(2, 64);
        let mut live = Vec::new();
        for i in 0..40 {
            live.push(alloc.allocate(DescriptorKind::StorageBuffer).unwrap());
            if i % 3 == 0 {
                alloc.free(live.remove(0));
            }
        }
        let indices = live.iter().map(|s| s.index).collect::<HashSet<_>>();
        assert_eq!(indices.len(), live.len());
        assert!(indices.iter().all(|&i| i < 64));
    }

    #[test]
    fn test_kinds_are_independent() {
        let alloc = allocator(4, 16);
        let a = alloc.allocate(DescriptorKind::SampledImage).unwrap();
        let b = alloc.allocate(DescriptorKind::StorageImage).unwrap();
        assert_eq!(a.index, 0);
        assert_eq!(b.index, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_grow_by_doubling_until_max() {
        let alloc = allocator(2, 5);
        assert_eq!(alloc.capacity(DescriptorKind::Sampler), 2);

        for _ in 0..3 {
            alloc.allocate(DescriptorKind::Sampler).unwrap();
        }
        assert_eq!(alloc.capacity(DescriptorKind::Sampler), 4);

        for _ in 0..2 {
            alloc.allocate(DescriptorKind::Sampler).unwrap();
        }
        assert_eq!(alloc.capacity(DescriptorKind::Sampler), 5);

        let err = alloc.allocate(DescriptorKind::Sampler).unwrap_err();
        assert!(matches!(err, GfxError::DescriptorExhausted { kind: DescriptorKind::Sampler, max: 5 }));
    }

    #[test]
    fn test_exhausted_pool_recovers_after_free() {
        let alloc = allocator(1, 1);
        let slot = alloc.allocate(DescriptorKind::ConstantBuffer).unwrap();
        assert!(alloc.allocate(DescriptorKind::ConstantBuffer).is_err());
        alloc.free(slot);
        assert!(alloc.allocate(DescriptorKind::ConstantBuffer).is_ok());
    }

    #[test]
    fn test_backend_limit_clamps_max() {
        let capacities = DescriptorCapacities::default();
        let alloc = DescriptorAllocator::new(&capacities, |kind| match kind {
            DescriptorKind::Sampler => 8,
            _ => u32::MAX,
        });
        assert_eq!(alloc.max_capacity(DescriptorKind::Sampler), 8);
    }

    #[test]
    fn test_allocate_with_writes_slot() {
        let alloc = allocator(4, 4);
        let mut written = None;
        let slot = alloc.allocate_with(DescriptorKind::StorageImage, |slot| written = Some(slot)).unwrap();
        assert_eq!(written, Some(slot));
    }
}
