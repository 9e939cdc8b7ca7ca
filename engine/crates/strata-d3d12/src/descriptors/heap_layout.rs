use strata_gfx::descriptors::descriptor_allocator::{DescriptorKind, DescriptorSlot};
use strata_gfx::settings::DescriptorCapacities;

/// shader visible 的 sampler heap 最多只能有 2048 个 descriptor
pub const MAX_SAMPLER_DESCRIPTORS: u32 = 2048;

/// resource binding tier 1/2 下 CBV_SRV_UAV heap 的上限
pub const MAX_RESOURCE_DESCRIPTORS: u32 = 1_000_000;

/// 一种 descriptor 在 heap 中占用的连续区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapRange {
    pub offset: u32,
    pub count: u32,
}

/// 两个 shader visible heap 的布局
///
/// CBV_SRV_UAV heap 按照 [`DescriptorKind::ALL`] 的顺序依次放置 SampledImage、StorageImage、
/// StorageBuffer 与 ConstantBuffer 的区间；Sampler 独占 sampler heap。
/// slot 的 index 就是它在所属区间内的偏移，所以 shader 中使用的索引与 Vulkan 后端一致。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapLayout {
    ranges: [HeapRange; 5],
}

impl HeapLayout {
    pub fn new(capacities: &DescriptorCapacities) -> Self {
        let mut ranges = [HeapRange { offset: 0, count: 0 }; 5];
        let mut offset = 0u32;
        for kind in DescriptorKind::ALL {
            let requested = capacities.get(kind).max.max(1);
            if kind == DescriptorKind::Sampler {
                let count = requested.min(MAX_SAMPLER_DESCRIPTORS);
                if count < requested {
                    log::warn!("sampler capacity {} clamped to {}", requested, count);
                }
                ranges[kind.binding() as usize] = HeapRange { offset: 0, count };
                continue;
            }

            let remaining = MAX_RESOURCE_DESCRIPTORS.saturating_sub(offset).max(1);
            let count = requested.min(remaining);
            if count < requested {
                log::warn!("{:?} capacity {} clamped to {}", kind, requested, count);
            }
            ranges[kind.binding() as usize] = HeapRange { offset, count };
            offset += count;
        }
        Self { ranges }
    }

    #[inline]
    pub fn range(&self, kind: DescriptorKind) -> HeapRange {
        self.ranges[kind.binding() as usize]
    }

    #[inline]
    pub fn capacity(&self, kind: DescriptorKind) -> u32 {
        self.range(kind).count
    }

    /// CBV_SRV_UAV heap 的总大小
    pub fn resource_descriptor_count(&self) -> u32 {
        DescriptorKind::ALL
            .iter()
            .filter(|kind| **kind != DescriptorKind::Sampler)
            .map(|kind| self.range(*kind).count)
            .sum()
    }

    #[inline]
    pub fn sampler_descriptor_count(&self) -> u32 {
        self.capacity(DescriptorKind::Sampler)
    }

    /// slot 在所属 heap 中的绝对位置
    #[inline]
    pub fn heap_index(&self, slot: DescriptorSlot) -> u32 {
        let range = self.range(slot.kind);
        assert!(slot.index < range.count, "{:?} slot {} out of heap range {}", slot.kind, slot.index, range.count);
        range.offset + slot.index
    }
}

/// root signature 中每种 descriptor 的 register space
///
/// space 0 留给 push constant（`b0, space0`），HLSL 中对应的声明为：
/// `Texture2D g_textures[] : register(t0, space1)`、`RWTexture2D<float4> g_images[] : register(u0, space2)`、
/// `RWByteAddressBuffer g_buffers[] : register(u0, space3)`、`ConstantBuffer<T> g_constants[] : register(b0, space4)`、
/// `SamplerState g_samplers[] : register(s0, space5)`
#[inline]
pub fn register_space(kind: DescriptorKind) -> u32 {
    kind.binding() + 1
}

/// root signature 中 descriptor table 的参数序号，参数 0 为 push constant
#[inline]
pub fn root_parameter_index(kind: DescriptorKind) -> u32 {
    kind.binding() + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_gfx::settings::PoolCapacity;

    fn capacities() -> DescriptorCapacities {
        DescriptorCapacities {
            sampled_image: PoolCapacity::new(4, 100),
            storage_image: PoolCapacity::new(4, 20),
            storage_buffer: PoolCapacity::new(4, 30),
            constant_buffer: PoolCapacity::new(4, 10),
            sampler: PoolCapacity::new(4, 8),
        }
    }

    #[test]
    fn test_ranges_are_contiguous() {
        let layout = HeapLayout::new(&capacities());
        assert_eq!(layout.range(DescriptorKind::SampledImage), HeapRange { offset: 0, count: 100 });
        assert_eq!(layout.range(DescriptorKind::StorageImage), HeapRange { offset: 100, count: 20 });
        assert_eq!(layout.range(DescriptorKind::StorageBuffer), HeapRange { offset: 120, count: 30 });
        assert_eq!(layout.range(DescriptorKind::ConstantBuffer), HeapRange { offset: 150, count: 10 });
        assert_eq!(layout.resource_descriptor_count(), 160);

        // sampler 位于独立的 heap
        assert_eq!(layout.range(DescriptorKind::Sampler), HeapRange { offset: 0, count: 8 });
        assert_eq!(layout.sampler_descriptor_count(), 8);
    }

    #[test]
    fn test_heap_index() {
        let layout = HeapLayout::new(&capacities());
        let slot = DescriptorSlot {
            index: 5,
            kind: DescriptorKind::StorageBuffer,
        };
        assert_eq!(layout.heap_index(slot), 125);
        let slot = DescriptorSlot {
            index: 3,
            kind: DescriptorKind::Sampler,
        };
        assert_eq!(layout.heap_index(slot), 3);
    }

    #[test]
    #[should_panic(expected = "out of heap range")]
    fn test_heap_index_out_of_range() {
        let layout = HeapLayout::new(&capacities());
        layout.heap_index(DescriptorSlot {
            index: 10,
            kind: DescriptorKind::ConstantBuffer,
        });
    }

    #[test]
    fn test_sampler_clamped() {
        let mut caps = capacities();
        caps.sampler = PoolCapacity::new(16, 4096);
        let layout = HeapLayout::new(&caps);
        assert_eq!(layout.capacity(DescriptorKind::Sampler), MAX_SAMPLER_DESCRIPTORS);
    }

    #[test]
    fn test_register_spaces_do_not_overlap_push_constants() {
        let spaces = DescriptorKind::ALL.map(register_space);
        assert!(spaces.iter().all(|space| *space > 0));
        assert_eq!(spaces, [1, 2, 3, 4, 5]);
        assert_eq!(root_parameter_index(DescriptorKind::SampledImage), 1);
    }
}
