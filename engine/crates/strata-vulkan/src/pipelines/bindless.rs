use ash::vk;
use itertools::Itertools;
use parking_lot::Mutex;
use strata_gfx::descriptors::descriptor_allocator::{DescriptorKind, DescriptorSlot};
use strata_gfx::error::{GfxError, GfxResult};
use strata_gfx::resources::shader::PUSH_CONSTANT_SIZE;
use strata_gfx::settings::DescriptorCapacities;

use crate::convert;
use crate::foundation::device::DeviceFunctions;
use crate::foundation::physical_device::PhysicalDevice;

/// 写入 bindless set 的原生 descriptor 信息
pub enum NativeDescriptor {
    Image(vk::DescriptorImageInfo),
    Buffer(vk::DescriptorBufferInfo),
}

/// 全局唯一的 bindless descriptor set 以及所有 shader 共享的 pipeline layout
///
/// set 0 中每种 [`DescriptorKind`] 占用一个 binding，binding 序号为 [`DescriptorKind::binding`]。
/// 所有 binding 都是 `PARTIALLY_BOUND | UPDATE_AFTER_BIND`，因此 slot 可以在 GPU 使用 set 时被改写。
pub struct BindlessLayout {
    set_layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
    pipeline_layout: vk::PipelineLayout,

    /// 每种 descriptor 的实际数量，按照 [`DescriptorKind::ALL`] 的顺序
    capacities: [u32; 5],

    /// vkUpdateDescriptorSets 需要对同一个 set 的写入进行外部同步
    write_lock: Mutex<()>,
}

// new & init
impl BindlessLayout {
    pub fn new(device: &DeviceFunctions, pdevice: &PhysicalDevice, settings: &DescriptorCapacities) -> GfxResult<Self> {
        let _span = tracy_client::span!("BindlessLayout::new");

        let capacities = DescriptorKind::ALL.map(|kind| {
            let device_limit = pdevice.max_update_after_bind(convert::descriptor_type(kind));
            let requested = settings.get(kind).max;
            if device_limit < requested {
                log::warn!("{:?} capacity {} clamped to device limit {}", kind, requested, device_limit);
            }
            requested.min(device_limit).max(1)
        });

        let stages = vk::ShaderStageFlags::ALL;
        let bindings = DescriptorKind::ALL
            .iter()
            .zip(capacities)
            .map(|(kind, count)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(kind.binding())
                    .descriptor_type(convert::descriptor_type(*kind))
                    .descriptor_count(count)
                    .stage_flags(stages)
            })
            .collect_vec();
        let binding_flags =
            vec![vk::DescriptorBindingFlags::PARTIALLY_BOUND | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND; 5];
        let mut binding_flags_ci =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&binding_flags);
        let set_layout_ci = vk::DescriptorSetLayoutCreateInfo::default()
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .bindings(&bindings)
            .push_next(&mut binding_flags_ci);
        let set_layout = unsafe { device.create_descriptor_set_layout(&set_layout_ci, None) }
            .map_err(|e| GfxError::DescriptorLayoutCreateFailed(format!("{e:?}")))?;
        device.set_object_debug_name(set_layout, "DescriptorSetLayout::bindless");

        let pool_sizes = DescriptorKind::ALL
            .iter()
            .zip(capacities)
            .map(|(kind, count)| vk::DescriptorPoolSize {
                ty: convert::descriptor_type(*kind),
                descriptor_count: count,
            })
            .collect_vec();
        let pool_ci = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let pool = match unsafe { device.create_descriptor_pool(&pool_ci, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(set_layout, None) };
                return Err(GfxError::DescriptorLayoutCreateFailed(format!("descriptor pool: {e:?}")));
            }
        };

        let set_layouts = [set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(&set_layouts);
        let set = match unsafe { device.allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => sets[0],
            Err(e) => {
                unsafe {
                    device.destroy_descriptor_pool(pool, None);
                    device.destroy_descriptor_set_layout(set_layout, None);
                }
                return Err(GfxError::DescriptorLayoutCreateFailed(format!("descriptor set: {e:?}")));
            }
        };
        device.set_object_debug_name(set, "DescriptorSet::bindless");

        // push constant 对所有 stage 可见
        let push_constant_ranges = [vk::PushConstantRange::default()
            .stage_flags(stages)
            .offset(0)
            .size(PUSH_CONSTANT_SIZE)];
        let pipeline_layout_ci = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let pipeline_layout = match unsafe { device.create_pipeline_layout(&pipeline_layout_ci, None) } {
            Ok(layout) => layout,
            Err(e) => {
                unsafe {
                    device.destroy_descriptor_pool(pool, None);
                    device.destroy_descriptor_set_layout(set_layout, None);
                }
                return Err(GfxError::PipelineLayoutCreateFailed(format!("{e:?}")));
            }
        };
        device.set_object_debug_name(pipeline_layout, "PipelineLayout::bindless");

        log::info!("bindless layout created: {:?}", DescriptorKind::ALL.iter().zip(capacities).collect_vec());
        Ok(Self {
            set_layout,
            pool,
            set,
            pipeline_layout,
            capacities,
            write_lock: Mutex::new(()),
        })
    }
}

// getters
impl BindlessLayout {
    #[inline]
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.set
    }

    #[inline]
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    #[inline]
    pub fn capacity(&self, kind: DescriptorKind) -> u32 {
        self.capacities[kind.binding() as usize]
    }
}

// tools
impl BindlessLayout {
    /// 将 descriptor 写入 `slot`，调用方保证 slot 的 index 小于 capacity
    pub fn write(&self, device: &DeviceFunctions, slot: DescriptorSlot, descriptor: NativeDescriptor) {
        debug_assert!(slot.index < self.capacity(slot.kind), "{slot:?} out of range");

        let image_infos;
        let buffer_infos;
        let mut write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(slot.kind.binding())
            .dst_array_element(slot.index)
            .descriptor_type(convert::descriptor_type(slot.kind));
        match descriptor {
            NativeDescriptor::Image(info) => {
                image_infos = [info];
                write = write.image_info(&image_infos);
            }
            NativeDescriptor::Buffer(info) => {
                buffer_infos = [info];
                write = write.buffer_info(&buffer_infos);
            }
        }

        let _guard = self.write_lock.lock();
        unsafe { device.update_descriptor_sets(std::slice::from_ref(&write), &[]) };
    }
}

// destroy
impl BindlessLayout {
    pub fn destroy(self, device: &DeviceFunctions) {
        unsafe {
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            // set 随 pool 一起释放
            device.destroy_descriptor_pool(self.pool, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}
