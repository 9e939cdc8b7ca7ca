use std::ffi::CStr;

use ash::vk;
use itertools::Itertools;
use strata_gfx::error::{GfxError, GfxResult};

/// 最多使用的 graphics queue 数量：一个主 queue 加上 thread context 使用的 queue
pub const MAX_GRAPHICS_QUEUES: u32 = 4;

#[derive(Debug, Clone, Copy)]
pub struct UpdateAfterBindLimits {
    pub sampled_images: u32,
    pub storage_images: u32,
    pub storage_buffers: u32,
    pub uniform_buffers: u32,
    pub samplers: u32,
}

#[derive(Debug, Clone)]
pub struct QueueFamily {
    pub index: u32,
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
}

/// 表示一张物理显卡
pub struct PhysicalDevice {
    pub(crate) handle: vk::PhysicalDevice,

    /// 当前 gpu 的基础属性
    pub(crate) props: vk::PhysicalDeviceProperties,
    /// 单个 descriptor set 中 update-after-bind 的各类 descriptor 上限
    pub(crate) update_after_bind_limits: UpdateAfterBindLimits,

    /// 全能的 queue family：graphics, compute, transfer
    pub(crate) gfx_queue_family: QueueFamily,
}

impl PhysicalDevice {
    /// 优先选择独立显卡，如果没有则选择第一个可用的显卡
    ///
    /// - `surface`: 存在时要求 graphics queue family 支持 present
    pub fn pick(
        instance: &ash::Instance,
        surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
    ) -> GfxResult<Self> {
        let pdevices = unsafe { instance.enumerate_physical_devices() }
            .map_err(|e| GfxError::GpuSelectionFailed(format!("{e:?}")))?;

        let candidates = pdevices
            .iter()
            .filter_map(|pdevice| match Self::new(*pdevice, instance, surface) {
                Ok(candidate) => Some(candidate),
                Err(err) => {
                    log::info!("skip gpu: {}", err);
                    None
                }
            })
            .collect_vec();

        candidates
            .into_iter()
            // 优先使用独立显卡
            .find_or_first(Self::is_discrete_gpu)
            .ok_or_else(|| GfxError::GpuSelectionFailed("no gpu supports vulkan 1.3 with a graphics queue".to_string()))
    }

    fn new(
        pdevice: vk::PhysicalDevice,
        instance: &ash::Instance,
        surface: Option<(&ash::khr::surface::Instance, vk::SurfaceKHR)>,
    ) -> GfxResult<Self> {
        let mut descriptor_indexing_props = vk::PhysicalDeviceDescriptorIndexingProperties::default();
        let props = {
            let mut props2 = vk::PhysicalDeviceProperties2::default().push_next(&mut descriptor_indexing_props);
            unsafe { instance.get_physical_device_properties2(pdevice, &mut props2) };
            props2.properties
        };
        let update_after_bind_limits = UpdateAfterBindLimits {
            sampled_images: descriptor_indexing_props.max_descriptor_set_update_after_bind_sampled_images,
            storage_images: descriptor_indexing_props.max_descriptor_set_update_after_bind_storage_images,
            storage_buffers: descriptor_indexing_props.max_descriptor_set_update_after_bind_storage_buffers,
            uniform_buffers: descriptor_indexing_props.max_descriptor_set_update_after_bind_uniform_buffers,
            samplers: descriptor_indexing_props.max_descriptor_set_update_after_bind_samplers,
        };

        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy().into_owned();
        log::info!("found gpu: {:?}, type {:?}", name, props.device_type);

        if props.api_version < vk::API_VERSION_1_3 {
            return Err(GfxError::GpuSelectionFailed(format!("{name} does not support vulkan 1.3")));
        }

        let queue_family_props = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        log::debug!("queue family props of {}:\n{:#?}", name, queue_family_props);

        let required = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let mut gfx_queue_family = None;
        for (index, family) in queue_family_props.iter().enumerate() {
            if !family.queue_flags.contains(required) {
                continue;
            }
            if let Some((loader, surface)) = surface {
                let present = unsafe { loader.get_physical_device_surface_support(pdevice, index as u32, surface) }
                    .map_err(|e| GfxError::QueueNotFound(format!("surface support query: {e:?}")))?;
                if !present {
                    continue;
                }
            }
            gfx_queue_family = Some(QueueFamily {
                index: index as u32,
                flags: family.queue_flags,
                queue_count: family.queue_count.min(MAX_GRAPHICS_QUEUES),
            });
            break;
        }
        let gfx_queue_family =
            gfx_queue_family.ok_or_else(|| GfxError::QueueNotFound(format!("{name} has no graphics queue family")))?;

        Ok(Self {
            handle: pdevice,
            props,
            update_after_bind_limits,
            gfx_queue_family,
        })
    }
}

// getters
impl PhysicalDevice {
    /// 当前 gpu 是否是独立显卡
    #[inline]
    pub fn is_discrete_gpu(&self) -> bool {
        self.props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    #[inline]
    pub fn handle(&self) -> vk::PhysicalDevice {
        self.handle
    }

    #[inline]
    pub fn gfx_queue_family(&self) -> &QueueFamily {
        &self.gfx_queue_family
    }

    #[inline]
    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.props.limits.max_sampler_anisotropy
    }

    pub fn max_update_after_bind(&self, ty: vk::DescriptorType) -> u32 {
        let limits = &self.update_after_bind_limits;
        match ty {
            vk::DescriptorType::SAMPLED_IMAGE => limits.sampled_images,
            vk::DescriptorType::STORAGE_IMAGE => limits.storage_images,
            vk::DescriptorType::STORAGE_BUFFER => limits.storage_buffers,
            vk::DescriptorType::UNIFORM_BUFFER => limits.uniform_buffers,
            vk::DescriptorType::SAMPLER => limits.samplers,
            _ => 0,
        }
    }
}
