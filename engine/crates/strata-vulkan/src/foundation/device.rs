use std::ffi::{CStr, CString};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;
use itertools::Itertools;
use strata_gfx::error::{GfxError, GfxResult};

use crate::foundation::physical_device::PhysicalDevice;

/// Vulkan 逻辑设备以及各个扩展的函数指针
///
/// 函数指针在设备的生命周期中保持不变，通过 `Arc` 被 command list、queue 和 swapchain 共享。
///
/// # 扩展支持
/// - Swapchain (KHR)：只在存在 surface 时开启
/// - Debug Utils (EXT)：只在开启 validation 时可用
pub struct DeviceFunctions {
    pub(crate) device: ash::Device,
    pub(crate) swapchain: Option<ash::khr::swapchain::Device>,
    pub(crate) debug_utils: Option<ash::ext::debug_utils::Device>,

    destroyed: AtomicBool,
}

// new & init
impl DeviceFunctions {
    /// 在 graphics queue family 上创建 `queue_count` 个 queue
    pub fn new(
        instance: &ash::Instance,
        pdevice: &PhysicalDevice,
        with_swapchain: bool,
        with_debug_utils: bool,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("DeviceFunctions::new");

        let device_exts = Self::device_exts(with_swapchain).iter().map(|e| e.as_ptr()).collect_vec();
        log::info!(
            "device exts: {}",
            device_exts.iter().map(|ext| format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) })).join("")
        );

        let queue_family = pdevice.gfx_queue_family();
        let priorities = vec![1.0_f32; queue_family.queue_count as usize];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family.index)
            .queue_priorities(&priorities)];

        let mut vk12_features = Self::vulkan12_features();
        let mut vk13_features = Self::vulkan13_features();
        let mut all_features = vk::PhysicalDeviceFeatures2::default()
            .features(Self::basic_features())
            .push_next(&mut vk12_features)
            .push_next(&mut vk13_features);

        let device_ci = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_exts)
            .push_next(&mut all_features);

        let device = unsafe { instance.create_device(pdevice.handle(), &device_ci, None) }
            .map_err(|e| GfxError::DeviceCreateFailed(format!("{e:?}")))?;

        let swapchain = with_swapchain.then(|| ash::khr::swapchain::Device::new(instance, &device));
        let debug_utils = with_debug_utils.then(|| ash::ext::debug_utils::Device::new(instance, &device));

        log::info!("logical device created with {} graphics queues", queue_family.queue_count);
        Ok(Self {
            device,
            swapchain,
            debug_utils,
            destroyed: AtomicBool::new(false),
        })
    }

    fn basic_features() -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(true)
            .fill_mode_non_solid(true)
            .shader_int64(true) // 用于 buffer device address
    }

    fn vulkan12_features() -> vk::PhysicalDeviceVulkan12Features<'static> {
        vk::PhysicalDeviceVulkan12Features::default()
            .timeline_semaphore(true)
            .buffer_device_address(true)
            .draw_indirect_count(true)
            .descriptor_indexing(true)
            .runtime_descriptor_array(true)
            // 即使一些 descriptor 是 invalid
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .descriptor_binding_storage_image_update_after_bind(true)
            .descriptor_binding_storage_buffer_update_after_bind(true)
            .descriptor_binding_uniform_buffer_update_after_bind(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            .shader_storage_image_array_non_uniform_indexing(true)
            .shader_storage_buffer_array_non_uniform_indexing(true)
            .shader_uniform_buffer_array_non_uniform_indexing(true)
            .uniform_buffer_standard_layout(true)
            .scalar_block_layout(true)
    }

    fn vulkan13_features() -> vk::PhysicalDeviceVulkan13Features<'static> {
        vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true).synchronization2(true)
    }

    /// dynamic rendering、synchronization2 等已经提升到 core-1.3，只需要按需开启 swapchain
    fn device_exts(with_swapchain: bool) -> Vec<&'static CStr> {
        let mut exts = vec![];
        if with_swapchain {
            exts.push(ash::khr::swapchain::NAME);
        }
        exts
    }
}

// getters
impl DeviceFunctions {
    #[inline]
    pub fn vk_handle(&self) -> vk::Device {
        self.device.handle()
    }

    /// 不存在 surface 时返回 None
    #[inline]
    pub fn swapchain(&self) -> Option<&ash::khr::swapchain::Device> {
        self.swapchain.as_ref()
    }

    #[inline]
    pub fn debug_utils(&self) -> Option<&ash::ext::debug_utils::Device> {
        self.debug_utils.as_ref()
    }
}

// tools
impl DeviceFunctions {
    /// 没有 debug utils 时什么也不做
    pub fn set_object_debug_name<T: vk::Handle + Copy>(&self, handle: T, name: impl AsRef<str>) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name.as_ref()) else {
            return;
        };
        let result = unsafe {
            debug_utils.set_debug_utils_object_name(
                &vk::DebugUtilsObjectNameInfoEXT::default().object_name(name.as_c_str()).object_handle(handle),
            )
        };
        if let Err(e) = result {
            log::warn!("failed to set debug name {:?}: {:?}", name, e);
        }
    }

    pub fn wait_idle(&self) -> GfxResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => GfxError::DeviceLost,
            e => GfxError::DeviceWaitFailed(format!("{e:?}")),
        })
    }
}

// destroy
impl DeviceFunctions {
    /// 调用方保证所有子对象都已经销毁，且没有其他线程在使用设备
    pub fn destroy(&self) {
        log::info!("destroying device");
        self.destroyed.store(true, Ordering::Release);
        unsafe { self.device.destroy_device(None) };
    }
}

impl Deref for DeviceFunctions {
    type Target = ash::Device;
    fn deref(&self) -> &Self::Target {
        &self.device
    }
}

impl Drop for DeviceFunctions {
    fn drop(&mut self) {
        debug_assert!(self.destroyed.load(Ordering::Acquire), "DeviceFunctions must be destroyed before being dropped.");
    }
}
