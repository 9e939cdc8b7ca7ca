use std::ffi::{CStr, CString, c_char};

use ash::vk;
use itertools::Itertools;
use raw_window_handle::RawDisplayHandle;
use strata_gfx::error::{GfxError, GfxResult};

use crate::foundation::debug_messenger::DebugMessenger;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// vk entry 与 instance
///
/// entry 在 drop 之后会卸载 vulkan 动态库，因此需要最后 drop
pub struct VulkanInstance {
    pub(crate) instance: ash::Instance,
    debug_messenger: Option<DebugMessenger>,
    validation: bool,
    pub(crate) entry: ash::Entry,
}

// new & init
impl VulkanInstance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    ///
    /// - `display`: 需要创建 surface 时传入，用于查询平台相关的 surface extensions
    pub fn new(app_name: &str, enable_validation: bool, display: Option<RawDisplayHandle>) -> GfxResult<Self> {
        let _span = tracy_client::span!("VulkanInstance::new");

        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GfxError::InstanceCreateFailed(format!("failed to load vulkan: {e}")))?;

        let app_name = CString::new(app_name).unwrap_or_default();
        let engine_name = c"strata";
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3) // 版本过低时，有些函数无法正确加载
            .application_name(app_name.as_c_str())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let validation = enable_validation && Self::is_layer_supported(&entry, VALIDATION_LAYER)?;
        if enable_validation && !validation {
            log::warn!("validation layer requested but not available");
        }

        let extensions = Self::get_extensions(&entry, display, validation)?;
        log::info!(
            "instance extensions: {}",
            extensions.iter().map(|ext| format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) })).join("")
        );
        let layers = if validation { vec![VALIDATION_LAYER.as_ptr()] } else { Vec::new() };

        let mut instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        // 为 instance info 添加 debug messenger
        let mut debug_messenger_ci = DebugMessenger::create_info();
        if validation {
            instance_ci = instance_ci.push_next(&mut debug_messenger_ci);
        }

        let instance = unsafe { entry.create_instance(&instance_ci, None) }
            .map_err(|e| GfxError::InstanceCreateFailed(format!("{e:?}")))?;

        let debug_messenger = if validation {
            match DebugMessenger::new(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(err) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(err);
                }
            }
        } else {
            None
        };

        log::info!("vulkan instance created, validation: {}", validation);
        Ok(Self {
            instance,
            debug_messenger,
            validation,
            entry,
        })
    }

    fn is_layer_supported(entry: &ash::Entry, layer: &CStr) -> GfxResult<bool> {
        let layer_props = unsafe { entry.enumerate_instance_layer_properties() }
            .map_err(|e| GfxError::InstanceCreateFailed(format!("enumerate layers: {e:?}")))?;
        Ok(layer_props.iter().any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == layer)))
    }

    /// instance 所需的，且受支持的 extension
    fn get_extensions(
        entry: &ash::Entry,
        display: Option<RawDisplayHandle>,
        validation: bool,
    ) -> GfxResult<Vec<*const c_char>> {
        let all_ext_props = unsafe { entry.enumerate_instance_extension_properties(None) }
            .map_err(|e| GfxError::InstanceCreateFailed(format!("enumerate extensions: {e:?}")))?;

        let mut extensions = Vec::new();
        if let Some(display) = display {
            let surface_exts = ash_window::enumerate_required_extensions(display)
                .map_err(|e| GfxError::InstanceCreateFailed(format!("surface extensions: {e:?}")))?;
            extensions.extend_from_slice(surface_exts);
        }
        if validation {
            // debug messenger、object name 与 command buffer label
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        for ext in &extensions {
            let ext = unsafe { CStr::from_ptr(*ext) };
            let supported =
                all_ext_props.iter().any(|props| props.extension_name_as_c_str().is_ok_and(|name| name == ext));
            if !supported {
                return Err(GfxError::InstanceCreateFailed(format!("instance extension {ext:?} is missing")));
            }
        }
        Ok(extensions)
    }
}

// getters
impl VulkanInstance {
    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// 是否开启了 validation 以及 debug utils
    #[inline]
    pub fn validation(&self) -> bool {
        self.validation
    }
}

// destroy
impl VulkanInstance {
    pub fn destroy(self) {
        if let Some(messenger) = self.debug_messenger {
            messenger.destroy();
        }
        log::info!("destroying vulkan instance");
        unsafe { self.instance.destroy_instance(None) };
    }
}
