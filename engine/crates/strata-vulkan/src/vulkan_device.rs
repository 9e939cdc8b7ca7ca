use std::sync::Arc;

use ash::vk;
use itertools::Itertools;
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use strata_gfx::backend::{DescriptorWrite, RhiDevice, SwapchainDesc};
use strata_gfx::descriptors::descriptor_allocator::{DescriptorKind, DescriptorSlot};
use strata_gfx::error::{GfxError, GfxResult};
use strata_gfx::resources::buffer::BufferDesc;
use strata_gfx::resources::sampler::SamplerDesc;
use strata_gfx::resources::shader::ShaderDesc;
use strata_gfx::resources::texture::TextureDesc;
use strata_gfx::settings::{DescriptorCapacities, GfxSettings};

use crate::commands::command_list::VulkanCommandList;
use crate::commands::queue::VulkanQueue;
use crate::commands::semaphore::VulkanSemaphore;
use crate::foundation::device::DeviceFunctions;
use crate::foundation::instance::VulkanInstance;
use crate::foundation::physical_device::PhysicalDevice;
use crate::pipelines::bindless::{BindlessLayout, NativeDescriptor};
use crate::pipelines::shader::VulkanShader;
use crate::resources::buffer::VulkanBuffer;
use crate::resources::sampler::VulkanSampler;
use crate::resources::texture::VulkanTexture;
use crate::swapchain::render_swapchain::VulkanSwapchain;
use crate::swapchain::surface::VulkanSurface;

/// 创建 surface 所需的原始窗口句柄
#[derive(Debug, Clone, Copy)]
pub struct WindowHandles {
    pub display: RawDisplayHandle,
    pub window: RawWindowHandle,
}

#[derive(Debug, Clone)]
pub struct VulkanDeviceDesc {
    pub app_name: String,
    pub enable_validation: bool,
    pub descriptors: DescriptorCapacities,
    /// 为 None 时不创建 surface，此时无法创建 swapchain
    pub window: Option<WindowHandles>,
}

impl VulkanDeviceDesc {
    pub fn from_settings(settings: &GfxSettings, window: Option<WindowHandles>) -> Self {
        Self {
            app_name: settings.app_name.clone(),
            enable_validation: settings.enable_validation,
            descriptors: settings.descriptors,
            window,
        }
    }
}

/// Vulkan 后端的设备，持有 instance 到 bindless layout 的全部全局对象
///
/// 销毁顺序：bindless layout → vma → device → surface → instance
pub struct VulkanDevice {
    bindless: BindlessLayout,
    allocator: vk_mem::Allocator,
    device: Arc<DeviceFunctions>,

    /// 每个 queue index 一把锁，指向同一个 vk::Queue 的 VulkanQueue 共享该锁
    queue_locks: Vec<Arc<Mutex<()>>>,

    surface: Option<VulkanSurface>,
    pdevice: PhysicalDevice,
    instance: VulkanInstance,
}

// new & init
impl VulkanDevice {
    pub fn new(desc: &VulkanDeviceDesc) -> GfxResult<Self> {
        let _span = tracy_client::span!("VulkanDevice::new");

        let instance =
            VulkanInstance::new(&desc.app_name, desc.enable_validation, desc.window.map(|window| window.display))?;

        let surface = match desc.window {
            Some(window) => {
                match VulkanSurface::new(instance.entry(), instance.ash_instance(), window.display, window.window) {
                    Ok(surface) => Some(surface),
                    Err(e) => {
                        instance.destroy();
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        match Self::init_device(&instance, surface.as_ref(), &desc.descriptors) {
            Ok((pdevice, device, allocator, bindless)) => {
                let queue_locks =
                    (0..pdevice.gfx_queue_family().queue_count).map(|_| Arc::new(Mutex::new(()))).collect_vec();
                log::info!(
                    "vulkan device ready, graphics queues: {}, surface: {}",
                    queue_locks.len(),
                    surface.is_some()
                );
                Ok(Self {
                    bindless,
                    allocator,
                    device,
                    queue_locks,
                    surface,
                    pdevice,
                    instance,
                })
            }
            Err(e) => {
                if let Some(surface) = surface {
                    surface.destroy();
                }
                instance.destroy();
                Err(e)
            }
        }
    }

    fn init_device(
        instance: &VulkanInstance,
        surface: Option<&VulkanSurface>,
        descriptors: &DescriptorCapacities,
    ) -> GfxResult<(PhysicalDevice, Arc<DeviceFunctions>, vk_mem::Allocator, BindlessLayout)> {
        let ash_instance = instance.ash_instance();
        let pdevice = PhysicalDevice::pick(ash_instance, surface.map(|s| (s.loader(), s.handle())))?;
        let device = Arc::new(DeviceFunctions::new(ash_instance, &pdevice, surface.is_some(), instance.validation())?);

        // vma 需要引用 Instance 以及 Device，因此在其他部分初始化完成之后再创建
        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(ash_instance, &device.device, pdevice.handle());
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;
        vma_ci.flags = vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;
        let allocator = match unsafe { vk_mem::Allocator::new(vma_ci) } {
            Ok(allocator) => allocator,
            Err(e) => {
                device.destroy();
                return Err(GfxError::AllocatorCreateFailed(format!("{e:?}")));
            }
        };

        let bindless = match BindlessLayout::new(&device, &pdevice, descriptors) {
            Ok(bindless) => bindless,
            Err(e) => {
                drop(allocator);
                device.destroy();
                return Err(e);
            }
        };

        Ok((pdevice, device, allocator, bindless))
    }
}

// getters
impl VulkanDevice {
    #[inline]
    pub fn device_functions(&self) -> &Arc<DeviceFunctions> {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.pdevice
    }

    #[inline]
    pub fn bindless(&self) -> &BindlessLayout {
        &self.bindless
    }
}

impl RhiDevice for VulkanDevice {
    type Buffer = VulkanBuffer;
    type Texture = VulkanTexture;
    type Sampler = VulkanSampler;
    type Shader = VulkanShader;
    type CommandList = VulkanCommandList;
    type Queue = VulkanQueue;
    type Semaphore = VulkanSemaphore;
    type Swapchain = VulkanSwapchain;

    #[inline]
    fn backend_name(&self) -> &'static str {
        "vulkan"
    }

    #[inline]
    fn graphics_queue_count(&self) -> u32 {
        self.queue_locks.len() as u32
    }

    #[inline]
    fn descriptor_capacity(&self, kind: DescriptorKind) -> u32 {
        self.bindless.capacity(kind)
    }

    fn create_queue(&self, queue_index: u32, name: &str) -> GfxResult<VulkanQueue> {
        let lock = self
            .queue_locks
            .get(queue_index as usize)
            .ok_or_else(|| GfxError::QueueNotFound(format!("queue index {queue_index} for {name}")))?;
        VulkanQueue::new(self.device.clone(), self.pdevice.gfx_queue_family().index, queue_index, lock.clone(), name)
    }

    fn create_command_list(&self, queue: &VulkanQueue, name: &str) -> GfxResult<VulkanCommandList> {
        VulkanCommandList::new(self.device.clone(), queue.family_index(), self.bindless.descriptor_set(), name)
    }

    fn create_semaphore(&self, name: &str) -> GfxResult<VulkanSemaphore> {
        VulkanSemaphore::new(&self.device, name)
    }

    fn create_buffer(&self, desc: &BufferDesc) -> GfxResult<VulkanBuffer> {
        VulkanBuffer::new(&self.allocator, &self.device, desc)
    }

    fn create_texture(&self, desc: &TextureDesc) -> GfxResult<VulkanTexture> {
        VulkanTexture::new(&self.allocator, &self.device, desc)
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> GfxResult<VulkanSampler> {
        VulkanSampler::new(&self.device, desc, self.pdevice.max_sampler_anisotropy())
    }

    fn create_shader(&self, desc: &ShaderDesc<'_>) -> GfxResult<VulkanShader> {
        VulkanShader::new(&self.device, self.bindless.pipeline_layout(), desc)
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> GfxResult<VulkanSwapchain> {
        let surface = self
            .surface
            .as_ref()
            .ok_or_else(|| GfxError::SwapchainCreateFailed("device is created without window".to_string()))?;
        VulkanSwapchain::new(self.device.clone(), surface, self.pdevice.handle(), desc)
    }

    fn recreate_swapchain(&self, swapchain: &mut VulkanSwapchain, desc: &SwapchainDesc) -> GfxResult<()> {
        let surface = self
            .surface
            .as_ref()
            .ok_or_else(|| GfxError::SwapchainCreateFailed("device is created without window".to_string()))?;
        swapchain.recreate(surface, self.pdevice.handle(), desc)
    }

    fn write_descriptor(&self, slot: DescriptorSlot, write: DescriptorWrite<'_, Self>) {
        debug_assert_eq!(slot.kind, write.kind());
        let descriptor = match write {
            DescriptorWrite::SampledImage(texture) => NativeDescriptor::Image(
                vk::DescriptorImageInfo::default()
                    .image_view(texture.vk_view())
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            ),
            DescriptorWrite::StorageImage(texture) => NativeDescriptor::Image(
                vk::DescriptorImageInfo::default()
                    .image_view(texture.vk_view())
                    .image_layout(vk::ImageLayout::GENERAL),
            ),
            DescriptorWrite::StorageBuffer(buffer) | DescriptorWrite::ConstantBuffer(buffer) => {
                NativeDescriptor::Buffer(
                    vk::DescriptorBufferInfo::default().buffer(buffer.vk_buffer()).offset(0).range(vk::WHOLE_SIZE),
                )
            }
            DescriptorWrite::Sampler(sampler) => {
                NativeDescriptor::Image(vk::DescriptorImageInfo::default().sampler(sampler.vk_sampler()))
            }
        };
        self.bindless.write(&self.device, slot, descriptor);
    }

    fn destroy_buffer(&self, buffer: VulkanBuffer) {
        buffer.destroy(&self.allocator);
    }

    fn destroy_texture(&self, texture: VulkanTexture) {
        texture.destroy(&self.allocator, &self.device);
    }

    fn destroy_sampler(&self, sampler: VulkanSampler) {
        sampler.destroy(&self.device);
    }

    fn destroy_shader(&self, shader: VulkanShader) {
        shader.destroy(&self.device);
    }

    fn destroy_command_list(&self, command_list: VulkanCommandList) {
        command_list.destroy();
    }

    fn destroy_semaphore(&self, semaphore: VulkanSemaphore) {
        semaphore.destroy(&self.device);
    }

    fn destroy_queue(&self, queue: VulkanQueue) {
        queue.destroy();
    }

    fn destroy_swapchain(&self, swapchain: VulkanSwapchain) {
        swapchain.destroy();
    }

    fn wait_idle(&self) -> GfxResult<()> {
        self.device.wait_idle()
    }

    fn destroy(self) {
        let _span = tracy_client::span!("VulkanDevice::destroy");

        if let Err(e) = self.device.wait_idle() {
            log::error!("wait idle before destroy failed: {}", e);
        }
        let Self {
            bindless,
            allocator,
            device,
            queue_locks: _,
            surface,
            pdevice: _,
            instance,
        } = self;

        bindless.destroy(&device);
        // vma 需要在 device 之前销毁
        drop(allocator);

        let holders = Arc::strong_count(&device);
        if holders > 1 {
            log::error!("device is still referenced by {} objects while destroying", holders - 1);
        }
        device.destroy();
        drop(device);

        if let Some(surface) = surface {
            surface.destroy();
        }
        instance.destroy();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use strata_gfx::backend::{BufferBarrier, BufferCopyRegion, QueueSubmit, RhiBuffer, RhiCommandList, RhiQueue};
    use strata_gfx::resources::buffer::BufferType;
    use strata_gfx::sync::resource_state::BufferState;
    use strata_gfx::sync::state_tracker::BufferBarrierDesc;

    use super::*;

    fn setup() {
        static INIT: std::sync::Once = std::sync::Once::new();
        INIT.call_once(|| {
            strata_crate_tools::init_log::init_log_with_level(log::LevelFilter::Debug);
            tracy_client::Client::start();
        });
    }

    #[test]
    fn test_desc_from_settings() {
        let settings = GfxSettings {
            app_name: "demo".to_string(),
            enable_validation: false,
            ..Default::default()
        };
        let desc = VulkanDeviceDesc::from_settings(&settings, None);
        assert_eq!(desc.app_name, "demo");
        assert!(!desc.enable_validation);
        assert!(desc.window.is_none());
        assert_eq!(desc.descriptors, settings.descriptors);
    }

    #[test]
    #[ignore = "requires a gpu with vulkan 1.3"]
    fn test_copy_and_readback() {
        setup();
        let desc = VulkanDeviceDesc {
            app_name: "strata-vulkan-test".to_string(),
            enable_validation: true,
            descriptors: DescriptorCapacities::default(),
            window: None,
        };
        let device = VulkanDevice::new(&desc).unwrap();
        assert!(device.create_swapchain(&SwapchainDesc {
            extent: strata_gfx::basic::types::Extent2D::new(8, 8),
            image_count: 2,
            format: strata_gfx::basic::format::TextureFormat::Bgra8Unorm,
            vsync: true,
        })
        .is_err());

        let data = (0..64u8).collect_vec();
        let staging = device.create_buffer(&BufferDesc::new(64, BufferType::Staging, "staging")).unwrap();
        let storage = device.create_buffer(&BufferDesc::new(64, BufferType::Storage, "storage")).unwrap();
        let readback = device.create_buffer(&BufferDesc::new(64, BufferType::Readback, "readback")).unwrap();
        assert_ne!(storage.device_address(), 0);
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), staging.mapped_ptr().unwrap().as_ptr(), data.len());
        }

        let queue = device.create_queue(0, "graphics").unwrap();
        let mut cmd = device.create_command_list(&queue, "copy").unwrap();
        let region = [BufferCopyRegion {
            src_offset: 0,
            dst_offset: 0,
            size: 64,
        }];
        cmd.begin().unwrap();
        cmd.copy_buffer(&staging, &storage, &region);
        cmd.barriers(
            &[],
            &[BufferBarrier {
                buffer: &storage,
                desc: BufferBarrierDesc {
                    src: BufferState::TRANSFER_DST,
                    dst: BufferState::TRANSFER_SRC,
                },
            }],
        );
        cmd.copy_buffer(&storage, &readback, &region);
        cmd.barriers(
            &[],
            &[BufferBarrier {
                buffer: &readback,
                desc: BufferBarrierDesc {
                    src: BufferState::TRANSFER_DST,
                    dst: BufferState::HOST_READ,
                },
            }],
        );
        cmd.end().unwrap();
        queue
            .submit(&QueueSubmit {
                command_lists: &[&cmd],
                waits: &[],
                signals: &[],
                timeline_value: 1,
            })
            .unwrap();
        assert!(queue.wait_value(1, Some(Duration::from_secs(5))).unwrap());
        assert_eq!(queue.completed_value().unwrap(), 1);
        // 超时为 0 时不会阻塞
        assert!(!queue.wait_value(2, Some(Duration::ZERO)).unwrap());

        let result = unsafe { std::slice::from_raw_parts(readback.mapped_ptr().unwrap().as_ptr(), 64) };
        assert_eq!(result, data.as_slice());

        device.destroy_command_list(cmd);
        device.destroy_queue(queue);
        device.destroy_buffer(staging);
        device.destroy_buffer(storage);
        device.destroy_buffer(readback);
        device.destroy();
    }
}
