use std::ffi::c_void;
use std::sync::Arc;

use itertools::Itertools;
use parking_lot::Mutex;
use raw_window_handle::RawWindowHandle;
use strata_gfx::backend::{DescriptorWrite, RhiBuffer, RhiDevice, SwapchainDesc};
use strata_gfx::descriptors::descriptor_allocator::{DescriptorKind, DescriptorSlot};
use strata_gfx::error::{GfxError, GfxResult};
use strata_gfx::resources::buffer::BufferDesc;
use strata_gfx::resources::sampler::SamplerDesc;
use strata_gfx::resources::shader::ShaderDesc;
use strata_gfx::resources::texture::TextureDesc;
use strata_gfx::settings::{DescriptorCapacities, GfxSettings};
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND, WAIT_OBJECT_0};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_R32_TYPELESS;
use windows::Win32::System::Threading::{CreateEventW, INFINITE, WaitForSingleObject};
use windows::core::PCWSTR;

use crate::commands::command_list::D3D12CommandList;
use crate::commands::queue::D3D12Queue;
use crate::commands::semaphore::D3D12Semaphore;
use crate::convert;
use crate::foundation::adapter::Adapter;
use crate::foundation::device::{DeviceShared, set_debug_name};
use crate::foundation::info_queue::InfoQueueCallback;
use crate::pipelines::shader::D3D12Shader;
use crate::resources::buffer::D3D12Buffer;
use crate::resources::sampler::D3D12Sampler;
use crate::resources::texture::D3D12Texture;
use crate::swapchain::render_swapchain::D3D12Swapchain;

/// 创建的 direct queue 数量，index 0 给主线程，其余给 thread context
const QUEUE_COUNT: u32 = 4;

/// D3D12 texture 拷贝时每一行的对齐要求
const TEXTURE_ROW_PITCH_ALIGNMENT: u64 = D3D12_TEXTURE_DATA_PITCH_ALIGNMENT as u64;

/// 单个 CBV 最多能覆盖的字节数
const MAX_CONSTANT_BUFFER_SIZE: u64 = 65536;

#[derive(Debug, Clone)]
pub struct D3D12DeviceDesc {
    pub app_name: String,
    pub enable_validation: bool,
    pub descriptors: DescriptorCapacities,
    /// 只支持 Win32 窗口，为 None 时无法创建 swapchain
    pub window: Option<RawWindowHandle>,
}

impl D3D12DeviceDesc {
    pub fn from_settings(settings: &GfxSettings, window: Option<RawWindowHandle>) -> Self {
        Self {
            app_name: settings.app_name.clone(),
            enable_validation: settings.enable_validation,
            descriptors: settings.descriptors,
            window,
        }
    }
}

/// wait_idle 使用的 fence，每个 queue 依次 signal 并等待
struct IdleFence {
    fence: ID3D12Fence,
    event: HANDLE,
    value: Mutex<u64>,
}

/// D3D12 后端的设备
///
/// 销毁顺序：原生 queue → info queue 回调 → DeviceShared → adapter
pub struct D3D12Device {
    shared: Arc<DeviceShared>,

    /// 原生 queue 以及对应的锁，指向同一个原生 queue 的 D3D12Queue 共享该锁
    queues: Vec<(ID3D12CommandQueue, Arc<Mutex<()>>)>,
    idle: IdleFence,

    hwnd: Option<HWND>,
    tearing: bool,

    info_queue: Option<InfoQueueCallback>,
    adapter: Adapter,
}

// SAFETY: DXGI factory 与 D3D12 的对象都是自由线程的，hwnd 只会在创建 swapchain 时使用，
// idle fence 的 event 由 value 的锁串行化
unsafe impl Send for D3D12Device {}
unsafe impl Sync for D3D12Device {}

// new & init
impl D3D12Device {
    pub fn new(desc: &D3D12DeviceDesc) -> GfxResult<Self> {
        let _span = tracy_client::span!("D3D12Device::new");

        let hwnd = desc.window.map(Self::win32_window).transpose()?;
        let adapter = Adapter::new(desc.enable_validation)?;
        let shared = Arc::new(DeviceShared::new(&adapter, &desc.descriptors)?);
        let info_queue =
            if desc.enable_validation { InfoQueueCallback::register(shared.device()) } else { None };

        let init = Self::create_queues(shared.device()).and_then(|queues| {
            let idle = Self::create_idle_fence(shared.device())?;
            Ok((queues, idle))
        });
        let (queues, idle) = match init {
            Ok(init) => init,
            Err(e) => {
                if let Some(info_queue) = info_queue {
                    info_queue.destroy();
                }
                return Err(e);
            }
        };

        let tearing = adapter.supports_tearing();
        log::info!(
            "d3d12 device ready for {}, direct queues: {}, window: {}, tearing: {}",
            desc.app_name,
            queues.len(),
            hwnd.is_some(),
            tearing
        );
        Ok(Self {
            shared,
            queues,
            idle,
            hwnd,
            tearing,
            info_queue,
            adapter,
        })
    }

    fn win32_window(window: RawWindowHandle) -> GfxResult<HWND> {
        match window {
            RawWindowHandle::Win32(handle) => Ok(HWND(handle.hwnd.get() as *mut c_void)),
            other => Err(GfxError::SurfaceCreateFailed(format!("d3d12 only supports win32 window, got {other:?}"))),
        }
    }

    fn create_queues(device: &ID3D12Device) -> GfxResult<Vec<(ID3D12CommandQueue, Arc<Mutex<()>>)>> {
        let queue_desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            Priority: D3D12_COMMAND_QUEUE_PRIORITY_NORMAL.0,
            Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
            NodeMask: 0,
        };
        (0..QUEUE_COUNT)
            .map(|idx| {
                let queue: ID3D12CommandQueue = unsafe { device.CreateCommandQueue(&queue_desc) }
                    .map_err(|e| GfxError::QueueNotFound(format!("create direct queue {idx}: {e}")))?;
                set_debug_name(&queue, format!("Queue::direct-{idx}"));
                Ok((queue, Arc::new(Mutex::new(()))))
            })
            .try_collect()
    }

    fn create_idle_fence(device: &ID3D12Device) -> GfxResult<IdleFence> {
        let fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }
            .map_err(|e| GfxError::FenceCreateFailed(format!("idle fence: {e}")))?;
        set_debug_name(&fence, "Fence::idle");
        let event = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }
            .map_err(|e| GfxError::FenceCreateFailed(format!("idle event: {e}")))?;
        Ok(IdleFence {
            fence,
            event,
            value: Mutex::new(0),
        })
    }
}

// getters
impl D3D12Device {
    #[inline]
    pub fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }

    #[inline]
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }
}

// tools
impl D3D12Device {
    /// raw buffer 形式的 UAV，shader 中以 RWByteAddressBuffer 访问
    fn storage_buffer_view(buffer: &D3D12Buffer) -> D3D12_UNORDERED_ACCESS_VIEW_DESC {
        D3D12_UNORDERED_ACCESS_VIEW_DESC {
            Format: DXGI_FORMAT_R32_TYPELESS,
            ViewDimension: D3D12_UAV_DIMENSION_BUFFER,
            Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                Buffer: D3D12_BUFFER_UAV {
                    FirstElement: 0,
                    NumElements: (buffer.size() / 4) as u32,
                    StructureByteStride: 0,
                    CounterOffsetInBytes: 0,
                    Flags: D3D12_BUFFER_UAV_FLAG_RAW,
                },
            },
        }
    }

    /// CBV 的大小需要 256 字节对齐，且不能超过 64KiB
    fn constant_buffer_size(size: u64) -> u32 {
        let alignment = D3D12_CONSTANT_BUFFER_DATA_PLACEMENT_ALIGNMENT as u64;
        (size.div_ceil(alignment) * alignment).min(MAX_CONSTANT_BUFFER_SIZE) as u32
    }

    fn wait_queue_idle(&self, queue: &ID3D12CommandQueue, lock: &Mutex<()>) -> GfxResult<()> {
        let mut value = self.idle.value.lock();
        *value += 1;
        {
            let _guard = lock.lock();
            unsafe { queue.Signal(&self.idle.fence, *value) }
                .map_err(|e| convert::device_error(e, GfxError::DeviceWaitFailed))?;
        }
        if unsafe { self.idle.fence.GetCompletedValue() } >= *value {
            return Ok(());
        }
        unsafe { self.idle.fence.SetEventOnCompletion(*value, self.idle.event) }
            .map_err(|e| convert::device_error(e, GfxError::DeviceWaitFailed))?;
        match unsafe { WaitForSingleObject(self.idle.event, INFINITE) } {
            WAIT_OBJECT_0 => Ok(()),
            other => Err(GfxError::DeviceWaitFailed(format!("WaitForSingleObject returns {other:?}"))),
        }
    }
}

impl RhiDevice for D3D12Device {
    type Buffer = D3D12Buffer;
    type Texture = D3D12Texture;
    type Sampler = D3D12Sampler;
    type Shader = D3D12Shader;
    type CommandList = D3D12CommandList;
    type Queue = D3D12Queue;
    type Semaphore = D3D12Semaphore;
    type Swapchain = D3D12Swapchain;

    #[inline]
    fn backend_name(&self) -> &'static str {
        "d3d12"
    }

    #[inline]
    fn graphics_queue_count(&self) -> u32 {
        self.queues.len() as u32
    }

    #[inline]
    fn descriptor_capacity(&self, kind: DescriptorKind) -> u32 {
        self.shared.bindless().capacity(kind)
    }

    #[inline]
    fn texture_row_pitch_alignment(&self) -> u64 {
        TEXTURE_ROW_PITCH_ALIGNMENT
    }

    fn create_queue(&self, queue_index: u32, name: &str) -> GfxResult<D3D12Queue> {
        let (queue, lock) = self
            .queues
            .get(queue_index as usize)
            .ok_or_else(|| GfxError::QueueNotFound(format!("queue index {queue_index} for {name}")))?;
        D3D12Queue::new(self.shared.device(), queue.clone(), lock.clone(), name)
    }

    fn create_command_list(&self, _queue: &D3D12Queue, name: &str) -> GfxResult<D3D12CommandList> {
        D3D12CommandList::new(self.shared.clone(), name)
    }

    fn create_semaphore(&self, name: &str) -> GfxResult<D3D12Semaphore> {
        D3D12Semaphore::new(self.shared.device(), name)
    }

    fn create_buffer(&self, desc: &BufferDesc) -> GfxResult<D3D12Buffer> {
        D3D12Buffer::new(self.shared.device(), desc)
    }

    fn create_texture(&self, desc: &TextureDesc) -> GfxResult<D3D12Texture> {
        D3D12Texture::new(&self.shared, desc)
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> GfxResult<D3D12Sampler> {
        Ok(D3D12Sampler::new(desc))
    }

    fn create_shader(&self, desc: &ShaderDesc<'_>) -> GfxResult<D3D12Shader> {
        D3D12Shader::new(self.shared.device(), self.shared.bindless().root_signature(), desc)
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> GfxResult<D3D12Swapchain> {
        let hwnd = self
            .hwnd
            .ok_or_else(|| GfxError::SwapchainCreateFailed("device is created without window".to_string()))?;
        // present 的 queue 必须与创建 swapchain 时的 queue 相同
        let (queue, _) = &self.queues[0];
        D3D12Swapchain::new(self.shared.clone(), self.adapter.factory(), queue, hwnd, self.tearing, desc)
    }

    fn recreate_swapchain(&self, swapchain: &mut D3D12Swapchain, desc: &SwapchainDesc) -> GfxResult<()> {
        swapchain.recreate(desc)
    }

    fn write_descriptor(&self, slot: DescriptorSlot, write: DescriptorWrite<'_, Self>) {
        debug_assert_eq!(slot.kind, write.kind());
        let device = self.shared.device();
        let handle = self.shared.bindless().cpu_handle(slot);
        match write {
            DescriptorWrite::SampledImage(texture) => unsafe {
                device.CreateShaderResourceView(texture.resource(), Some(&texture.srv_desc()), handle);
            },
            DescriptorWrite::StorageImage(texture) => {
                if !texture.allow_uav() {
                    log::error!("texture for storage slot {} does not allow unordered access", slot.index);
                    return;
                }
                unsafe {
                    device.CreateUnorderedAccessView(
                        texture.resource(),
                        None::<&ID3D12Resource>,
                        Some(&texture.uav_desc()),
                        handle,
                    )
                };
            }
            DescriptorWrite::StorageBuffer(buffer) => unsafe {
                device.CreateUnorderedAccessView(
                    buffer.resource(),
                    None::<&ID3D12Resource>,
                    Some(&Self::storage_buffer_view(buffer)),
                    handle,
                );
            },
            DescriptorWrite::ConstantBuffer(buffer) => {
                let view = D3D12_CONSTANT_BUFFER_VIEW_DESC {
                    BufferLocation: buffer.device_address(),
                    SizeInBytes: Self::constant_buffer_size(buffer.size()),
                };
                unsafe { device.CreateConstantBufferView(Some(&view), handle) };
            }
            DescriptorWrite::Sampler(sampler) => unsafe { device.CreateSampler(sampler.desc(), handle) },
        }
    }

    fn destroy_buffer(&self, buffer: D3D12Buffer) {
        buffer.destroy();
    }

    fn destroy_texture(&self, texture: D3D12Texture) {
        texture.destroy(&self.shared);
    }

    fn destroy_sampler(&self, _sampler: D3D12Sampler) {}

    fn destroy_shader(&self, shader: D3D12Shader) {
        drop(shader);
    }

    fn destroy_command_list(&self, command_list: D3D12CommandList) {
        command_list.destroy();
    }

    fn destroy_semaphore(&self, semaphore: D3D12Semaphore) {
        drop(semaphore);
    }

    fn destroy_queue(&self, queue: D3D12Queue) {
        queue.destroy();
    }

    fn destroy_swapchain(&self, swapchain: D3D12Swapchain) {
        swapchain.destroy();
    }

    fn wait_idle(&self) -> GfxResult<()> {
        let _span = tracy_client::span!("D3D12Device::wait_idle");
        self.queues.iter().try_for_each(|(queue, lock)| self.wait_queue_idle(queue, lock))
    }

    fn destroy(self) {
        let _span = tracy_client::span!("D3D12Device::destroy");

        if let Err(e) = self.wait_idle() {
            log::error!("wait idle before destroy failed: {}", e);
        }
        let Self {
            shared,
            queues,
            idle,
            hwnd: _,
            tearing: _,
            info_queue,
            adapter,
        } = self;

        drop(queues);
        if let Err(e) = unsafe { CloseHandle(idle.event) } {
            log::warn!("failed to close idle event: {}", e);
        }
        drop(idle.fence);
        if let Some(info_queue) = info_queue {
            info_queue.destroy();
        }

        let holders = Arc::strong_count(&shared);
        if holders > 1 {
            log::error!("device is still referenced by {} objects while destroying", holders - 1);
        }
        drop(shared);
        drop(adapter);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use strata_gfx::backend::{BufferBarrier, BufferCopyRegion, QueueSubmit, RhiCommandList, RhiQueue};
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
            enable_validation: true,
            ..Default::default()
        };
        let desc = D3D12DeviceDesc::from_settings(&settings, None);
        assert_eq!(desc.app_name, "demo");
        assert!(desc.enable_validation);
        assert!(desc.window.is_none());
        assert_eq!(desc.descriptors, settings.descriptors);
    }

    #[test]
    fn test_constant_buffer_size() {
        assert_eq!(D3D12Device::constant_buffer_size(1), 256);
        assert_eq!(D3D12Device::constant_buffer_size(256), 256);
        assert_eq!(D3D12Device::constant_buffer_size(300), 512);
        assert_eq!(D3D12Device::constant_buffer_size(1 << 20), 65536);
    }

    #[test]
    #[ignore = "requires a gpu with resource binding tier 3"]
    fn test_copy_and_readback() {
        setup();
        let desc = D3D12DeviceDesc {
            app_name: "strata-d3d12-test".to_string(),
            enable_validation: true,
            descriptors: DescriptorCapacities::default(),
            window: None,
        };
        let device = D3D12Device::new(&desc).unwrap();
        assert_eq!(device.texture_row_pitch_alignment(), 256);
        assert!(device.create_queue(QUEUE_COUNT, "missing").is_err());

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
        cmd.barriers(
            &[],
            &[BufferBarrier {
                buffer: &storage,
                desc: BufferBarrierDesc {
                    src: BufferState::UNDEFINED,
                    dst: BufferState::TRANSFER_DST,
                },
            }],
        );
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
        assert!(!queue.wait_value(2, Some(Duration::ZERO)).unwrap());

        let result = unsafe { std::slice::from_raw_parts(readback.mapped_ptr().unwrap().as_ptr(), 64) };
        assert_eq!(result, data.as_slice());

        device.wait_idle().unwrap();
        device.destroy_command_list(cmd);
        device.destroy_queue(queue);
        device.destroy_buffer(staging);
        device.destroy_buffer(storage);
        device.destroy_buffer(readback);
        device.destroy();
    }
}
