use std::collections::HashMap;
use std::ffi::c_void;

use parking_lot::Mutex;
use strata_gfx::error::{GfxError, GfxResult};
use strata_gfx::settings::DescriptorCapacities;
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_12_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::core::{HSTRING, Interface};

use crate::descriptors::bindless::BindlessHeaps;
use crate::descriptors::cpu_heap::CpuDescriptorHeap;
use crate::foundation::adapter::Adapter;

/// CPU 端 RTV heap 的大小，所有颜色纹理都会占用一个 RTV
const RTV_HEAP_SIZE: u32 = 4096;
const DSV_HEAP_SIZE: u32 = 256;

/// `D3D12_DRAW_INDEXED_ARGUMENTS` 的大小，与 `VkDrawIndexedIndirectCommand` 的布局一致
pub const DRAW_INDEXED_ARGUMENTS_SIZE: u32 = 20;

/// 被 command list、swapchain 与资源共同引用的设备级对象
pub struct DeviceShared {
    device: ID3D12Device,
    bindless: BindlessHeaps,
    rtv_heap: CpuDescriptorHeap,
    dsv_heap: CpuDescriptorHeap,

    /// ExecuteIndirect 使用的 command signature，按 stride 缓存
    command_signatures: Mutex<HashMap<u32, ID3D12CommandSignature>>,
}

// SAFETY: D3D12 的 device、heap 与 command signature 都是自由线程的对象，
// 可变的部分（CPU heap 的 free list、signature 缓存）都有锁保护
unsafe impl Send for DeviceShared {}
unsafe impl Sync for DeviceShared {}

// new & init
impl DeviceShared {
    pub fn new(adapter: &Adapter, descriptors: &DescriptorCapacities) -> GfxResult<Self> {
        let _span = tracy_client::span!("DeviceShared::new");

        let device = Self::create_device(adapter)?;
        let bindless = BindlessHeaps::new(&device, descriptors)?;
        let rtv_heap = CpuDescriptorHeap::new(&device, D3D12_DESCRIPTOR_HEAP_TYPE_RTV, RTV_HEAP_SIZE, "rtv")?;
        let dsv_heap = CpuDescriptorHeap::new(&device, D3D12_DESCRIPTOR_HEAP_TYPE_DSV, DSV_HEAP_SIZE, "dsv")?;

        Ok(Self {
            device,
            bindless,
            rtv_heap,
            dsv_heap,
            command_signatures: Mutex::new(HashMap::new()),
        })
    }

    /// bindless 需要 resource binding tier 3：UAV 与 CBV 的 descriptor table 才能覆盖整个 heap
    fn create_device(adapter: &Adapter) -> GfxResult<ID3D12Device> {
        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(adapter.adapter(), D3D_FEATURE_LEVEL_12_0, &mut device) }
            .map_err(|e| GfxError::DeviceCreateFailed(e.to_string()))?;
        let device = device.ok_or_else(|| GfxError::DeviceCreateFailed("D3D12CreateDevice returns null".to_string()))?;

        let mut options = D3D12_FEATURE_DATA_D3D12_OPTIONS::default();
        unsafe {
            device.CheckFeatureSupport(
                D3D12_FEATURE_D3D12_OPTIONS,
                &mut options as *mut _ as *mut c_void,
                std::mem::size_of_val(&options) as u32,
            )
        }
        .map_err(|e| GfxError::DeviceCreateFailed(format!("check options: {e}")))?;
        if options.ResourceBindingTier.0 < D3D12_RESOURCE_BINDING_TIER_3.0 {
            return Err(GfxError::GpuSelectionFailed(format!(
                "{} only supports {:?}, bindless requires tier 3",
                adapter.name(),
                options.ResourceBindingTier
            )));
        }

        set_debug_name(&device, "Device::strata");
        Ok(device)
    }
}

// getters
impl DeviceShared {
    #[inline]
    pub fn device(&self) -> &ID3D12Device {
        &self.device
    }

    #[inline]
    pub fn bindless(&self) -> &BindlessHeaps {
        &self.bindless
    }

    #[inline]
    pub fn rtv_heap(&self) -> &CpuDescriptorHeap {
        &self.rtv_heap
    }

    #[inline]
    pub fn dsv_heap(&self) -> &CpuDescriptorHeap {
        &self.dsv_heap
    }
}

// tools
impl DeviceShared {
    /// 获取 DrawIndexedIndirect 使用的 command signature，第一次使用某个 stride 时创建
    pub fn draw_indexed_signature(&self, stride: u32) -> GfxResult<ID3D12CommandSignature> {
        let stride = stride.max(DRAW_INDEXED_ARGUMENTS_SIZE);
        let mut signatures = self.command_signatures.lock();
        if let Some(signature) = signatures.get(&stride) {
            return Ok(signature.clone());
        }

        let argument = D3D12_INDIRECT_ARGUMENT_DESC {
            Type: D3D12_INDIRECT_ARGUMENT_TYPE_DRAW_INDEXED,
            ..Default::default()
        };
        let desc = D3D12_COMMAND_SIGNATURE_DESC {
            ByteStride: stride,
            NumArgumentDescs: 1,
            pArgumentDescs: &argument,
            NodeMask: 0,
        };
        // 只包含 draw 参数时不需要 root signature
        let mut signature: Option<ID3D12CommandSignature> = None;
        unsafe { self.device.CreateCommandSignature(&desc, None::<&ID3D12RootSignature>, &mut signature) }
            .map_err(|e| GfxError::PipelineCreateFailed(format!("command signature (stride {stride}): {e}")))?;
        let signature = signature
            .ok_or_else(|| GfxError::PipelineCreateFailed(format!("command signature (stride {stride}) is null")))?;
        set_debug_name(&signature, format!("CommandSignature::draw-indexed-{stride}"));

        signatures.insert(stride, signature.clone());
        Ok(signature)
    }
}

/// 为 D3D12 对象设置调试名称，在 PIX 与 debug layer 的消息中可见
pub fn set_debug_name<T: Interface>(object: &T, name: impl AsRef<str>) {
    if let Ok(object) = object.cast::<ID3D12Object>() {
        let _ = unsafe { object.SetName(&HSTRING::from(name.as_ref())) };
    }
}
