use std::ffi::c_void;
use std::ptr::NonNull;

use strata_gfx::backend::RhiBuffer;
use strata_gfx::error::{GfxError, GfxResult};
use strata_gfx::resources::buffer::{BufferDesc, BufferType};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_UNKNOWN, DXGI_SAMPLE_DESC};

use crate::foundation::device::set_debug_name;

/// committed resource 形式的 buffer
pub struct D3D12Buffer {
    resource: ID3D12Resource,
    size: u64,
    ty: BufferType,

    /// upload 与 readback heap 上的 buffer 在创建时持久映射
    mapped_ptr: Option<NonNull<u8>>,
    device_address: u64,
}

// 映射地址只在 host 端被 Context 串行访问
unsafe impl Send for D3D12Buffer {}
unsafe impl Sync for D3D12Buffer {}

// new & init
impl D3D12Buffer {
    pub fn new(device: &ID3D12Device, desc: &BufferDesc) -> GfxResult<Self> {
        let _span = tracy_client::span!("D3D12Buffer::new");

        let size = Self::aligned_size(desc.ty, desc.size);
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: Self::heap_type_of(desc.ty),
            ..Default::default()
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Alignment: 0,
            Width: size,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: Self::flags_of(desc.ty),
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            device.CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &resource_desc,
                Self::initial_state_of(desc.ty),
                None,
                &mut resource,
            )
        }
        .map_err(|e| GfxError::BufferCreateFailed(format!("{}: {e}", desc.name)))?;
        let resource =
            resource.ok_or_else(|| GfxError::BufferCreateFailed(format!("{}: resource is null", desc.name)))?;

        let mapped_ptr = if desc.ty.is_host_visible() {
            // upload heap 上的 buffer 不会被 CPU 读取
            let no_read = D3D12_RANGE { Begin: 0, End: 0 };
            let read_range = if desc.ty == BufferType::Readback { None } else { Some(&no_read as *const _) };
            let mut data: *mut c_void = std::ptr::null_mut();
            unsafe { resource.Map(0, read_range, Some(&mut data)) }
                .map_err(|e| GfxError::BufferMapFailed(format!("{}: {e}", desc.name)))?;
            Some(NonNull::new(data as *mut u8).ok_or_else(|| GfxError::BufferMapFailed(desc.name.clone()))?)
        } else {
            None
        };

        set_debug_name(&resource, format!("Buffer::{}", desc.name));
        Ok(Self {
            device_address: unsafe { resource.GetGPUVirtualAddress() },
            resource,
            size: desc.size,
            ty: desc.ty,
            mapped_ptr,
        })
    }

    /// CBV 要求 256 字节对齐，raw UAV 以 4 字节为单位
    fn aligned_size(ty: BufferType, size: u64) -> u64 {
        let size = size.max(1);
        match ty {
            BufferType::Uniform => size.next_multiple_of(D3D12_CONSTANT_BUFFER_DATA_PLACEMENT_ALIGNMENT as u64),
            _ => size.next_multiple_of(4),
        }
    }

    fn heap_type_of(ty: BufferType) -> D3D12_HEAP_TYPE {
        match ty {
            BufferType::Uniform | BufferType::Staging => D3D12_HEAP_TYPE_UPLOAD,
            BufferType::Readback => D3D12_HEAP_TYPE_READBACK,
            BufferType::Storage | BufferType::Index | BufferType::Indirect => D3D12_HEAP_TYPE_DEFAULT,
        }
    }

    /// upload heap 的资源必须一直处于 GENERIC_READ，readback heap 的资源必须一直处于 COPY_DEST
    fn initial_state_of(ty: BufferType) -> D3D12_RESOURCE_STATES {
        match Self::heap_type_of(ty) {
            D3D12_HEAP_TYPE_UPLOAD => D3D12_RESOURCE_STATE_GENERIC_READ,
            D3D12_HEAP_TYPE_READBACK => D3D12_RESOURCE_STATE_COPY_DEST,
            _ => D3D12_RESOURCE_STATE_COMMON,
        }
    }

    /// index 与 indirect buffer 也可以被 compute shader 写入
    fn flags_of(ty: BufferType) -> D3D12_RESOURCE_FLAGS {
        match ty {
            BufferType::Storage | BufferType::Index | BufferType::Indirect => {
                D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS
            }
            _ => D3D12_RESOURCE_FLAG_NONE,
        }
    }
}

// getters
impl D3D12Buffer {
    #[inline]
    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }

    #[inline]
    pub fn ty(&self) -> BufferType {
        self.ty
    }

    /// 实际分配的大小
    #[inline]
    pub fn allocated_size(&self) -> u64 {
        Self::aligned_size(self.ty, self.size)
    }

    /// upload 与 readback heap 上的资源状态固定，不能参与 barrier
    #[inline]
    pub fn has_fixed_state(&self) -> bool {
        self.ty.is_host_visible()
    }
}

// destroy
impl D3D12Buffer {
    pub fn destroy(self) {
        if self.mapped_ptr.is_some() {
            unsafe { self.resource.Unmap(0, None) };
        }
    }
}

impl RhiBuffer for D3D12Buffer {
    #[inline]
    fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.mapped_ptr
    }

    #[inline]
    fn device_address(&self) -> u64 {
        self.device_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_types() {
        assert_eq!(D3D12Buffer::heap_type_of(BufferType::Uniform), D3D12_HEAP_TYPE_UPLOAD);
        assert_eq!(D3D12Buffer::heap_type_of(BufferType::Readback), D3D12_HEAP_TYPE_READBACK);
        assert_eq!(D3D12Buffer::heap_type_of(BufferType::Index), D3D12_HEAP_TYPE_DEFAULT);
        assert_eq!(D3D12Buffer::initial_state_of(BufferType::Staging), D3D12_RESOURCE_STATE_GENERIC_READ);
        assert_eq!(D3D12Buffer::initial_state_of(BufferType::Readback), D3D12_RESOURCE_STATE_COPY_DEST);
        assert_eq!(D3D12Buffer::initial_state_of(BufferType::Storage), D3D12_RESOURCE_STATE_COMMON);
    }

    #[test]
    fn test_aligned_size() {
        assert_eq!(D3D12Buffer::aligned_size(BufferType::Uniform, 64), 256);
        assert_eq!(D3D12Buffer::aligned_size(BufferType::Storage, 10), 12);
        assert_eq!(D3D12Buffer::aligned_size(BufferType::Staging, 0), 4);
    }
}
