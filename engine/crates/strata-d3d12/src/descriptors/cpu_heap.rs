use parking_lot::Mutex;
use strata_gfx::error::{GfxError, GfxResult};
use windows::Win32::Graphics::Direct3D12::*;

use crate::descriptors::free_list::FreeList;
use crate::foundation::device::set_debug_name;

/// CPU heap 中的一个 descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuDescriptor {
    index: u32,
    handle: D3D12_CPU_DESCRIPTOR_HANDLE,
}

impl CpuDescriptor {
    #[inline]
    pub fn handle(&self) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        self.handle
    }
}

/// 非 shader visible 的 descriptor heap，用于 RTV 与 DSV
pub struct CpuDescriptorHeap {
    heap: ID3D12DescriptorHeap,
    start: D3D12_CPU_DESCRIPTOR_HANDLE,
    increment: usize,
    free_list: Mutex<FreeList>,
    name: String,
}

// new & init
impl CpuDescriptorHeap {
    pub fn new(device: &ID3D12Device, ty: D3D12_DESCRIPTOR_HEAP_TYPE, capacity: u32, name: &str) -> GfxResult<Self> {
        let desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: ty,
            NumDescriptors: capacity,
            Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
            NodeMask: 0,
        };
        let heap: ID3D12DescriptorHeap = unsafe { device.CreateDescriptorHeap(&desc) }
            .map_err(|e| GfxError::DescriptorLayoutCreateFailed(format!("{name} heap: {e}")))?;
        set_debug_name(&heap, format!("DescriptorHeap::{name}"));

        Ok(Self {
            start: unsafe { heap.GetCPUDescriptorHandleForHeapStart() },
            increment: unsafe { device.GetDescriptorHandleIncrementSize(ty) } as usize,
            heap,
            free_list: Mutex::new(FreeList::new(capacity)),
            name: name.to_string(),
        })
    }
}

impl CpuDescriptorHeap {
    pub fn allocate(&self) -> GfxResult<CpuDescriptor> {
        let index = self.free_list.lock().allocate().ok_or_else(|| {
            GfxError::ImageViewCreateFailed(format!("{} heap exhausted ({})", self.name, self.heap_capacity()))
        })?;
        Ok(CpuDescriptor {
            index,
            handle: D3D12_CPU_DESCRIPTOR_HANDLE {
                ptr: self.start.ptr + index as usize * self.increment,
            },
        })
    }

    pub fn free(&self, descriptor: CpuDescriptor) {
        self.free_list.lock().release(descriptor.index);
    }

    fn heap_capacity(&self) -> u32 {
        self.free_list.lock().capacity()
    }

    #[inline]
    pub fn heap(&self) -> &ID3D12DescriptorHeap {
        &self.heap
    }
}
