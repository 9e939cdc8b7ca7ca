use std::ptr::NonNull;

use ash::vk;
use strata_gfx::backend::RhiBuffer;
use strata_gfx::error::{GfxError, GfxResult};
use strata_gfx::resources::buffer::{BufferDesc, BufferType};
use vk_mem::Alloc;

use crate::foundation::device::DeviceFunctions;

pub struct VulkanBuffer {
    handle: vk::Buffer,
    allocation: vk_mem::Allocation,

    size: vk::DeviceSize,

    /// host 可见的 buffer 在创建时持久映射
    mapped_ptr: Option<NonNull<u8>>,
    /// 只有在 buffer usage 包含 SHADER_DEVICE_ADDRESS 时才有值
    device_addr: Option<vk::DeviceAddress>,
}

// 映射地址只在 host 端被 Context 串行访问
unsafe impl Send for VulkanBuffer {}
unsafe impl Sync for VulkanBuffer {}

// new & init
impl VulkanBuffer {
    pub fn new(allocator: &vk_mem::Allocator, device: &DeviceFunctions, desc: &BufferDesc) -> GfxResult<Self> {
        let _span = tracy_client::span!("VulkanBuffer::new");

        let usage = Self::usage_of(desc.ty);
        let buffer_ci = vk::BufferCreateInfo::default().size(desc.size.max(1)).usage(usage);
        let alloc_ci = Self::alloc_info_of(desc.ty);

        let (handle, allocation) = unsafe { allocator.create_buffer(&buffer_ci, &alloc_ci) }
            .map_err(|e| GfxError::BufferCreateFailed(format!("{}: {e:?}", desc.name)))?;

        let mapped_ptr = if desc.ty.is_host_visible() {
            let info = allocator.get_allocation_info(&allocation);
            match NonNull::new(info.mapped_data as *mut u8) {
                Some(ptr) => Some(ptr),
                None => {
                    let mut allocation = allocation;
                    unsafe { allocator.destroy_buffer(handle, &mut allocation) };
                    return Err(GfxError::BufferMapFailed(desc.name.clone()));
                }
            }
        } else {
            None
        };

        let device_addr = usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS).then(|| unsafe {
            device.get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(handle))
        });

        device.set_object_debug_name(handle, format!("Buffer::{}", desc.name));
        Ok(Self {
            handle,
            allocation,
            size: desc.size,
            mapped_ptr,
            device_addr,
        })
    }

    /// 不允许 UNIFORM + DBA 的组合，uniform buffer 只通过 descriptor 访问
    fn usage_of(ty: BufferType) -> vk::BufferUsageFlags {
        let transfer = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        match ty {
            BufferType::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER | transfer,
            BufferType::Storage => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS | transfer
            }
            BufferType::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER
                    | vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                    | transfer
            }
            BufferType::Indirect => {
                vk::BufferUsageFlags::INDIRECT_BUFFER
                    | vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                    | transfer
            }
            BufferType::Readback => vk::BufferUsageFlags::TRANSFER_DST,
            BufferType::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    fn alloc_info_of(ty: BufferType) -> vk_mem::AllocationCreateInfo {
        let mapped = vk_mem::AllocationCreateFlags::MAPPED;
        match ty {
            BufferType::Uniform => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                flags: mapped | vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                required_flags: vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            },
            BufferType::Readback => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: mapped | vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                required_flags: vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            },
            BufferType::Staging => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: mapped | vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                required_flags: vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            },
            BufferType::Storage | BufferType::Index | BufferType::Indirect => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
        }
    }
}

// getters
impl VulkanBuffer {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.handle
    }
}

// destroy
impl VulkanBuffer {
    pub fn destroy(mut self, allocator: &vk_mem::Allocator) {
        unsafe { allocator.destroy_buffer(self.handle, &mut self.allocation) };
    }
}

impl RhiBuffer for VulkanBuffer {
    #[inline]
    fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.mapped_ptr
    }

    /// 没有 device address 的 buffer 返回 0
    #[inline]
    fn device_address(&self) -> u64 {
        self.device_addr.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_has_no_device_address() {
        let usage = VulkanBuffer::usage_of(BufferType::Uniform);
        assert!(usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER));
        assert!(!usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));
    }

    #[test]
    fn test_host_visible_buffers_are_mapped() {
        for ty in [BufferType::Uniform, BufferType::Readback, BufferType::Staging] {
            let info = VulkanBuffer::alloc_info_of(ty);
            assert!(info.flags.contains(vk_mem::AllocationCreateFlags::MAPPED), "{ty:?}");
        }
        let info = VulkanBuffer::alloc_info_of(BufferType::Storage);
        assert!(!info.flags.contains(vk_mem::AllocationCreateFlags::MAPPED));
    }
}
