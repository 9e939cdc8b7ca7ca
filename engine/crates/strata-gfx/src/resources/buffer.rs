use crate::backend::RhiDevice;
use crate::descriptors::descriptor_allocator::{DescriptorKind, DescriptorSlot};
use crate::handles::BufferLocation;
use crate::sync::resource_state::BufferState;

/// Buffer 的用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    /// host 可写，分配 ConstantBuffer slot
    Uniform,
    /// GPU 本地，分配 StorageBuffer slot，可通过 device address 访问
    Storage,
    Index,
    Indirect,
    /// host 可读，位于 readback 数组
    Readback,
    /// host 可写的上传缓冲区
    Staging,
}

impl BufferType {
    #[inline]
    pub fn is_host_visible(self) -> bool {
        matches!(self, Self::Uniform | Self::Readback | Self::Staging)
    }

    #[inline]
    pub fn location(self) -> BufferLocation {
        match self {
            Self::Readback => BufferLocation::Readback,
            _ => BufferLocation::Device,
        }
    }

    #[inline]
    pub fn descriptor_kind(self) -> Option<DescriptorKind> {
        match self {
            Self::Storage => Some(DescriptorKind::StorageBuffer),
            Self::Uniform => Some(DescriptorKind::ConstantBuffer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: u64,
    pub ty: BufferType,
    pub name: String,
}

impl BufferDesc {
    pub fn new(size: u64, ty: BufferType, name: impl AsRef<str>) -> Self {
        Self {
            size,
            ty,
            name: name.as_ref().to_string(),
        }
    }
}

/// 已注册的 buffer 及其状态
pub struct BufferRecord<D: RhiDevice> {
    pub(crate) buffer: D::Buffer,
    pub(crate) desc: BufferDesc,
    pub(crate) state: BufferState,
    pub(crate) slot: Option<DescriptorSlot>,
}

impl<D: RhiDevice> BufferRecord<D> {
    #[inline]
    pub fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }

    #[inline]
    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    #[inline]
    pub fn state(&self) -> BufferState {
        self.state
    }

    #[inline]
    pub fn slot(&self) -> Option<DescriptorSlot> {
        self.slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_type_routing() {
        assert_eq!(BufferType::Readback.location(), BufferLocation::Readback);
        assert_eq!(BufferType::Storage.location(), BufferLocation::Device);
        assert_eq!(BufferType::Storage.descriptor_kind(), Some(DescriptorKind::StorageBuffer));
        assert_eq!(BufferType::Uniform.descriptor_kind(), Some(DescriptorKind::ConstantBuffer));
        assert_eq!(BufferType::Index.descriptor_kind(), None);
        assert!(BufferType::Staging.is_host_visible());
        assert!(!BufferType::Indirect.is_host_visible());
    }
}
