//! 资源句柄定义
//!
//! Image 与 Buffer 句柄都是 32 位的打包整数：`(index << 8) | tag`。
//! 高 24 位为资源在其所属数组中的索引，低 8 位为 usage tag，tag 决定了 index 指向哪个数组。
//! 同一个句柄空间可以同时服务 writable / sampled / temporary 三个 image 数组。

use std::fmt;

slotmap::new_key_type! {
    pub struct ShaderHandle;
}

/// 句柄中 index 的位宽
pub const HANDLE_INDEX_BITS: u32 = 24;
pub const HANDLE_INDEX_MAX: u32 = (1 << HANDLE_INDEX_BITS) - 1;

/// 将 `(index, tag)` 打包成 32 位句柄
#[inline]
pub const fn pack_handle(index: u32, tag: u8) -> u32 {
    debug_assert!(index <= HANDLE_INDEX_MAX);
    ((index & HANDLE_INDEX_MAX) << 8) | tag as u32
}

/// [`pack_handle`] 的逆运算
#[inline]
pub const fn unpack_handle(raw: u32) -> (u32, u8) {
    ((raw >> 8) & HANDLE_INDEX_MAX, (raw & 0xFF) as u8)
}

// ImageUsage ------------------------------------------------------------------------------------

/// Image 的用途，同时作为 image 句柄的 tag
///
/// 不同的用途会分配不同种类的 descriptor slot：
/// - `SampledReadWrite`：SampledImage + StorageImage
/// - `ReadWrite`：StorageImage
/// - `Sampled`：SampledImage
/// - `Temporary`：不分配 slot，只能通过 `update_image` 提升为其他 image 的内容
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ImageUsage {
    SampledReadWrite = 0,
    ReadWrite = 1,
    Sampled = 2,
    Temporary = 3,
}

impl ImageUsage {
    #[inline]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::SampledReadWrite),
            1 => Some(Self::ReadWrite),
            2 => Some(Self::Sampled),
            3 => Some(Self::Temporary),
            _ => None,
        }
    }

    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// 是否需要 SampledImage slot
    #[inline]
    pub fn is_sampled(self) -> bool {
        matches!(self, Self::SampledReadWrite | Self::Sampled)
    }

    /// 是否需要 StorageImage slot
    #[inline]
    pub fn is_storage(self) -> bool {
        matches!(self, Self::SampledReadWrite | Self::ReadWrite)
    }
}

/// Image 所在的后备数组
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageArray {
    Writable,
    Sampled,
    Temporary,
}

impl From<ImageUsage> for ImageArray {
    #[inline]
    fn from(usage: ImageUsage) -> Self {
        match usage {
            ImageUsage::SampledReadWrite | ImageUsage::ReadWrite => Self::Writable,
            ImageUsage::Sampled => Self::Sampled,
            ImageUsage::Temporary => Self::Temporary,
        }
    }
}

// ImageHandle -----------------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle {
    pub index: u32,
    pub usage: ImageUsage,
}

impl ImageHandle {
    #[inline]
    pub fn new(index: u32, usage: ImageUsage) -> Self {
        debug_assert!(index <= HANDLE_INDEX_MAX);
        Self { index, usage }
    }

    #[inline]
    pub fn pack(self) -> u32 {
        pack_handle(self.index, self.usage.tag())
    }

    /// tag 不是合法的 [`ImageUsage`] 时返回 None
    #[inline]
    pub fn unpack(raw: u32) -> Option<Self> {
        let (index, tag) = unpack_handle(raw);
        ImageUsage::from_tag(tag).map(|usage| Self { index, usage })
    }

    #[inline]
    pub fn array(self) -> ImageArray {
        self.usage.into()
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Image({}:{:?})", self.index, self.usage)
    }
}

// BufferHandle ----------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BufferLocation {
    /// GPU 本地显存（以及 staging / uniform 等 host 可写的 buffer）
    Device = 0,
    /// 用于回读的 host 可读 buffer
    Readback = 1,
}

impl BufferLocation {
    #[inline]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Device),
            1 => Some(Self::Readback),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    pub index: u32,
    pub location: BufferLocation,
}

impl BufferHandle {
    #[inline]
    pub fn new(index: u32, location: BufferLocation) -> Self {
        debug_assert!(index <= HANDLE_INDEX_MAX);
        Self { index, location }
    }

    #[inline]
    pub fn pack(self) -> u32 {
        pack_handle(self.index, self.location as u8)
    }

    #[inline]
    pub fn unpack(raw: u32) -> Option<Self> {
        let (index, tag) = unpack_handle(raw);
        BufferLocation::from_tag(tag).map(|location| Self { index, location })
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer({}:{:?})", self.index, self.location)
    }
}

// SamplerHandle ---------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerHandle(pub(crate) u32);

impl SamplerHandle {
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_raw() {
        let indices = [0, 1, 255, 256, 0xABCDE, HANDLE_INDEX_MAX];
        for index in indices {
            for tag in [0u8, 1, 2, 3, 0x7F, 0xFF] {
                assert_eq!(unpack_handle(pack_handle(index, tag)), (index, tag));
            }
        }
    }

    #[test]
    fn test_pack_layout() {
        assert_eq!(pack_handle(1, 2), 0x102);
        assert_eq!(ImageHandle::new(3, ImageUsage::Temporary).pack(), (3 << 8) | 3);
    }

    #[test]
    fn test_image_handle_roundtrip() {
        let handle = ImageHandle::new(42, ImageUsage::Sampled);
        assert_eq!(ImageHandle::unpack(handle.pack()), Some(handle));
        assert_eq!(handle.array(), ImageArray::Sampled);
        assert_eq!(ImageHandle::new(0, ImageUsage::ReadWrite).array(), ImageArray::Writable);
    }

    #[test]
    fn test_image_handle_invalid_tag() {
        assert_eq!(ImageHandle::unpack(pack_handle(7, 9)), None);
    }

    #[test]
    fn test_buffer_handle_roundtrip() {
        let handle = BufferHandle::new(1000, BufferLocation::Readback);
        assert_eq!(BufferHandle::unpack(handle.pack()), Some(handle));
        assert_eq!(BufferHandle::unpack(pack_handle(0, 2)), None);
    }
}
