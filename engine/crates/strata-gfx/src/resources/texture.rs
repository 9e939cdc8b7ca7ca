use crate::backend::RhiDevice;
use crate::basic::format::TextureFormat;
use crate::basic::types::Extent2D;
use crate::descriptors::descriptor_allocator::{DescriptorKind, DescriptorSlot};
use crate::handles::ImageUsage;
use crate::sync::resource_state::ImageState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub extent: Extent2D,
    pub format: TextureFormat,
    pub usage: ImageUsage,
    pub mip_levels: u32,
    pub name: String,
}

impl TextureDesc {
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: ImageUsage) -> Self {
        Self {
            extent: Extent2D::new(width, height),
            format,
            usage,
            mip_levels: 1,
            name: String::new(),
        }
    }

    /// 与 swapchain 同尺寸的深度图，不占用 descriptor slot
    pub fn depth(extent: Extent2D, format: TextureFormat) -> Self {
        debug_assert!(format.is_depth());
        Self {
            extent,
            format,
            usage: ImageUsage::Temporary,
            mip_levels: 1,
            name: "swapchain-depth".to_string(),
        }
    }

    #[inline]
    pub fn with_name(mut self, name: impl AsRef<str>) -> Self {
        self.name = name.as_ref().to_string();
        self
    }

    #[inline]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    /// mip 0 的数据大小
    #[inline]
    pub fn base_level_size(&self) -> u64 {
        self.extent.width as u64 * self.extent.height as u64 * self.format.bytes_per_pixel() as u64
    }

    /// mip 0 的一行在 buffer 中的跨度，按 `alignment` 向上对齐
    #[inline]
    pub fn row_pitch(&self, alignment: u64) -> u64 {
        (self.extent.width as u64 * self.format.bytes_per_pixel() as u64).next_multiple_of(alignment.max(1))
    }

    /// 按 `row_pitch` 排列时 mip 0 占用的 buffer 大小
    #[inline]
    pub fn pitched_size(&self, alignment: u64) -> u64 {
        self.row_pitch(alignment) * self.extent.height as u64
    }

    /// 需要分配的 descriptor 种类
    pub fn descriptor_kinds(&self) -> impl Iterator<Item = DescriptorKind> {
        let sampled = self.usage.is_sampled().then_some(DescriptorKind::SampledImage);
        let storage = self.usage.is_storage().then_some(DescriptorKind::StorageImage);
        sampled.into_iter().chain(storage)
    }
}

/// 已注册的 texture 及其状态
pub struct TextureRecord<D: RhiDevice> {
    pub(crate) texture: D::Texture,
    pub(crate) desc: TextureDesc,
    pub(crate) state: ImageState,
    pub(crate) sampled_slot: Option<DescriptorSlot>,
    pub(crate) storage_slot: Option<DescriptorSlot>,
}

impl<D: RhiDevice> TextureRecord<D> {
    #[inline]
    pub fn texture(&self) -> &D::Texture {
        &self.texture
    }

    #[inline]
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    #[inline]
    pub fn state(&self) -> ImageState {
        self.state
    }

    #[inline]
    pub fn sampled_slot(&self) -> Option<DescriptorSlot> {
        self.sampled_slot
    }

    #[inline]
    pub fn storage_slot(&self) -> Option<DescriptorSlot> {
        self.storage_slot
    }

    /// shader 中访问该 image 时使用的索引：优先 sampled slot
    #[inline]
    pub fn slot_index(&self) -> Option<u32> {
        self.sampled_slot.or(self.storage_slot).map(|slot| slot.index)
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = DescriptorSlot> {
        self.sampled_slot.into_iter().chain(self.storage_slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_kinds_per_usage() {
        let kinds = |usage| {
            TextureDesc::new_2d(4, 4, TextureFormat::Rgba8Unorm, usage).descriptor_kinds().collect::<Vec<_>>()
        };
        assert_eq!(kinds(ImageUsage::SampledReadWrite), vec![DescriptorKind::SampledImage, DescriptorKind::StorageImage]);
        assert_eq!(kinds(ImageUsage::ReadWrite), vec![DescriptorKind::StorageImage]);
        assert_eq!(kinds(ImageUsage::Sampled), vec![DescriptorKind::SampledImage]);
        assert!(kinds(ImageUsage::Temporary).is_empty());
    }

    #[test]
    fn test_row_pitch_alignment() {
        let desc = TextureDesc::new_2d(10, 3, TextureFormat::Rgba8Unorm, ImageUsage::Sampled);
        assert_eq!(desc.row_pitch(1), 40);
        assert_eq!(desc.row_pitch(256), 256);
        assert_eq!(desc.pitched_size(1), desc.base_level_size());
        assert_eq!(desc.pitched_size(256), 768);

        let wide = TextureDesc::new_2d(64, 2, TextureFormat::Rgba8Unorm, ImageUsage::Sampled);
        assert_eq!(wide.row_pitch(256), 256);
    }

    #[test]
    fn test_base_level_size() {
        let desc = TextureDesc::new_2d(16, 8, TextureFormat::Rgba16Float, ImageUsage::Sampled);
        assert_eq!(desc.base_level_size(), 16 * 8 * 8);
    }
}
