use crate::backend::RhiDevice;
use crate::descriptors::descriptor_allocator::DescriptorSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDesc {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub mipmap_filter: Filter,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    /// None 表示不开启各向异性过滤
    pub max_anisotropy: Option<f32>,
    pub name: String,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self::linear_repeat()
    }
}

impl SamplerDesc {
    /// 默认 sampler，位于 sampler slot 0
    pub fn linear_repeat() -> Self {
        Self {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            mipmap_filter: Filter::Linear,
            address_u: AddressMode::Repeat,
            address_v: AddressMode::Repeat,
            address_w: AddressMode::Repeat,
            max_anisotropy: None,
            name: "default-linear".to_string(),
        }
    }

    pub fn nearest_clamp() -> Self {
        Self {
            mag_filter: Filter::Nearest,
            min_filter: Filter::Nearest,
            mipmap_filter: Filter::Nearest,
            address_u: AddressMode::ClampToEdge,
            address_v: AddressMode::ClampToEdge,
            address_w: AddressMode::ClampToEdge,
            max_anisotropy: None,
            name: "nearest-clamp".to_string(),
        }
    }
}

pub struct SamplerRecord<D: RhiDevice> {
    pub(crate) sampler: D::Sampler,
    pub(crate) slot: DescriptorSlot,
}

impl<D: RhiDevice> SamplerRecord<D> {
    #[inline]
    pub fn sampler(&self) -> &D::Sampler {
        &self.sampler
    }

    #[inline]
    pub fn slot(&self) -> DescriptorSlot {
        self.slot
    }
}
