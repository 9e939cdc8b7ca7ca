use strata_gfx::resources::sampler::SamplerDesc;
use windows::Win32::Graphics::Direct3D12::*;

use crate::convert;

/// D3D12 的 sampler 不是对象，只是写入 sampler heap 的描述
pub struct D3D12Sampler {
    desc: D3D12_SAMPLER_DESC,
}

// new & init
impl D3D12Sampler {
    pub fn new(desc: &SamplerDesc) -> Self {
        let max_anisotropy = desc.max_anisotropy.map(|value| value.clamp(1.0, D3D12_MAX_MAXANISOTROPY as f32));
        Self {
            desc: D3D12_SAMPLER_DESC {
                Filter: convert::filter(desc.min_filter, desc.mag_filter, desc.mipmap_filter, max_anisotropy.is_some()),
                AddressU: convert::address_mode(desc.address_u),
                AddressV: convert::address_mode(desc.address_v),
                AddressW: convert::address_mode(desc.address_w),
                MipLODBias: 0.0,
                MaxAnisotropy: max_anisotropy.unwrap_or(1.0) as u32,
                ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
                BorderColor: [0.0; 4],
                MinLOD: 0.0,
                MaxLOD: f32::MAX,
            },
        }
    }
}

// getters
impl D3D12Sampler {
    #[inline]
    pub fn desc(&self) -> &D3D12_SAMPLER_DESC {
        &self.desc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anisotropy_clamped() {
        let desc = SamplerDesc {
            max_anisotropy: Some(64.0),
            ..SamplerDesc::linear_repeat()
        };
        let sampler = D3D12Sampler::new(&desc);
        assert_eq!(sampler.desc().Filter, D3D12_FILTER_ANISOTROPIC);
        assert_eq!(sampler.desc().MaxAnisotropy, 16);

        let sampler = D3D12Sampler::new(&SamplerDesc::nearest_clamp());
        assert_eq!(sampler.desc().Filter, D3D12_FILTER_MIN_MAG_MIP_POINT);
        assert_eq!(sampler.desc().AddressU, D3D12_TEXTURE_ADDRESS_MODE_CLAMP);
    }
}
