use strata_gfx::backend::RhiTexture;
use strata_gfx::basic::format::TextureFormat;
use strata_gfx::basic::types::Extent2D;
use strata_gfx::error::{GfxError, GfxResult};
use strata_gfx::handles::ImageUsage;
use strata_gfx::resources::texture::TextureDesc;
use strata_gfx::sync::resource_state::ImageLayout;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::DXGI_SAMPLE_DESC;

use crate::convert::{self, TextureFormats};
use crate::descriptors::cpu_heap::CpuDescriptor;
use crate::foundation::device::{DeviceShared, set_debug_name};

/// 2D 纹理
///
/// 颜色纹理持有一个 RTV，深度纹理持有一个 DSV，SRV 与 UAV 在写入 bindless slot 时创建
pub struct D3D12Texture {
    resource: ID3D12Resource,

    extent: Extent2D,
    format: TextureFormat,
    formats: TextureFormats,
    mip_levels: u32,
    allow_uav: bool,

    rtv: Option<CpuDescriptor>,
    dsv: Option<CpuDescriptor>,
}

// new & init
impl D3D12Texture {
    pub fn new(shared: &DeviceShared, desc: &TextureDesc) -> GfxResult<Self> {
        let _span = tracy_client::span!("D3D12Texture::new");

        let formats = convert::texture_formats(desc.format);
        let mip_levels = desc.mip_levels.max(1);
        let flags = Self::flags_of(desc.format, desc.usage);
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_DEFAULT,
            ..Default::default()
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Alignment: 0,
            Width: desc.extent.width.max(1) as u64,
            Height: desc.extent.height.max(1),
            DepthOrArraySize: 1,
            MipLevels: mip_levels as u16,
            Format: formats.resource,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
            Flags: flags,
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            shared.device().CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &resource_desc,
                D3D12_RESOURCE_STATE_COMMON,
                None,
                &mut resource,
            )
        }
        .map_err(|e| GfxError::ImageCreateFailed(format!("{}: {e}", desc.name)))?;
        let resource =
            resource.ok_or_else(|| GfxError::ImageCreateFailed(format!("{}: resource is null", desc.name)))?;
        set_debug_name(&resource, format!("Texture::{}", desc.name));

        let mut texture = Self {
            resource,
            extent: desc.extent,
            format: desc.format,
            formats,
            mip_levels,
            allow_uav: (flags & D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS) == D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS,
            rtv: None,
            dsv: None,
        };
        if let Err(e) = texture.create_target_view(shared) {
            texture.destroy(shared);
            return Err(e);
        }
        Ok(texture)
    }

    /// 包装 swapchain 的 back buffer，只创建 RTV
    ///
    /// back buffer 本身不能是 srgb 格式，但是 RTV 可以使用 srgb 格式
    pub fn from_swapchain_buffer(
        shared: &DeviceShared,
        resource: ID3D12Resource,
        extent: Extent2D,
        format: TextureFormat,
        name: &str,
    ) -> GfxResult<Self> {
        set_debug_name(&resource, format!("Texture::{name}"));
        let mut texture = Self {
            resource,
            extent,
            format,
            formats: convert::texture_formats(format),
            mip_levels: 1,
            allow_uav: false,
            rtv: None,
            dsv: None,
        };
        texture.create_target_view(shared)?;
        Ok(texture)
    }

    /// 所有纹理都可以作为拷贝的源和目标，并且可以被采样
    fn flags_of(format: TextureFormat, usage: ImageUsage) -> D3D12_RESOURCE_FLAGS {
        let mut flags = if format.is_depth() {
            D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL
        } else {
            D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET
        };
        // Temporary 的内容之后可能被提升为 storage image
        let storage = convert::supports_storage(format)
            && (usage.is_storage() || usage == ImageUsage::Temporary);
        if storage {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
        }
        flags
    }

    fn create_target_view(&mut self, shared: &DeviceShared) -> GfxResult<()> {
        let device = shared.device();
        if self.format.is_depth() {
            let dsv = shared.dsv_heap().allocate()?;
            let desc = D3D12_DEPTH_STENCIL_VIEW_DESC {
                Format: self.formats.target,
                ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
                Flags: D3D12_DSV_FLAG_NONE,
                Anonymous: D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                    Texture2D: D3D12_TEX2D_DSV { MipSlice: 0 },
                },
            };
            unsafe { device.CreateDepthStencilView(&self.resource, Some(&desc), dsv.handle()) };
            self.dsv = Some(dsv);
        } else {
            let rtv = shared.rtv_heap().allocate()?;
            let desc = D3D12_RENDER_TARGET_VIEW_DESC {
                Format: self.formats.target,
                ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
                Anonymous: D3D12_RENDER_TARGET_VIEW_DESC_0 {
                    Texture2D: D3D12_TEX2D_RTV {
                        MipSlice: 0,
                        PlaneSlice: 0,
                    },
                },
            };
            unsafe { device.CreateRenderTargetView(&self.resource, Some(&desc), rtv.handle()) };
            self.rtv = Some(rtv);
        }
        Ok(())
    }
}

// getters
impl D3D12Texture {
    #[inline]
    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    #[inline]
    pub fn formats(&self) -> TextureFormats {
        self.formats
    }

    #[inline]
    pub fn allow_uav(&self) -> bool {
        self.allow_uav
    }

    #[inline]
    pub fn rtv(&self) -> Option<D3D12_CPU_DESCRIPTOR_HANDLE> {
        self.rtv.map(|rtv| rtv.handle())
    }

    #[inline]
    pub fn dsv(&self) -> Option<D3D12_CPU_DESCRIPTOR_HANDLE> {
        self.dsv.map(|dsv| dsv.handle())
    }

    /// `General` 布局对应的资源状态
    #[inline]
    pub fn general_state(&self) -> D3D12_RESOURCE_STATES {
        convert::texture_state(ImageLayout::General, self.allow_uav)
    }

    /// 覆盖全部 mip 的 SRV
    pub fn srv_desc(&self) -> D3D12_SHADER_RESOURCE_VIEW_DESC {
        D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: self.formats.view,
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: self.mip_levels,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                },
            },
        }
    }

    /// mip 0 的 UAV
    pub fn uav_desc(&self) -> D3D12_UNORDERED_ACCESS_VIEW_DESC {
        D3D12_UNORDERED_ACCESS_VIEW_DESC {
            Format: self.formats.view,
            ViewDimension: D3D12_UAV_DIMENSION_TEXTURE2D,
            Anonymous: D3D12_UNORDERED_ACCESS_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_UAV {
                    MipSlice: 0,
                    PlaneSlice: 0,
                },
            },
        }
    }
}

// destroy
impl D3D12Texture {
    /// 归还 RTV/DSV，资源本身在 drop 时释放
    pub fn destroy(self, shared: &DeviceShared) {
        if let Some(rtv) = self.rtv {
            shared.rtv_heap().free(rtv);
        }
        if let Some(dsv) = self.dsv {
            shared.dsv_heap().free(dsv);
        }
    }
}

impl RhiTexture for D3D12Texture {
    #[inline]
    fn extent(&self) -> Extent2D {
        self.extent
    }

    #[inline]
    fn format(&self) -> TextureFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has(flags: D3D12_RESOURCE_FLAGS, flag: D3D12_RESOURCE_FLAGS) -> bool {
        (flags & flag) == flag
    }

    #[test]
    fn test_resource_flags() {
        let depth = D3D12Texture::flags_of(TextureFormat::D32Float, ImageUsage::Temporary);
        assert!(has(depth, D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL));
        assert!(!has(depth, D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS));

        let temp = D3D12Texture::flags_of(TextureFormat::Rgba16Float, ImageUsage::Temporary);
        assert!(has(temp, D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET | D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS));

        let srgb = D3D12Texture::flags_of(TextureFormat::Rgba8Srgb, ImageUsage::Sampled);
        assert!(!has(srgb, D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS));

        let rw = D3D12Texture::flags_of(TextureFormat::Rgba8Unorm, ImageUsage::ReadWrite);
        assert!(has(rw, D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS));
    }
}
