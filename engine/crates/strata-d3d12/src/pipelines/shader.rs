use std::ffi::c_void;

use strata_gfx::backend::RhiShader;
use strata_gfx::error::{GfxError, GfxResult};
use strata_gfx::resources::shader::{ComputeShaderDesc, GraphicsShaderDesc, ShaderDesc, ShaderKind};
use windows::Win32::Foundation::BOOL;
use windows::Win32::Graphics::Direct3D::D3D_PRIMITIVE_TOPOLOGY;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_UNKNOWN, DXGI_SAMPLE_DESC};

use crate::convert;
use crate::foundation::device::set_debug_name;

/// DXIL 与 DXBC 都使用同一种容器格式
const DXIL_CONTAINER_MAGIC: &[u8; 4] = b"DXBC";

/// 一个 pipeline state，所有 pipeline 共享 bindless root signature
pub struct D3D12Shader {
    pso: ID3D12PipelineState,
    kind: ShaderKind,
    /// 录制时通过 IASetPrimitiveTopology 设置，compute shader 为 None
    topology: Option<D3D_PRIMITIVE_TOPOLOGY>,
}

// new & init
impl D3D12Shader {
    pub fn new(device: &ID3D12Device, root_signature: &ID3D12RootSignature, desc: &ShaderDesc<'_>) -> GfxResult<Self> {
        let _span = tracy_client::span!("D3D12Shader::new");

        let (pso, topology) = match desc {
            ShaderDesc::Graphics(graphics) => {
                (Self::create_graphics(device, root_signature, graphics)?, Some(convert::topology(graphics.topology)))
            }
            ShaderDesc::Compute(compute) => (Self::create_compute(device, root_signature, compute)?, None),
        };
        set_debug_name(&pso, format!("Pipeline::{}", desc.name()));
        Ok(Self {
            pso,
            kind: desc.kind(),
            topology,
        })
    }

    /// DXIL 的入口由编译时决定，desc 中的 entry 名字不参与 pipeline 创建
    fn create_graphics(
        device: &ID3D12Device,
        root_signature: &ID3D12RootSignature,
        desc: &GraphicsShaderDesc<'_>,
    ) -> GfxResult<ID3D12PipelineState> {
        let vertex = bytecode(desc.vertex, desc.name)?;
        let fragment = bytecode(desc.fragment, desc.name)?;

        if desc.color_formats.len() > D3D12_SIMULTANEOUS_RENDER_TARGET_COUNT as usize {
            return Err(GfxError::PipelineCreateFailed(format!(
                "{}: {} color attachments exceed the limit of {}",
                desc.name,
                desc.color_formats.len(),
                D3D12_SIMULTANEOUS_RENDER_TARGET_COUNT
            )));
        }
        let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
        for (dst, src) in rtv_formats.iter_mut().zip(desc.color_formats.iter()) {
            *dst = convert::texture_formats(*src).target;
        }
        let dsv_format = desc.depth_format.map(|f| convert::texture_formats(f).target).unwrap_or(DXGI_FORMAT_UNKNOWN);

        let blend_state = blend_desc(desc.alpha_blend);
        let has_depth = desc.depth_format.is_some();
        let pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            // 借用 root signature，ManuallyDrop 保证这里不会 Release
            pRootSignature: unsafe { std::mem::transmute_copy(root_signature) },
            VS: vertex,
            PS: fragment,
            BlendState: D3D12_BLEND_DESC {
                AlphaToCoverageEnable: false.into(),
                IndependentBlendEnable: false.into(),
                RenderTarget: [blend_state; 8],
            },
            SampleMask: u32::MAX,
            RasterizerState: D3D12_RASTERIZER_DESC {
                FillMode: convert::fill_mode(desc.polygon_mode),
                CullMode: convert::cull_mode(desc.cull_mode),
                // 与 Vulkan 后端一致，CCW 视为 front face
                FrontCounterClockwise: true.into(),
                DepthBias: 0,
                DepthBiasClamp: 0.0,
                SlopeScaledDepthBias: 0.0,
                DepthClipEnable: true.into(),
                MultisampleEnable: false.into(),
                AntialiasedLineEnable: false.into(),
                ForcedSampleCount: 0,
                ConservativeRaster: D3D12_CONSERVATIVE_RASTERIZATION_MODE_OFF,
            },
            DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
                DepthEnable: BOOL::from(desc.depth_test && has_depth),
                DepthWriteMask: if desc.depth_write && has_depth {
                    D3D12_DEPTH_WRITE_MASK_ALL
                } else {
                    D3D12_DEPTH_WRITE_MASK_ZERO
                },
                DepthFunc: convert::compare_func(desc.depth_compare),
                StencilEnable: false.into(),
                ..Default::default()
            },
            PrimitiveTopologyType: convert::topology_type(desc.topology),
            NumRenderTargets: desc.color_formats.len() as u32,
            RTVFormats: rtv_formats,
            DSVFormat: dsv_format,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            ..Default::default()
        };

        unsafe { device.CreateGraphicsPipelineState(&pso_desc) }
            .map_err(|e| GfxError::PipelineCreateFailed(format!("{}: {e}", desc.name)))
    }

    fn create_compute(
        device: &ID3D12Device,
        root_signature: &ID3D12RootSignature,
        desc: &ComputeShaderDesc<'_>,
    ) -> GfxResult<ID3D12PipelineState> {
        let pso_desc = D3D12_COMPUTE_PIPELINE_STATE_DESC {
            pRootSignature: unsafe { std::mem::transmute_copy(root_signature) },
            CS: bytecode(desc.code, desc.name)?,
            ..Default::default()
        };
        unsafe { device.CreateComputePipelineState(&pso_desc) }
            .map_err(|e| GfxError::PipelineCreateFailed(format!("{}: {e}", desc.name)))
    }
}

// getters
impl D3D12Shader {
    #[inline]
    pub fn pso(&self) -> &ID3D12PipelineState {
        &self.pso
    }

    #[inline]
    pub fn topology(&self) -> Option<D3D_PRIMITIVE_TOPOLOGY> {
        self.topology
    }
}

impl RhiShader for D3D12Shader {
    #[inline]
    fn kind(&self) -> ShaderKind {
        self.kind
    }
}

/// 检查容器头，避免把 SPIR-V 交给 D3D12
fn validate_container(code: &[u8], name: &str) -> GfxResult<()> {
    if code.len() < DXIL_CONTAINER_MAGIC.len() || &code[..4] != DXIL_CONTAINER_MAGIC {
        return Err(GfxError::ShaderCreateFailed(format!("{name}: not a dxil container")));
    }
    Ok(())
}

fn bytecode(code: &[u8], name: &str) -> GfxResult<D3D12_SHADER_BYTECODE> {
    validate_container(code, name)?;
    Ok(D3D12_SHADER_BYTECODE {
        pShaderBytecode: code.as_ptr() as *const c_void,
        BytecodeLength: code.len(),
    })
}

/// 所有 color attachment 使用同样的混合设置
fn blend_desc(alpha_blend: bool) -> D3D12_RENDER_TARGET_BLEND_DESC {
    D3D12_RENDER_TARGET_BLEND_DESC {
        BlendEnable: alpha_blend.into(),
        LogicOpEnable: false.into(),
        SrcBlend: D3D12_BLEND_SRC_ALPHA,
        DestBlend: D3D12_BLEND_INV_SRC_ALPHA,
        BlendOp: D3D12_BLEND_OP_ADD,
        SrcBlendAlpha: D3D12_BLEND_ONE,
        DestBlendAlpha: D3D12_BLEND_INV_SRC_ALPHA,
        BlendOpAlpha: D3D12_BLEND_OP_ADD,
        LogicOp: D3D12_LOGIC_OP_NOOP,
        RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    #[test]
    fn test_rejects_spirv() {
        let spirv = 0x0723_0203u32.to_le_bytes().iter().copied().chain([0u8; 16]).collect_vec();
        assert!(matches!(validate_container(&spirv, "test"), Err(GfxError::ShaderCreateFailed(_))));
        assert!(validate_container(b"DXBC\0\0\0\0", "test").is_ok());
        assert!(validate_container(b"DX", "test").is_err());
    }

    #[test]
    fn test_blend_desc() {
        let blend = blend_desc(true);
        assert!(blend.BlendEnable.as_bool());
        assert_eq!(blend.SrcBlend, D3D12_BLEND_SRC_ALPHA);
        assert_eq!(blend.DestBlendAlpha, D3D12_BLEND_INV_SRC_ALPHA);
        assert!(!blend_desc(false).BlendEnable.as_bool());
    }
}
