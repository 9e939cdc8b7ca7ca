use std::ffi::CString;
use std::io::Cursor;

use ash::vk;
use itertools::Itertools;
use strata_gfx::backend::RhiShader;
use strata_gfx::error::{GfxError, GfxResult};
use strata_gfx::resources::shader::{ComputeShaderDesc, GraphicsShaderDesc, ShaderDesc, ShaderKind};

use crate::convert;
use crate::foundation::device::DeviceFunctions;

/// 一个完整的 pipeline，所有 pipeline 共享 bindless pipeline layout
pub struct VulkanShader {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    kind: ShaderKind,
}

// new & init
impl VulkanShader {
    pub fn new(device: &DeviceFunctions, layout: vk::PipelineLayout, desc: &ShaderDesc<'_>) -> GfxResult<Self> {
        let _span = tracy_client::span!("VulkanShader::new");

        let pipeline = match desc {
            ShaderDesc::Graphics(graphics) => Self::create_graphics(device, layout, graphics)?,
            ShaderDesc::Compute(compute) => Self::create_compute(device, layout, compute)?,
        };
        device.set_object_debug_name(pipeline, format!("Pipeline::{}", desc.name()));
        Ok(Self {
            pipeline,
            layout,
            kind: desc.kind(),
        })
    }

    fn create_graphics(
        device: &DeviceFunctions,
        layout: vk::PipelineLayout,
        desc: &GraphicsShaderDesc<'_>,
    ) -> GfxResult<vk::Pipeline> {
        let vertex_entry = entry_name(desc.vertex_entry)?;
        let fragment_entry = entry_name(desc.fragment_entry)?;
        let vertex_module = ShaderModule::new(device, desc.vertex, desc.name)?;
        let fragment_module = match ShaderModule::new(device, desc.fragment, desc.name) {
            Ok(module) => module,
            Err(e) => {
                vertex_module.destroy(device);
                return Err(e);
            }
        };

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module.handle)
                .name(vertex_entry.as_c_str()),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module.handle)
                .name(fragment_entry.as_c_str()),
        ];

        // dynamic rendering 需要的 framebuffer 信息，format = undefined 表示不使用这个 attachment
        let color_formats = desc.color_formats.iter().map(|f| convert::format(*f)).collect_vec();
        let depth_format = desc.depth_format.map(convert::format).unwrap_or(vk::Format::UNDEFINED);
        let stencil_format = desc
            .depth_format
            .filter(|f| f.has_stencil())
            .map(convert::format)
            .unwrap_or(vk::Format::UNDEFINED);
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(depth_format)
            .stencil_attachment_format(stencil_format);

        // 顶点数据通过 buffer device address 或者 storage buffer 读取
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(convert::topology(desc.topology))
            .primitive_restart_enable(false);

        // viewport 和 scissor 具体值由 dynamic 决定，但是数量由该 create info 决定
        let viewport_info = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);

        let rasterize_info = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(convert::polygon_mode(desc.polygon_mode))
            .line_width(1.0)
            .cull_mode(convert::cull_mode(desc.cull_mode))
            // 按照 OpenGL 的传统，将 CCW 视为 front face
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let msaa_info = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        // 混合设置：需要为每个 color attachment 分别指定
        let blend_state = if desc.alpha_blend {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        } else {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(false)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        };
        let blend_states = vec![blend_state; color_formats.len()];
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_states)
            .blend_constants([0.0, 0.0, 0.0, 0.0]);

        let depth_stencil_info = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test && desc.depth_format.is_some())
            .depth_write_enable(desc.depth_write && desc.depth_format.is_some())
            .depth_compare_op(convert::compare_op(desc.depth_compare))
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state_info = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly_info)
            .viewport_state(&viewport_info)
            .rasterization_state(&rasterize_info)
            .multisample_state(&msaa_info)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&depth_stencil_info)
            .layout(layout)
            .dynamic_state(&dynamic_state_info)
            .push_next(&mut rendering_info);

        let result = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
        };

        vertex_module.destroy(device);
        fragment_module.destroy(device);

        result
            .map(|pipelines| pipelines[0])
            .map_err(|(_, e)| GfxError::PipelineCreateFailed(format!("{}: {e:?}", desc.name)))
    }

    fn create_compute(
        device: &DeviceFunctions,
        layout: vk::PipelineLayout,
        desc: &ComputeShaderDesc<'_>,
    ) -> GfxResult<vk::Pipeline> {
        let entry = entry_name(desc.entry)?;
        let module = ShaderModule::new(device, desc.code, desc.name)?;
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module.handle)
            .name(entry.as_c_str());
        let pipeline_info = vk::ComputePipelineCreateInfo::default().stage(stage).layout(layout);

        let result = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
        };
        module.destroy(device);

        result
            .map(|pipelines| pipelines[0])
            .map_err(|(_, e)| GfxError::PipelineCreateFailed(format!("{}: {e:?}", desc.name)))
    }
}

// getters
impl VulkanShader {
    #[inline]
    pub fn vk_pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn vk_layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        match self.kind {
            ShaderKind::Graphics => vk::PipelineBindPoint::GRAPHICS,
            ShaderKind::Compute => vk::PipelineBindPoint::COMPUTE,
        }
    }
}

// destroy
impl VulkanShader {
    pub fn destroy(self, device: &DeviceFunctions) {
        unsafe { device.destroy_pipeline(self.pipeline, None) };
    }
}

impl RhiShader for VulkanShader {
    #[inline]
    fn kind(&self) -> ShaderKind {
        self.kind
    }
}

fn entry_name(entry: &str) -> GfxResult<CString> {
    CString::new(entry).map_err(|_| GfxError::ShaderCreateFailed(format!("invalid entry point name: {entry:?}")))
}

/// 只在 pipeline 创建期间存在的 shader module
struct ShaderModule {
    handle: vk::ShaderModule,
}

impl ShaderModule {
    fn new(device: &DeviceFunctions, code: &[u8], name: &str) -> GfxResult<Self> {
        let words = ash::util::read_spv(&mut Cursor::new(code))
            .map_err(|e| GfxError::ShaderCreateFailed(format!("{name}: invalid spir-v: {e}")))?;
        let module_ci = vk::ShaderModuleCreateInfo::default().code(&words);
        let handle = unsafe { device.create_shader_module(&module_ci, None) }
            .map_err(|e| GfxError::ShaderCreateFailed(format!("{name}: {e:?}")))?;
        Ok(Self { handle })
    }

    fn destroy(self, device: &DeviceFunctions) {
        unsafe { device.destroy_shader_module(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_name_rejects_nul() {
        assert!(entry_name("main").is_ok());
        assert!(matches!(entry_name("ma\0in"), Err(GfxError::ShaderCreateFailed(_))));
    }
}
