//! 核心层类型到 `ash::vk` 的转换

use ash::vk;
use strata_gfx::basic::format::TextureFormat;
use strata_gfx::basic::types::{ClearColor, Extent2D, IndexType, Offset2D, Rect2D, Viewport};
use strata_gfx::descriptors::descriptor_allocator::DescriptorKind;
use strata_gfx::resources::sampler::{AddressMode, Filter};
use strata_gfx::resources::shader::{CompareOp, CullMode, PolygonMode, PrimitiveTopology};
use strata_gfx::sync::resource_state::{AccessFlags, ImageAspect, ImageLayout, PipelineStages};

pub fn format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgb10A2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
        TextureFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::R32Float => vk::Format::R32_SFLOAT,
        TextureFormat::R32Uint => vk::Format::R32_UINT,
        TextureFormat::D16Unorm => vk::Format::D16_UNORM,
        TextureFormat::D32Float => vk::Format::D32_SFLOAT,
        TextureFormat::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
        TextureFormat::D32FloatS8Uint => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

/// swapchain 返回的 surface format 反向映射，不支持的格式返回 None
pub fn texture_format(format: vk::Format) -> Option<TextureFormat> {
    match format {
        vk::Format::R8G8B8A8_UNORM => Some(TextureFormat::Rgba8Unorm),
        vk::Format::R8G8B8A8_SRGB => Some(TextureFormat::Rgba8Srgb),
        vk::Format::B8G8R8A8_UNORM => Some(TextureFormat::Bgra8Unorm),
        vk::Format::B8G8R8A8_SRGB => Some(TextureFormat::Bgra8Srgb),
        vk::Format::A2B10G10R10_UNORM_PACK32 => Some(TextureFormat::Rgb10A2Unorm),
        vk::Format::R16G16B16A16_SFLOAT => Some(TextureFormat::Rgba16Float),
        _ => None,
    }
}

/// srgb 与深度格式不能作为 storage image
#[inline]
pub fn supports_storage(format: TextureFormat) -> bool {
    !format.is_depth() && !matches!(format, TextureFormat::Rgba8Srgb | TextureFormat::Bgra8Srgb)
}

pub fn aspect_of_format(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub fn aspect(aspect: ImageAspect) -> vk::ImageAspectFlags {
    match aspect {
        ImageAspect::Color => vk::ImageAspectFlags::COLOR,
        ImageAspect::Depth => vk::ImageAspectFlags::DEPTH,
        ImageAspect::DepthStencil => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
    }
}

pub fn image_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::General => vk::ImageLayout::GENERAL,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthAttachment => vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::Present => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

pub fn pipeline_stages(stages: PipelineStages) -> vk::PipelineStageFlags2 {
    const TABLE: [(PipelineStages, vk::PipelineStageFlags2); 14] = [
        (PipelineStages::TOP_OF_PIPE, vk::PipelineStageFlags2::TOP_OF_PIPE),
        (PipelineStages::DRAW_INDIRECT, vk::PipelineStageFlags2::DRAW_INDIRECT),
        (PipelineStages::INDEX_INPUT, vk::PipelineStageFlags2::INDEX_INPUT),
        (PipelineStages::VERTEX_SHADER, vk::PipelineStageFlags2::VERTEX_SHADER),
        (PipelineStages::FRAGMENT_SHADER, vk::PipelineStageFlags2::FRAGMENT_SHADER),
        (PipelineStages::EARLY_FRAGMENT_TESTS, vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS),
        (PipelineStages::LATE_FRAGMENT_TESTS, vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS),
        (PipelineStages::COLOR_ATTACHMENT_OUTPUT, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT),
        (PipelineStages::COMPUTE_SHADER, vk::PipelineStageFlags2::COMPUTE_SHADER),
        (PipelineStages::TRANSFER, vk::PipelineStageFlags2::ALL_TRANSFER),
        (PipelineStages::BOTTOM_OF_PIPE, vk::PipelineStageFlags2::BOTTOM_OF_PIPE),
        (PipelineStages::HOST, vk::PipelineStageFlags2::HOST),
        (PipelineStages::ALL_GRAPHICS, vk::PipelineStageFlags2::ALL_GRAPHICS),
        (PipelineStages::ALL_COMMANDS, vk::PipelineStageFlags2::ALL_COMMANDS),
    ];

    TABLE
        .iter()
        .filter(|(stage, _)| stages.contains(*stage))
        .fold(vk::PipelineStageFlags2::NONE, |acc, (_, vk_stage)| acc | *vk_stage)
}

pub fn access_flags(access: AccessFlags) -> vk::AccessFlags2 {
    const TABLE: [(AccessFlags, vk::AccessFlags2); 16] = [
        (AccessFlags::INDIRECT_COMMAND_READ, vk::AccessFlags2::INDIRECT_COMMAND_READ),
        (AccessFlags::INDEX_READ, vk::AccessFlags2::INDEX_READ),
        (AccessFlags::UNIFORM_READ, vk::AccessFlags2::UNIFORM_READ),
        (AccessFlags::SHADER_SAMPLED_READ, vk::AccessFlags2::SHADER_SAMPLED_READ),
        (AccessFlags::SHADER_STORAGE_READ, vk::AccessFlags2::SHADER_STORAGE_READ),
        (AccessFlags::SHADER_STORAGE_WRITE, vk::AccessFlags2::SHADER_STORAGE_WRITE),
        (AccessFlags::COLOR_ATTACHMENT_READ, vk::AccessFlags2::COLOR_ATTACHMENT_READ),
        (AccessFlags::COLOR_ATTACHMENT_WRITE, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE),
        (AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ, vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ),
        (AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE, vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE),
        (AccessFlags::TRANSFER_READ, vk::AccessFlags2::TRANSFER_READ),
        (AccessFlags::TRANSFER_WRITE, vk::AccessFlags2::TRANSFER_WRITE),
        (AccessFlags::HOST_READ, vk::AccessFlags2::HOST_READ),
        (AccessFlags::HOST_WRITE, vk::AccessFlags2::HOST_WRITE),
        (AccessFlags::MEMORY_READ, vk::AccessFlags2::MEMORY_READ),
        (AccessFlags::MEMORY_WRITE, vk::AccessFlags2::MEMORY_WRITE),
    ];

    TABLE
        .iter()
        .filter(|(flag, _)| access.contains(*flag))
        .fold(vk::AccessFlags2::NONE, |acc, (_, vk_access)| acc | *vk_access)
}

pub fn descriptor_type(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorKind::ConstantBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::Sampler => vk::DescriptorType::SAMPLER,
    }
}

pub fn filter(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

pub fn mipmap_mode(filter: Filter) -> vk::SamplerMipmapMode {
    match filter {
        Filter::Nearest => vk::SamplerMipmapMode::NEAREST,
        Filter::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub fn address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

pub fn cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub fn polygon_mode(mode: PolygonMode) -> vk::PolygonMode {
    match mode {
        PolygonMode::Fill => vk::PolygonMode::FILL,
        PolygonMode::Line => vk::PolygonMode::LINE,
    }
}

pub fn topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
    }
}

pub fn compare_op(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn index_type(ty: IndexType) -> vk::IndexType {
    match ty {
        IndexType::U16 => vk::IndexType::UINT16,
        IndexType::U32 => vk::IndexType::UINT32,
    }
}

#[inline]
pub fn extent(extent: Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: extent.width,
        height: extent.height,
    }
}

#[inline]
pub fn extent_from_vk(extent: vk::Extent2D) -> Extent2D {
    Extent2D::new(extent.width, extent.height)
}

#[inline]
pub fn extent_3d(extent: Extent2D) -> vk::Extent3D {
    vk::Extent3D {
        width: extent.width,
        height: extent.height,
        depth: 1,
    }
}

#[inline]
pub fn rect(rect: Rect2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D {
            x: rect.offset.x,
            y: rect.offset.y,
        },
        extent: extent(rect.extent),
    }
}

/// blit 区域的两个角
pub fn rect_corners(rect: Rect2D) -> [vk::Offset3D; 2] {
    let Offset2D { x, y } = rect.offset;
    [
        vk::Offset3D { x, y, z: 0 },
        vk::Offset3D {
            x: x + rect.extent.width as i32,
            y: y + rect.extent.height as i32,
            z: 1,
        },
    ]
}

#[inline]
pub fn viewport(viewport: &Viewport) -> vk::Viewport {
    vk::Viewport {
        x: viewport.x,
        y: viewport.y,
        width: viewport.width,
        height: viewport.height,
        min_depth: viewport.min_depth,
        max_depth: viewport.max_depth,
    }
}

#[inline]
pub fn clear_color(color: ClearColor) -> vk::ClearColorValue {
    vk::ClearColorValue { float32: color.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_gfx::sync::resource_state::ImageState;

    #[test]
    fn test_shader_read_state() {
        let state = ImageState::SHADER_READ;
        assert_eq!(
            pipeline_stages(state.stage),
            vk::PipelineStageFlags2::FRAGMENT_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER
        );
        assert_eq!(access_flags(state.access), vk::AccessFlags2::SHADER_SAMPLED_READ);
        assert_eq!(image_layout(state.layout), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_empty_access_is_none() {
        assert_eq!(access_flags(AccessFlags::empty()), vk::AccessFlags2::NONE);
        assert_eq!(pipeline_stages(ImageState::PRESENT.stage), vk::PipelineStageFlags2::BOTTOM_OF_PIPE);
    }

    #[test]
    fn test_format_round_trip_for_surface_formats() {
        for tf in [TextureFormat::Bgra8Unorm, TextureFormat::Bgra8Srgb, TextureFormat::Rgba8Unorm] {
            assert_eq!(texture_format(format(tf)), Some(tf));
        }
        assert_eq!(texture_format(vk::Format::D32_SFLOAT), None);
    }

    #[test]
    fn test_depth_aspect() {
        assert_eq!(aspect_of_format(TextureFormat::D32Float), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_of_format(TextureFormat::D24UnormS8Uint),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert!(!supports_storage(TextureFormat::Bgra8Srgb));
        assert!(supports_storage(TextureFormat::Rgba16Float));
    }

    #[test]
    fn test_blit_corners() {
        let corners = rect_corners(Rect2D {
            offset: Offset2D { x: 4, y: 2 },
            extent: Extent2D::new(10, 20),
        });
        assert_eq!(corners[0], vk::Offset3D { x: 4, y: 2, z: 0 });
        assert_eq!(corners[1], vk::Offset3D { x: 14, y: 22, z: 1 });
    }
}
