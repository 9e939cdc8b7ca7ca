//! 核心层类型到 D3D12 / DXGI 的转换

use strata_gfx::basic::format::TextureFormat;
use strata_gfx::basic::types::{Extent2D, IndexType, Rect2D, Viewport};
use strata_gfx::descriptors::descriptor_allocator::DescriptorKind;
use strata_gfx::error::GfxError;
use strata_gfx::resources::sampler::{AddressMode, Filter};
use strata_gfx::resources::shader::{CompareOp, CullMode, PolygonMode, PrimitiveTopology};
use strata_gfx::sync::resource_state::{AccessFlags, BufferState, ImageLayout};
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::{DXGI_ERROR_DEVICE_HUNG, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET};

pub fn format(format: TextureFormat) -> DXGI_FORMAT {
    match format {
        TextureFormat::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        TextureFormat::Rgba8Srgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        TextureFormat::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        TextureFormat::Bgra8Srgb => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
        TextureFormat::Rgb10A2Unorm => DXGI_FORMAT_R10G10B10A2_UNORM,
        TextureFormat::Rg16Float => DXGI_FORMAT_R16G16_FLOAT,
        TextureFormat::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        TextureFormat::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        TextureFormat::R32Float => DXGI_FORMAT_R32_FLOAT,
        TextureFormat::R32Uint => DXGI_FORMAT_R32_UINT,
        TextureFormat::D16Unorm => DXGI_FORMAT_D16_UNORM,
        TextureFormat::D32Float => DXGI_FORMAT_D32_FLOAT,
        TextureFormat::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
        TextureFormat::D32FloatS8Uint => DXGI_FORMAT_D32_FLOAT_S8X24_UINT,
    }
}

/// 一张纹理在不同用途下使用的 DXGI 格式
///
/// 深度纹理需要同时作为 DSV 与 SRV，因此资源本身使用 typeless 格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureFormats {
    pub resource: DXGI_FORMAT,
    /// SRV 与 UAV 使用的格式
    pub view: DXGI_FORMAT,
    /// RTV 或 DSV 使用的格式
    pub target: DXGI_FORMAT,
}

pub fn texture_formats(tf: TextureFormat) -> TextureFormats {
    let (resource, view) = match tf {
        TextureFormat::D16Unorm => (DXGI_FORMAT_R16_TYPELESS, DXGI_FORMAT_R16_UNORM),
        TextureFormat::D32Float => (DXGI_FORMAT_R32_TYPELESS, DXGI_FORMAT_R32_FLOAT),
        TextureFormat::D24UnormS8Uint => (DXGI_FORMAT_R24G8_TYPELESS, DXGI_FORMAT_R24_UNORM_X8_TYPELESS),
        TextureFormat::D32FloatS8Uint => (DXGI_FORMAT_R32G8X24_TYPELESS, DXGI_FORMAT_R32_FLOAT_X8X24_TYPELESS),
        _ => (format(tf), format(tf)),
    };
    TextureFormats {
        resource,
        view,
        target: format(tf),
    }
}

/// flip model 的 back buffer 不能使用 srgb 格式，只能在 RTV 上使用 srgb
///
/// 返回 back buffer 的格式，不支持的格式返回 None
pub fn swapchain_buffer_format(tf: TextureFormat) -> Option<DXGI_FORMAT> {
    match tf {
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba8Srgb => Some(DXGI_FORMAT_R8G8B8A8_UNORM),
        TextureFormat::Bgra8Unorm | TextureFormat::Bgra8Srgb => Some(DXGI_FORMAT_B8G8R8A8_UNORM),
        TextureFormat::Rgb10A2Unorm => Some(DXGI_FORMAT_R10G10B10A2_UNORM),
        TextureFormat::Rgba16Float => Some(DXGI_FORMAT_R16G16B16A16_FLOAT),
        _ => None,
    }
}

/// srgb 与深度格式不能作为 UAV
#[inline]
pub fn supports_storage(format: TextureFormat) -> bool {
    !format.is_depth() && !matches!(format, TextureFormat::Rgba8Srgb | TextureFormat::Bgra8Srgb)
}

/// image 布局对应的资源状态
///
/// `General` 在可以作为 UAV 的纹理上对应 UNORDERED_ACCESS，其余纹理上对应 COMMON
pub fn texture_state(layout: ImageLayout, allow_uav: bool) -> D3D12_RESOURCE_STATES {
    match layout {
        ImageLayout::Undefined => D3D12_RESOURCE_STATE_COMMON,
        ImageLayout::General if allow_uav => D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
        ImageLayout::General => D3D12_RESOURCE_STATE_COMMON,
        ImageLayout::ColorAttachment => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ImageLayout::DepthAttachment | ImageLayout::DepthStencilAttachment => D3D12_RESOURCE_STATE_DEPTH_WRITE,
        ImageLayout::ShaderReadOnly => {
            D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE | D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE
        }
        ImageLayout::TransferSrc => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ImageLayout::TransferDst => D3D12_RESOURCE_STATE_COPY_DEST,
        ImageLayout::Present => D3D12_RESOURCE_STATE_PRESENT,
    }
}

/// buffer 状态对应的资源状态，写状态优先
pub fn buffer_state(state: BufferState) -> D3D12_RESOURCE_STATES {
    let access = state.access;
    if access.contains(AccessFlags::TRANSFER_WRITE) {
        return D3D12_RESOURCE_STATE_COPY_DEST;
    }
    if access.intersects(AccessFlags::SHADER_STORAGE_WRITE | AccessFlags::SHADER_STORAGE_READ) {
        return D3D12_RESOURCE_STATE_UNORDERED_ACCESS;
    }

    let mut states = D3D12_RESOURCE_STATE_COMMON;
    if access.contains(AccessFlags::TRANSFER_READ) {
        states |= D3D12_RESOURCE_STATE_COPY_SOURCE;
    }
    if access.contains(AccessFlags::INDEX_READ) {
        states |= D3D12_RESOURCE_STATE_INDEX_BUFFER;
    }
    if access.contains(AccessFlags::INDIRECT_COMMAND_READ) {
        states |= D3D12_RESOURCE_STATE_INDIRECT_ARGUMENT;
    }
    if access.contains(AccessFlags::UNIFORM_READ) {
        states |= D3D12_RESOURCE_STATE_VERTEX_AND_CONSTANT_BUFFER;
    }
    states
}

pub fn descriptor_range_type(kind: DescriptorKind) -> D3D12_DESCRIPTOR_RANGE_TYPE {
    match kind {
        DescriptorKind::SampledImage => D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
        DescriptorKind::StorageImage | DescriptorKind::StorageBuffer => D3D12_DESCRIPTOR_RANGE_TYPE_UAV,
        DescriptorKind::ConstantBuffer => D3D12_DESCRIPTOR_RANGE_TYPE_CBV,
        DescriptorKind::Sampler => D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER,
    }
}

/// D3D12 的 filter 把 min/mag/mip 编码在同一个枚举中：mip 位于 bit 0，mag 位于 bit 2，min 位于 bit 4
pub fn filter(min: Filter, mag: Filter, mip: Filter, anisotropic: bool) -> D3D12_FILTER {
    if anisotropic {
        return D3D12_FILTER_ANISOTROPIC;
    }
    let bit = |filter: Filter| if filter == Filter::Linear { 1 } else { 0 };
    D3D12_FILTER(bit(mip) | (bit(mag) << 2) | (bit(min) << 4))
}

pub fn address_mode(mode: AddressMode) -> D3D12_TEXTURE_ADDRESS_MODE {
    match mode {
        AddressMode::Repeat => D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        AddressMode::MirroredRepeat => D3D12_TEXTURE_ADDRESS_MODE_MIRROR,
        AddressMode::ClampToEdge => D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
        AddressMode::ClampToBorder => D3D12_TEXTURE_ADDRESS_MODE_BORDER,
    }
}

pub fn cull_mode(mode: CullMode) -> D3D12_CULL_MODE {
    match mode {
        CullMode::None => D3D12_CULL_MODE_NONE,
        CullMode::Front => D3D12_CULL_MODE_FRONT,
        CullMode::Back => D3D12_CULL_MODE_BACK,
    }
}

pub fn fill_mode(mode: PolygonMode) -> D3D12_FILL_MODE {
    match mode {
        PolygonMode::Fill => D3D12_FILL_MODE_SOLID,
        PolygonMode::Line => D3D12_FILL_MODE_WIREFRAME,
    }
}

/// PSO 中使用的图元类型
pub fn topology_type(topology: PrimitiveTopology) -> D3D12_PRIMITIVE_TOPOLOGY_TYPE {
    match topology {
        PrimitiveTopology::TriangleList | PrimitiveTopology::TriangleStrip => D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        PrimitiveTopology::LineList => D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
        PrimitiveTopology::PointList => D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
    }
}

/// 录制时通过 IASetPrimitiveTopology 设置的图元拓扑
pub fn topology(topology: PrimitiveTopology) -> D3D_PRIMITIVE_TOPOLOGY {
    match topology {
        PrimitiveTopology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        PrimitiveTopology::TriangleStrip => D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
        PrimitiveTopology::LineList => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        PrimitiveTopology::PointList => D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
    }
}

pub fn compare_func(op: CompareOp) -> D3D12_COMPARISON_FUNC {
    match op {
        CompareOp::Never => D3D12_COMPARISON_FUNC_NEVER,
        CompareOp::Less => D3D12_COMPARISON_FUNC_LESS,
        CompareOp::Equal => D3D12_COMPARISON_FUNC_EQUAL,
        CompareOp::LessOrEqual => D3D12_COMPARISON_FUNC_LESS_EQUAL,
        CompareOp::Greater => D3D12_COMPARISON_FUNC_GREATER,
        CompareOp::GreaterOrEqual => D3D12_COMPARISON_FUNC_GREATER_EQUAL,
        CompareOp::Always => D3D12_COMPARISON_FUNC_ALWAYS,
    }
}

pub fn index_format(ty: IndexType) -> DXGI_FORMAT {
    match ty {
        IndexType::U16 => DXGI_FORMAT_R16_UINT,
        IndexType::U32 => DXGI_FORMAT_R32_UINT,
    }
}

#[inline]
pub fn rect(rect: Rect2D) -> RECT {
    RECT {
        left: rect.offset.x,
        top: rect.offset.y,
        right: rect.offset.x + rect.extent.width as i32,
        bottom: rect.offset.y + rect.extent.height as i32,
    }
}

#[inline]
pub fn extent_box(extent: Extent2D) -> D3D12_BOX {
    D3D12_BOX {
        left: 0,
        top: 0,
        front: 0,
        right: extent.width,
        bottom: extent.height,
        back: 1,
    }
}

#[inline]
pub fn rect_box(rect: Rect2D) -> D3D12_BOX {
    D3D12_BOX {
        left: rect.offset.x.max(0) as u32,
        top: rect.offset.y.max(0) as u32,
        front: 0,
        right: rect.offset.x.max(0) as u32 + rect.extent.width,
        bottom: rect.offset.y.max(0) as u32 + rect.extent.height,
        back: 1,
    }
}

#[inline]
pub fn viewport(viewport: &Viewport) -> D3D12_VIEWPORT {
    D3D12_VIEWPORT {
        TopLeftX: viewport.x,
        TopLeftY: viewport.y,
        Width: viewport.width,
        Height: viewport.height,
        MinDepth: viewport.min_depth,
        MaxDepth: viewport.max_depth,
    }
}

/// 设备移除相关的 HRESULT 统一映射为 `DeviceLost`，其余交给 `other`
pub fn device_error(e: windows::core::Error, other: impl FnOnce(String) -> GfxError) -> GfxError {
    let code = e.code();
    if code == DXGI_ERROR_DEVICE_REMOVED || code == DXGI_ERROR_DEVICE_RESET || code == DXGI_ERROR_DEVICE_HUNG {
        GfxError::DeviceLost
    } else {
        other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_gfx::basic::types::Offset2D;
    use strata_gfx::sync::resource_state::ImageState;

    #[test]
    fn test_depth_formats_are_typeless() {
        let formats = texture_formats(TextureFormat::D32Float);
        assert_eq!(formats.resource, DXGI_FORMAT_R32_TYPELESS);
        assert_eq!(formats.view, DXGI_FORMAT_R32_FLOAT);
        assert_eq!(formats.target, DXGI_FORMAT_D32_FLOAT);

        let formats = texture_formats(TextureFormat::Rgba8Srgb);
        assert_eq!(formats.resource, DXGI_FORMAT_R8G8B8A8_UNORM_SRGB);
        assert_eq!(formats.view, formats.target);
    }

    #[test]
    fn test_swapchain_formats() {
        assert_eq!(swapchain_buffer_format(TextureFormat::Bgra8Srgb), Some(DXGI_FORMAT_B8G8R8A8_UNORM));
        assert_eq!(swapchain_buffer_format(TextureFormat::D32Float), None);
    }

    #[test]
    fn test_texture_states() {
        assert_eq!(texture_state(ImageLayout::General, true), D3D12_RESOURCE_STATE_UNORDERED_ACCESS);
        assert_eq!(texture_state(ImageLayout::General, false), D3D12_RESOURCE_STATE_COMMON);
        assert_eq!(texture_state(ImageLayout::Present, false), D3D12_RESOURCE_STATE_COMMON);
        assert_eq!(
            texture_state(ImageState::SHADER_READ.layout, false),
            D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE | D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE
        );
    }

    #[test]
    fn test_buffer_states() {
        assert_eq!(buffer_state(BufferState::TRANSFER_DST), D3D12_RESOURCE_STATE_COPY_DEST);
        assert_eq!(buffer_state(BufferState::STORAGE_READ_WRITE), D3D12_RESOURCE_STATE_UNORDERED_ACCESS);
        assert_eq!(buffer_state(BufferState::INDIRECT_BUFFER), D3D12_RESOURCE_STATE_INDIRECT_ARGUMENT);
        assert_eq!(buffer_state(BufferState::UNDEFINED), D3D12_RESOURCE_STATE_COMMON);
    }

    #[test]
    fn test_filter_encoding() {
        assert_eq!(filter(Filter::Linear, Filter::Linear, Filter::Linear, false), D3D12_FILTER_MIN_MAG_MIP_LINEAR);
        assert_eq!(filter(Filter::Nearest, Filter::Nearest, Filter::Nearest, false), D3D12_FILTER_MIN_MAG_MIP_POINT);
        assert_eq!(
            filter(Filter::Linear, Filter::Nearest, Filter::Nearest, false),
            D3D12_FILTER_MIN_LINEAR_MAG_MIP_POINT
        );
        assert_eq!(filter(Filter::Nearest, Filter::Nearest, Filter::Nearest, true), D3D12_FILTER_ANISOTROPIC);
    }

    #[test]
    fn test_rect_box() {
        let b = rect_box(Rect2D {
            offset: Offset2D { x: 4, y: 2 },
            extent: Extent2D::new(10, 20),
        });
        assert_eq!((b.left, b.top, b.right, b.bottom, b.back), (4, 2, 14, 22, 1));
    }
}
