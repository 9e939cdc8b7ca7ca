//! 资源状态定义
//!
//! 与后端无关的 pipeline stage、access mask 和 image layout，
//! 提供预定义的常用状态组合。后端只负责将其翻译为原生的 barrier。

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const DRAW_INDIRECT = 1 << 1;
        const INDEX_INPUT = 1 << 2;
        const VERTEX_SHADER = 1 << 3;
        const FRAGMENT_SHADER = 1 << 4;
        const EARLY_FRAGMENT_TESTS = 1 << 5;
        const LATE_FRAGMENT_TESTS = 1 << 6;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 7;
        const COMPUTE_SHADER = 1 << 8;
        const TRANSFER = 1 << 9;
        const BOTTOM_OF_PIPE = 1 << 10;
        const HOST = 1 << 11;
        const ALL_GRAPHICS = 1 << 12;
        const ALL_COMMANDS = 1 << 13;
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const INDIRECT_COMMAND_READ = 1 << 0;
        const INDEX_READ = 1 << 1;
        const UNIFORM_READ = 1 << 2;
        const SHADER_SAMPLED_READ = 1 << 3;
        const SHADER_STORAGE_READ = 1 << 4;
        const SHADER_STORAGE_WRITE = 1 << 5;
        const COLOR_ATTACHMENT_READ = 1 << 6;
        const COLOR_ATTACHMENT_WRITE = 1 << 7;
        const DEPTH_STENCIL_ATTACHMENT_READ = 1 << 8;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 9;
        const TRANSFER_READ = 1 << 10;
        const TRANSFER_WRITE = 1 << 11;
        const HOST_READ = 1 << 12;
        const HOST_WRITE = 1 << 13;
        const MEMORY_READ = 1 << 14;
        const MEMORY_WRITE = 1 << 15;
    }
}

impl AccessFlags {
    const WRITE: Self = Self::SHADER_STORAGE_WRITE
        .union(Self::COLOR_ATTACHMENT_WRITE)
        .union(Self::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .union(Self::TRANSFER_WRITE)
        .union(Self::HOST_WRITE)
        .union(Self::MEMORY_WRITE);

    #[inline]
    pub fn is_write(self) -> bool {
        self.intersects(Self::WRITE)
    }
}

/// Image 布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    #[default]
    Undefined,
    General,
    ColorAttachment,
    DepthAttachment,
    DepthStencilAttachment,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    Present,
}

impl ImageLayout {
    /// 只能用于颜色格式的布局
    #[inline]
    pub fn is_color_only(self) -> bool {
        matches!(self, Self::ColorAttachment | Self::Present)
    }

    /// 只能用于深度格式的布局
    #[inline]
    pub fn is_depth_only(self) -> bool {
        matches!(self, Self::DepthAttachment | Self::DepthStencilAttachment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageAspect {
    Color,
    Depth,
    DepthStencil,
}

/// 图像资源状态
///
/// 记录图像最近一次被使用的方式，用于计算下一次 barrier 的 src 部分。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageState {
    pub stage: PipelineStages,
    pub access: AccessFlags,
    pub layout: ImageLayout,
}

impl Default for ImageState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

// new & 常量定义
impl ImageState {
    #[inline]
    pub const fn new(stage: PipelineStages, access: AccessFlags, layout: ImageLayout) -> Self {
        Self { stage, access, layout }
    }

    /// 未定义状态（初始状态或不关心内容）
    pub const UNDEFINED: Self = Self::new(PipelineStages::TOP_OF_PIPE, AccessFlags::empty(), ImageLayout::Undefined);

    /// 通用布局，任何阶段都可能读写
    pub const GENERAL: Self = Self::new(
        PipelineStages::ALL_COMMANDS,
        AccessFlags::MEMORY_READ.union(AccessFlags::MEMORY_WRITE),
        ImageLayout::General,
    );

    pub const COLOR_ATTACHMENT: Self = Self::new(
        PipelineStages::COLOR_ATTACHMENT_OUTPUT,
        AccessFlags::COLOR_ATTACHMENT_READ.union(AccessFlags::COLOR_ATTACHMENT_WRITE),
        ImageLayout::ColorAttachment,
    );

    pub const DEPTH_ATTACHMENT: Self = Self::new(
        PipelineStages::EARLY_FRAGMENT_TESTS.union(PipelineStages::LATE_FRAGMENT_TESTS),
        AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ.union(AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE),
        ImageLayout::DepthAttachment,
    );

    pub const DEPTH_STENCIL_ATTACHMENT: Self = Self::new(
        PipelineStages::EARLY_FRAGMENT_TESTS.union(PipelineStages::LATE_FRAGMENT_TESTS),
        AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ.union(AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE),
        ImageLayout::DepthStencilAttachment,
    );

    /// 着色器只读采样（片段着色器与计算着色器）
    pub const SHADER_READ: Self = Self::new(
        PipelineStages::FRAGMENT_SHADER.union(PipelineStages::COMPUTE_SHADER),
        AccessFlags::SHADER_SAMPLED_READ,
        ImageLayout::ShaderReadOnly,
    );

    /// 存储图像读写（计算着色器）
    pub const STORAGE_READ_WRITE_COMPUTE: Self = Self::new(
        PipelineStages::COMPUTE_SHADER,
        AccessFlags::SHADER_STORAGE_READ.union(AccessFlags::SHADER_STORAGE_WRITE),
        ImageLayout::General,
    );

    pub const TRANSFER_SRC: Self = Self::new(PipelineStages::TRANSFER, AccessFlags::TRANSFER_READ, ImageLayout::TransferSrc);

    pub const TRANSFER_DST: Self =
        Self::new(PipelineStages::TRANSFER, AccessFlags::TRANSFER_WRITE, ImageLayout::TransferDst);

    /// 呈现（swapchain image）
    pub const PRESENT: Self = Self::new(PipelineStages::BOTTOM_OF_PIPE, AccessFlags::empty(), ImageLayout::Present);

    /// 每种布局对应的默认 stage 与 access
    pub const fn for_layout(layout: ImageLayout) -> Self {
        match layout {
            ImageLayout::Undefined => Self::UNDEFINED,
            ImageLayout::General => Self::GENERAL,
            ImageLayout::ColorAttachment => Self::COLOR_ATTACHMENT,
            ImageLayout::DepthAttachment => Self::DEPTH_ATTACHMENT,
            ImageLayout::DepthStencilAttachment => Self::DEPTH_STENCIL_ATTACHMENT,
            ImageLayout::ShaderReadOnly => Self::SHADER_READ,
            ImageLayout::TransferSrc => Self::TRANSFER_SRC,
            ImageLayout::TransferDst => Self::TRANSFER_DST,
            ImageLayout::Present => Self::PRESENT,
        }
    }

    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.is_write()
    }
}

impl From<ImageLayout> for ImageState {
    #[inline]
    fn from(layout: ImageLayout) -> Self {
        Self::for_layout(layout)
    }
}

/// 缓冲区资源状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferState {
    pub stage: PipelineStages,
    pub access: AccessFlags,
}

impl Default for BufferState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

// new & 常量定义
impl BufferState {
    #[inline]
    pub const fn new(stage: PipelineStages, access: AccessFlags) -> Self {
        Self { stage, access }
    }

    pub const UNDEFINED: Self = Self::new(PipelineStages::TOP_OF_PIPE, AccessFlags::empty());

    pub const INDEX_BUFFER: Self = Self::new(PipelineStages::INDEX_INPUT, AccessFlags::INDEX_READ);

    pub const INDIRECT_BUFFER: Self = Self::new(PipelineStages::DRAW_INDIRECT, AccessFlags::INDIRECT_COMMAND_READ);

    pub const UNIFORM_READ: Self = Self::new(
        PipelineStages::VERTEX_SHADER
            .union(PipelineStages::FRAGMENT_SHADER)
            .union(PipelineStages::COMPUTE_SHADER),
        AccessFlags::UNIFORM_READ,
    );

    /// 存储缓冲区读写（图形与计算着色器）
    pub const STORAGE_READ_WRITE: Self = Self::new(
        PipelineStages::ALL_GRAPHICS.union(PipelineStages::COMPUTE_SHADER),
        AccessFlags::SHADER_STORAGE_READ.union(AccessFlags::SHADER_STORAGE_WRITE),
    );

    pub const TRANSFER_SRC: Self = Self::new(PipelineStages::TRANSFER, AccessFlags::TRANSFER_READ);

    pub const TRANSFER_DST: Self = Self::new(PipelineStages::TRANSFER, AccessFlags::TRANSFER_WRITE);

    pub const HOST_READ: Self = Self::new(PipelineStages::HOST, AccessFlags::HOST_READ);

    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.is_write()
    }
}
