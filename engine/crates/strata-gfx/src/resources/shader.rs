use crate::basic::format::TextureFormat;

/// 所有 shader 共享的 push constant 大小
pub const PUSH_CONSTANT_SIZE: u32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Graphics,
    Compute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    #[default]
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Always,
}

/// 图形管线的描述，字节码为预编译好的 blob（SPIR-V 或 DXIL）
#[derive(Debug, Clone)]
pub struct GraphicsShaderDesc<'a> {
    pub name: &'a str,
    pub vertex: &'a [u8],
    pub vertex_entry: &'a str,
    pub fragment: &'a [u8],
    pub fragment_entry: &'a str,

    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,

    pub cull_mode: CullMode,
    pub polygon_mode: PolygonMode,
    pub topology: PrimitiveTopology,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareOp,
    pub alpha_blend: bool,
}

impl<'a> GraphicsShaderDesc<'a> {
    pub fn new(name: &'a str, vertex: &'a [u8], fragment: &'a [u8]) -> Self {
        Self {
            name,
            vertex,
            vertex_entry: "main",
            fragment,
            fragment_entry: "main",
            color_formats: Vec::new(),
            depth_format: None,
            cull_mode: CullMode::default(),
            polygon_mode: PolygonMode::default(),
            topology: PrimitiveTopology::default(),
            depth_test: false,
            depth_write: false,
            depth_compare: CompareOp::default(),
            alpha_blend: false,
        }
    }

    #[inline]
    pub fn with_color_formats(mut self, formats: &[TextureFormat]) -> Self {
        self.color_formats = formats.to_vec();
        self
    }

    /// 开启深度测试与深度写入
    #[inline]
    pub fn with_depth(mut self, format: TextureFormat, compare: CompareOp) -> Self {
        self.depth_format = Some(format);
        self.depth_test = true;
        self.depth_write = true;
        self.depth_compare = compare;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ComputeShaderDesc<'a> {
    pub name: &'a str,
    pub code: &'a [u8],
    pub entry: &'a str,
}

impl<'a> ComputeShaderDesc<'a> {
    pub fn new(name: &'a str, code: &'a [u8]) -> Self {
        Self {
            name,
            code,
            entry: "main",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ShaderDesc<'a> {
    Graphics(GraphicsShaderDesc<'a>),
    Compute(ComputeShaderDesc<'a>),
}

impl ShaderDesc<'_> {
    #[inline]
    pub fn kind(&self) -> ShaderKind {
        match self {
            Self::Graphics(_) => ShaderKind::Graphics,
            Self::Compute(_) => ShaderKind::Compute,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        match self {
            Self::Graphics(desc) => desc.name,
            Self::Compute(desc) => desc.name,
        }
    }
}
