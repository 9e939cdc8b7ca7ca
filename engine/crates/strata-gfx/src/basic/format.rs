use serde::{Deserialize, Serialize};

/// 纹理格式
///
/// 只包含渲染中实际会用到的格式，后端负责映射到 `vk::Format` / `DXGI_FORMAT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Bgra8Srgb,
    Rgb10A2Unorm,
    Rg16Float,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    R32Uint,

    D16Unorm,
    D32Float,
    D24UnormS8Uint,
    D32FloatS8Uint,
}

impl TextureFormat {
    #[inline]
    pub fn is_depth(self) -> bool {
        matches!(self, Self::D16Unorm | Self::D32Float | Self::D24UnormS8Uint | Self::D32FloatS8Uint)
    }

    #[inline]
    pub fn has_stencil(self) -> bool {
        matches!(self, Self::D24UnormS8Uint | Self::D32FloatS8Uint)
    }

    /// 单个像素占用的字节数，用于计算 staging buffer 的大小
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::D16Unorm => 2,
            Self::Rgba8Unorm
            | Self::Rgba8Srgb
            | Self::Bgra8Unorm
            | Self::Bgra8Srgb
            | Self::Rgb10A2Unorm
            | Self::Rg16Float
            | Self::R32Float
            | Self::R32Uint
            | Self::D32Float
            | Self::D24UnormS8Uint => 4,
            Self::Rgba16Float | Self::D32FloatS8Uint => 8,
            Self::Rgba32Float => 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_formats() {
        assert!(TextureFormat::D32Float.is_depth());
        assert!(!TextureFormat::D32Float.has_stencil());
        assert!(TextureFormat::D24UnormS8Uint.has_stencil());
        assert!(!TextureFormat::Rgba8Unorm.is_depth());
    }

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(TextureFormat::Rgba8Unorm.bytes_per_pixel(), 4);
        assert_eq!(TextureFormat::Rgba16Float.bytes_per_pixel(), 8);
        assert_eq!(TextureFormat::Rgba32Float.bytes_per_pixel(), 16);
    }
}
