use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::basic::format::TextureFormat;
use crate::descriptors::descriptor_allocator::DescriptorKind;

/// GFX 层默认配置
pub struct DefaultGfxSettings;
impl DefaultGfxSettings {
    pub const APP_NAME: &'static str = "strata";
    pub const FRAMES_IN_FLIGHT: u32 = 2;
    pub const MAX_FRAMES_IN_FLIGHT: u32 = 3;
    /// BeginFrame 等待 frame fence 的超时时间，超时视为设备丢失
    pub const FENCE_TIMEOUT_MS: u64 = 1000;
    pub const COLOR_FORMAT: TextureFormat = TextureFormat::Bgra8Unorm;
    pub const DEPTH_FORMAT: TextureFormat = TextureFormat::D32Float;

    pub const SAMPLED_IMAGE_CAPACITY: PoolCapacity = PoolCapacity::new(128, 4096);
    pub const STORAGE_IMAGE_CAPACITY: PoolCapacity = PoolCapacity::new(64, 1024);
    pub const STORAGE_BUFFER_CAPACITY: PoolCapacity = PoolCapacity::new(128, 4096);
    pub const CONSTANT_BUFFER_CAPACITY: PoolCapacity = PoolCapacity::new(32, 1024);
    pub const SAMPLER_CAPACITY: PoolCapacity = PoolCapacity::new(16, 128);
}

/// 单个 descriptor pool 的容量：初始容量与上限
///
/// 容量耗尽时翻倍增长，直到 `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCapacity {
    pub initial: u32,
    pub max: u32,
}

impl PoolCapacity {
    pub const fn new(initial: u32, max: u32) -> Self {
        Self { initial, max }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorCapacities {
    pub sampled_image: PoolCapacity,
    pub storage_image: PoolCapacity,
    pub storage_buffer: PoolCapacity,
    pub constant_buffer: PoolCapacity,
    pub sampler: PoolCapacity,
}

impl Default for DescriptorCapacities {
    fn default() -> Self {
        Self {
            sampled_image: DefaultGfxSettings::SAMPLED_IMAGE_CAPACITY,
            storage_image: DefaultGfxSettings::STORAGE_IMAGE_CAPACITY,
            storage_buffer: DefaultGfxSettings::STORAGE_BUFFER_CAPACITY,
            constant_buffer: DefaultGfxSettings::CONSTANT_BUFFER_CAPACITY,
            sampler: DefaultGfxSettings::SAMPLER_CAPACITY,
        }
    }
}

impl DescriptorCapacities {
    #[inline]
    pub fn get(&self, kind: DescriptorKind) -> PoolCapacity {
        match kind {
            DescriptorKind::SampledImage => self.sampled_image,
            DescriptorKind::StorageImage => self.storage_image,
            DescriptorKind::StorageBuffer => self.storage_buffer,
            DescriptorKind::ConstantBuffer => self.constant_buffer,
            DescriptorKind::Sampler => self.sampler,
        }
    }
}

/// Context 的创建参数，可以从 TOML 文件加载
///
/// ```toml
/// app_name = "demo"
/// frames_in_flight = 3
/// fence_timeout_ms = 2000
///
/// [descriptors.sampled_image]
/// initial = 256
/// max = 8192
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GfxSettings {
    pub app_name: String,
    pub frames_in_flight: u32,
    pub vsync: bool,
    pub enable_validation: bool,
    pub fence_timeout_ms: u64,
    pub color_format: TextureFormat,
    pub depth_format: TextureFormat,
    pub descriptors: DescriptorCapacities,
}

impl Default for GfxSettings {
    fn default() -> Self {
        Self {
            app_name: DefaultGfxSettings::APP_NAME.to_string(),
            frames_in_flight: DefaultGfxSettings::FRAMES_IN_FLIGHT,
            vsync: true,
            enable_validation: cfg!(debug_assertions),
            fence_timeout_ms: DefaultGfxSettings::FENCE_TIMEOUT_MS,
            color_format: DefaultGfxSettings::COLOR_FORMAT,
            depth_format: DefaultGfxSettings::DEPTH_FORMAT,
            descriptors: DescriptorCapacities::default(),
        }
    }
}

impl GfxSettings {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let settings: Self = strata_crate_tools::config::parse_toml(content)?;
        Ok(settings.sanitized())
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let settings: Self = strata_crate_tools::config::load_toml(path)?;
        Ok(settings.sanitized())
    }

    /// 将越界的配置修正到合法范围
    pub fn sanitized(mut self) -> Self {
        let fif = self.frames_in_flight.clamp(2, DefaultGfxSettings::MAX_FRAMES_IN_FLIGHT);
        if fif != self.frames_in_flight {
            log::warn!("frames_in_flight {} out of range, clamped to {}", self.frames_in_flight, fif);
            self.frames_in_flight = fif;
        }
        if !self.depth_format.is_depth() {
            log::warn!("depth_format {:?} is not a depth format, fallback to default", self.depth_format);
            self.depth_format = DefaultGfxSettings::DEPTH_FORMAT;
        }
        for kind in DescriptorKind::ALL {
            let cap = self.descriptors.get(kind);
            if cap.initial == 0 || cap.initial > cap.max {
                log::warn!("descriptor capacity of {:?} is invalid: {:?}", kind, cap);
            }
        }
        self.fence_timeout_ms = self.fence_timeout_ms.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fence_timeout() {
        let settings = GfxSettings::default();
        assert_eq!(settings.fence_timeout_ms, 1000);
        assert_eq!(settings.frames_in_flight, 2);
    }

    #[test]
    fn test_from_toml_partial() {
        let settings = GfxSettings::from_toml_str(
            r#"
            app_name = "demo"
            frames_in_flight = 3
            depth_format = "D24UnormS8Uint"

            [descriptors.sampler]
            initial = 4
            max = 8
            "#,
        )
        .unwrap();

        assert_eq!(settings.app_name, "demo");
        assert_eq!(settings.frames_in_flight, 3);
        assert_eq!(settings.depth_format, TextureFormat::D24UnormS8Uint);
        assert_eq!(settings.descriptors.sampler, PoolCapacity::new(4, 8));
        // 未指定的字段使用默认值
        assert_eq!(settings.fence_timeout_ms, DefaultGfxSettings::FENCE_TIMEOUT_MS);
        assert_eq!(settings.descriptors.sampled_image, DefaultGfxSettings::SAMPLED_IMAGE_CAPACITY);
    }

    #[test]
    fn test_sanitize_frames_in_flight() {
        let settings = GfxSettings::from_toml_str("frames_in_flight = 8").unwrap();
        assert_eq!(settings.frames_in_flight, DefaultGfxSettings::MAX_FRAMES_IN_FLIGHT);

        let settings = GfxSettings::from_toml_str("depth_format = \"Rgba8Unorm\"").unwrap();
        assert_eq!(settings.depth_format, DefaultGfxSettings::DEPTH_FORMAT);
    }
}
