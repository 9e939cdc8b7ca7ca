//! 与后端无关的 GPU 资源/命令抽象层
//!
//! 核心职责：
//! - bindless descriptor slot 的分配与回收（[`descriptors`]）
//! - 资源状态追踪与自动 barrier（[`sync`]）
//! - 多帧并行的同步协议：acquire → record → submit → present（[`frame`]）
//!
//! 具体的图形 API 通过 [`backend`] 中的 trait 接入，Vulkan 与 D3D12 后端分别位于独立的 crate 中。
//! [`backend::headless`] 是一个在 CPU 上模拟 GPU 时间线的后端，用于测试。
//!
//! # 使用示例
//! ```ignore
//! let mut ctx = Context::new(device, GfxSettings::default(), Extent2D::new(1280, 720))?;
//! let texture = ctx.create_texture(&TextureDesc::new_2d(256, 256, TextureFormat::Rgba8Unorm, ImageUsage::Sampled))?;
//!
//! {
//!     let mut cmd = ctx.begin_frame()?;
//!     cmd.transition_image(texture, ImageLayout::ShaderReadOnly);
//!     cmd.begin_rendering_swapchain(false);
//!     cmd.draw(3, 1, 0, 0);
//!     cmd.end_rendering();
//! }
//! ctx.end_frame()?;
//! ```

pub mod backend;
pub mod basic;
pub mod commands;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod frame;
pub mod handles;
pub mod resources;
pub mod settings;
pub mod sync;
pub mod thread_context;

pub use context::Context;
pub use error::{GfxError, GfxResult};
pub use settings::GfxSettings;

#[cfg(test)]
pub(crate) mod test_utils;
