//! Strata 的 D3D12 后端
//!
//! 实现 [`strata_gfx::backend`] 中的各个 trait：
//! - factory、adapter 与 device 的创建，debug layer 消息转发（[`foundation`]）
//! - shader visible 的 bindless heap、CPU 端的 RTV/DSV heap 与 root signature（[`descriptors`]）
//! - committed resource 形式的 buffer 与 texture、sampler（[`resources`]）
//! - pipeline state 与 indirect command signature（[`pipelines`]）
//! - command list、基于 fence 的 timeline 队列（[`commands`]）
//! - flip model swapchain（[`swapchain`]）
//!
//! 除了 heap 布局这类纯计算的部分，其余模块只在 windows 平台编译。

pub mod descriptors;

#[cfg(windows)]
pub mod commands;
#[cfg(windows)]
pub mod convert;
#[cfg(windows)]
pub mod d3d12_device;
#[cfg(windows)]
pub mod foundation;
#[cfg(windows)]
pub mod pipelines;
#[cfg(windows)]
pub mod resources;
#[cfg(windows)]
pub mod swapchain;

#[cfg(windows)]
pub use d3d12_device::{D3D12Device, D3D12DeviceDesc};
