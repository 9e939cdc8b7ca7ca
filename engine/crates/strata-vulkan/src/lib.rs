//! Strata 的 Vulkan 后端
//!
//! 实现 [`strata_gfx::backend`] 中的各个 trait：
//! - 设备初始化：instance、physical device、logical device、vma（[`foundation`]）
//! - 资源：buffer、image、sampler（[`resources`]）
//! - bindless descriptor set 与 pipeline（[`pipelines`]）
//! - command buffer、timeline semaphore 队列（[`commands`]）
//! - surface 与 swapchain（[`swapchain`]）
//!
//! 需要 Vulkan 1.3：dynamic rendering、synchronization2、timeline semaphore 与 buffer device address。

pub mod commands;
pub mod convert;
pub mod foundation;
pub mod pipelines;
pub mod resources;
pub mod swapchain;
pub mod vulkan_device;

pub use vulkan_device::{VulkanDevice, VulkanDeviceDesc, WindowHandles};
