use thiserror::Error;

use crate::descriptors::descriptor_allocator::DescriptorKind;

pub type GfxResult<T> = Result<T, GfxError>;

/// GFX 层的错误
///
/// 初始化阶段与每帧同步阶段的失败都以 `Result` 的形式向上传递；
/// 调用方的逻辑错误（无效句柄、重复 end 等）不在此列，直接 assert。
///
/// 携带的 `String` 为后端原生的错误信息（例如 `vk::Result` 的 Debug 输出或 HRESULT）。
#[derive(Debug, Error)]
pub enum GfxError {
    // 初始化
    #[error("failed to create instance: {0}")]
    InstanceCreateFailed(String),
    #[error("no suitable gpu: {0}")]
    GpuSelectionFailed(String),
    #[error("required queue not found: {0}")]
    QueueNotFound(String),
    #[error("failed to create device: {0}")]
    DeviceCreateFailed(String),
    #[error("failed to create memory allocator: {0}")]
    AllocatorCreateFailed(String),
    #[error("failed to create surface: {0}")]
    SurfaceCreateFailed(String),
    #[error("failed to create swapchain: {0}")]
    SwapchainCreateFailed(String),
    #[error("failed to create descriptor layout: {0}")]
    DescriptorLayoutCreateFailed(String),
    #[error("failed to create pipeline layout: {0}")]
    PipelineLayoutCreateFailed(String),

    // 对象创建
    #[error("failed to create command pool: {0}")]
    CommandPoolCreateFailed(String),
    #[error("failed to create command buffer: {0}")]
    CommandBufferCreateFailed(String),
    #[error("failed to create image: {0}")]
    ImageCreateFailed(String),
    #[error("failed to create image view: {0}")]
    ImageViewCreateFailed(String),
    #[error("failed to create buffer: {0}")]
    BufferCreateFailed(String),
    #[error("failed to map buffer: {0}")]
    BufferMapFailed(String),
    #[error("failed to create shader: {0}")]
    ShaderCreateFailed(String),
    #[error("failed to create pipeline: {0}")]
    PipelineCreateFailed(String),
    #[error("failed to create sampler: {0}")]
    SamplerCreateFailed(String),
    #[error("failed to create semaphore: {0}")]
    SemaphoreCreateFailed(String),
    #[error("failed to create fence: {0}")]
    FenceCreateFailed(String),

    // 分配
    #[error("descriptor pool {kind:?} exhausted (max {max})")]
    DescriptorExhausted { kind: DescriptorKind, max: u32 },

    // 同步
    #[error("failed to acquire next swapchain image: {0}")]
    AcquireNextImageFailed(String),
    #[error("failed to submit queue: {0}")]
    SubmitFailed(String),
    #[error("failed to present: {0}")]
    PresentFailed(String),
    #[error("failed to wait fence: {0}")]
    FenceWaitFailed(String),
    #[error("fence value {value} not reached within {timeout_ms} ms, device is likely lost")]
    FenceTimeout { value: u64, timeout_ms: u64 },
    #[error("failed to wait device idle: {0}")]
    DeviceWaitFailed(String),
    #[error("device lost")]
    DeviceLost,

    // 录制
    #[error("failed to begin command buffer: {0}")]
    CommandBeginFailed(String),
    #[error("failed to end command buffer: {0}")]
    CommandEndFailed(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl GfxError {
    /// 是否为初始化阶段的错误，这类错误会直接终止 Context 的创建
    pub fn is_instantiation(&self) -> bool {
        matches!(
            self,
            Self::InstanceCreateFailed(_)
                | Self::GpuSelectionFailed(_)
                | Self::QueueNotFound(_)
                | Self::DeviceCreateFailed(_)
                | Self::AllocatorCreateFailed(_)
                | Self::SurfaceCreateFailed(_)
                | Self::SwapchainCreateFailed(_)
                | Self::DescriptorLayoutCreateFailed(_)
                | Self::PipelineLayoutCreateFailed(_)
        )
    }

    /// 是否为同步阶段的错误
    pub fn is_synchronization(&self) -> bool {
        matches!(
            self,
            Self::AcquireNextImageFailed(_)
                | Self::SubmitFailed(_)
                | Self::PresentFailed(_)
                | Self::FenceWaitFailed(_)
                | Self::FenceTimeout { .. }
                | Self::DeviceWaitFailed(_)
                | Self::DeviceLost
        )
    }
}
