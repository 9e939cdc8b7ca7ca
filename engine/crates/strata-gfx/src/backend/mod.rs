//! 后端接口
//!
//! 每个后端角色对应一个 trait。状态追踪与 descriptor 分配只在核心层实现一次，
//! 后端只负责翻译最终的 barrier、descriptor 写入以及原生调用。

pub mod headless;

use std::ptr::NonNull;
use std::time::Duration;

use crate::basic::format::TextureFormat;
use crate::basic::types::{ClearColor, Extent2D, IndexType, Rect2D, Viewport};
use crate::descriptors::descriptor_allocator::{DescriptorKind, DescriptorSlot};
use crate::error::GfxResult;
use crate::resources::buffer::BufferDesc;
use crate::resources::sampler::{Filter, SamplerDesc};
use crate::resources::shader::{ShaderDesc, ShaderKind};
use crate::resources::texture::TextureDesc;
use crate::sync::resource_state::PipelineStages;
use crate::sync::state_tracker::{BufferBarrierDesc, ImageBarrierDesc};

pub trait RhiBuffer {
    fn size(&self) -> u64;

    /// host 可见的 buffer 返回持久映射的地址
    fn mapped_ptr(&self) -> Option<NonNull<u8>>;

    fn device_address(&self) -> u64;
}

pub trait RhiTexture {
    fn extent(&self) -> Extent2D;

    fn format(&self) -> TextureFormat;
}

pub trait RhiShader {
    fn kind(&self) -> ShaderKind;
}

/// 写入 bindless 表中某个 slot 的内容
pub enum DescriptorWrite<'a, D: RhiDevice> {
    SampledImage(&'a D::Texture),
    StorageImage(&'a D::Texture),
    StorageBuffer(&'a D::Buffer),
    ConstantBuffer(&'a D::Buffer),
    Sampler(&'a D::Sampler),
}

impl<D: RhiDevice> DescriptorWrite<'_, D> {
    pub fn kind(&self) -> DescriptorKind {
        match self {
            Self::SampledImage(_) => DescriptorKind::SampledImage,
            Self::StorageImage(_) => DescriptorKind::StorageImage,
            Self::StorageBuffer(_) => DescriptorKind::StorageBuffer,
            Self::ConstantBuffer(_) => DescriptorKind::ConstantBuffer,
            Self::Sampler(_) => DescriptorKind::Sampler,
        }
    }
}

pub struct ImageBarrier<'a, D: RhiDevice> {
    pub texture: &'a D::Texture,
    pub desc: ImageBarrierDesc,
}

pub struct BufferBarrier<'a, D: RhiDevice> {
    pub buffer: &'a D::Buffer,
    pub desc: BufferBarrierDesc,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp<T> {
    Load,
    Clear(T),
    DontCare,
}

pub struct ColorAttachment<'a, D: RhiDevice> {
    pub texture: &'a D::Texture,
    pub load: LoadOp<ClearColor>,
}

pub struct DepthAttachment<'a, D: RhiDevice> {
    pub texture: &'a D::Texture,
    pub load: LoadOp<f32>,
}

/// dynamic rendering 的参数，附件在调用前已经处于 attachment 布局
pub struct RenderingDesc<'a, D: RhiDevice> {
    pub area: Rect2D,
    pub colors: Vec<ColorAttachment<'a, D>>,
    pub depth: Option<DepthAttachment<'a, D>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCopyRegion {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

/// buffer 与 texture 某个 mip 之间的拷贝
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferTextureCopyRegion {
    pub buffer_offset: u64,
    /// buffer 中相邻两行的字节跨度，需要满足 `RhiDevice::texture_row_pitch_alignment`
    pub row_pitch: u64,
    pub extent: Extent2D,
    pub mip_level: u32,
}

pub struct SemaphoreWait<'a, D: RhiDevice> {
    pub semaphore: &'a D::Semaphore,
    pub stage: PipelineStages,
}

/// 一次提交。`timeline_value` 会在所有命令执行完毕后写入队列的 timeline
pub struct QueueSubmit<'a, D: RhiDevice> {
    pub command_lists: &'a [&'a D::CommandList],
    pub waits: &'a [SemaphoreWait<'a, D>],
    pub signals: &'a [&'a D::Semaphore],
    pub timeline_value: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    Acquired { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentResult {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl PresentResult {
    #[inline]
    pub fn need_recreate(self) -> bool {
        !matches!(self, Self::Optimal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub extent: Extent2D,
    pub image_count: u32,
    pub format: TextureFormat,
    pub vsync: bool,
}

pub trait RhiCommandList<D: RhiDevice> {
    /// 重置 command list 及其 allocator，调用方保证上一次提交已经执行完毕
    fn reset(&mut self) -> GfxResult<()>;
    fn begin(&mut self) -> GfxResult<()>;
    fn end(&mut self) -> GfxResult<()>;

    fn barriers(&mut self, images: &[ImageBarrier<'_, D>], buffers: &[BufferBarrier<'_, D>]);

    fn begin_rendering(&mut self, desc: &RenderingDesc<'_, D>);
    fn end_rendering(&mut self);
    fn set_viewport(&mut self, viewport: &Viewport);
    fn set_scissor(&mut self, scissor: &Rect2D);

    fn bind_shader(&mut self, shader: &D::Shader);
    fn push_constants(&mut self, shader: &D::Shader, offset: u32, data: &[u8]);
    fn bind_index_buffer(&mut self, buffer: &D::Buffer, offset: u64, index_type: IndexType);

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn draw_indexed_indirect(&mut self, buffer: &D::Buffer, offset: u64, draw_count: u32, stride: u32);
    #[allow(clippy::too_many_arguments)]
    fn draw_indexed_indirect_count(
        &mut self,
        buffer: &D::Buffer,
        offset: u64,
        count_buffer: &D::Buffer,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    );
    fn dispatch(&mut self, x: u32, y: u32, z: u32);

    /// texture 处于 General 布局
    fn clear_color(&mut self, texture: &D::Texture, color: ClearColor);
    /// texture 处于 General 布局
    fn clear_depth(&mut self, texture: &D::Texture, depth: f32);

    fn copy_buffer(&mut self, src: &D::Buffer, dst: &D::Buffer, regions: &[BufferCopyRegion]);
    fn copy_buffer_to_texture(&mut self, src: &D::Buffer, dst: &D::Texture, region: &BufferTextureCopyRegion);
    fn copy_texture_to_buffer(&mut self, src: &D::Texture, dst: &D::Buffer, region: &BufferTextureCopyRegion);
    fn copy_texture(&mut self, src: &D::Texture, dst: &D::Texture, extent: Extent2D);
    fn blit_texture(&mut self, src: &D::Texture, dst: &D::Texture, src_rect: Rect2D, dst_rect: Rect2D, filter: Filter);
    /// 小块数据的内联更新，数据大小不超过 65536 字节
    fn update_buffer(&mut self, buffer: &D::Buffer, offset: u64, data: &[u8]);

    fn begin_label(&mut self, label: &str, color: [f32; 4]);
    fn end_label(&mut self);
}

pub trait RhiQueue<D: RhiDevice> {
    fn submit(&self, submit: &QueueSubmit<'_, D>) -> GfxResult<()>;

    /// timeline 上已经完成的值
    fn completed_value(&self) -> GfxResult<u64>;

    /// 等待 timeline 到达 `value`。超时返回 `Ok(false)`，`timeout` 为 None 时无限等待
    fn wait_value(&self, value: u64, timeout: Option<Duration>) -> GfxResult<bool>;
}

pub trait RhiSwapchain<D: RhiDevice> {
    fn extent(&self) -> Extent2D;
    fn format(&self) -> TextureFormat;
    fn image_count(&self) -> u32;
    fn image(&self, index: u32) -> &D::Texture;

    /// 获取下一张图像，图像可用时 signal `signal`
    fn acquire_next_image(&mut self, signal: &D::Semaphore, timeout: Duration) -> GfxResult<AcquireResult>;

    fn present(&mut self, queue: &D::Queue, image_index: u32, wait: &D::Semaphore) -> GfxResult<PresentResult>;
}

pub trait RhiDevice: Sized + Send + Sync + 'static {
    type Buffer: RhiBuffer;
    type Texture: RhiTexture;
    type Sampler;
    type Shader: RhiShader;
    type CommandList: RhiCommandList<Self>;
    type Queue: RhiQueue<Self>;
    type Semaphore;
    type Swapchain: RhiSwapchain<Self>;

    fn backend_name(&self) -> &'static str;

    /// graphics queue family 中的 queue 数量，大于 1 时才能创建 thread context
    fn graphics_queue_count(&self) -> u32;

    /// bindless 表中某种 descriptor 的实际大小
    fn descriptor_capacity(&self, kind: DescriptorKind) -> u32;

    /// buffer 与 texture 互相拷贝时行跨度的对齐要求
    fn texture_row_pitch_alignment(&self) -> u64 {
        1
    }

    fn create_queue(&self, queue_index: u32, name: &str) -> GfxResult<Self::Queue>;
    fn create_command_list(&self, queue: &Self::Queue, name: &str) -> GfxResult<Self::CommandList>;
    fn create_semaphore(&self, name: &str) -> GfxResult<Self::Semaphore>;

    fn create_buffer(&self, desc: &BufferDesc) -> GfxResult<Self::Buffer>;
    fn create_texture(&self, desc: &TextureDesc) -> GfxResult<Self::Texture>;
    fn create_sampler(&self, desc: &SamplerDesc) -> GfxResult<Self::Sampler>;
    fn create_shader(&self, desc: &ShaderDesc<'_>) -> GfxResult<Self::Shader>;

    fn create_swapchain(&self, desc: &SwapchainDesc) -> GfxResult<Self::Swapchain>;
    /// 调用方保证设备已经 idle
    fn recreate_swapchain(&self, swapchain: &mut Self::Swapchain, desc: &SwapchainDesc) -> GfxResult<()>;

    fn write_descriptor(&self, slot: DescriptorSlot, write: DescriptorWrite<'_, Self>);

    fn destroy_buffer(&self, buffer: Self::Buffer);
    fn destroy_texture(&self, texture: Self::Texture);
    fn destroy_sampler(&self, sampler: Self::Sampler);
    fn destroy_shader(&self, shader: Self::Shader);
    fn destroy_command_list(&self, command_list: Self::CommandList);
    fn destroy_semaphore(&self, semaphore: Self::Semaphore);
    fn destroy_queue(&self, queue: Self::Queue);
    fn destroy_swapchain(&self, swapchain: Self::Swapchain);

    fn wait_idle(&self) -> GfxResult<()>;

    /// 销毁设备，所有子对象需要先被销毁
    fn destroy(self);
}
