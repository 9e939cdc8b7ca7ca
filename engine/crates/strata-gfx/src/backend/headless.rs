//! 在 CPU 上模拟的后端
//!
//! 不产生任何 GPU 调用，只记录命令并模拟 queue 的 timeline。用于在没有 GPU 的环境下
//! 验证帧调度、状态追踪与资源生命周期：
//! - timeline 可以在提交时自动完成，也可以通过 [`HeadlessProbe::signal_up_to`] 手动推进
//! - acquire / present 的结果可以预先编排
//! - 每次提交的命令都会被记录下来，供测试检查

use std::cell::{Cell, UnsafeCell};
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{
    AcquireResult, BufferBarrier, BufferCopyRegion, BufferTextureCopyRegion, DescriptorWrite, ImageBarrier,
    PresentResult, QueueSubmit, RenderingDesc, RhiBuffer, RhiCommandList, RhiDevice, RhiQueue, RhiShader,
    RhiSwapchain, RhiTexture, SwapchainDesc,
};
use crate::basic::format::TextureFormat;
use crate::basic::types::{ClearColor, Extent2D, IndexType, Rect2D, Viewport};
use crate::descriptors::descriptor_allocator::{DescriptorKind, DescriptorSlot};
use crate::error::{GfxError, GfxResult};
use crate::resources::buffer::BufferDesc;
use crate::resources::sampler::{Filter, SamplerDesc};
use crate::resources::shader::{ShaderDesc, ShaderKind};
use crate::resources::texture::TextureDesc;
use crate::sync::resource_state::PipelineStages;
use crate::sync::state_tracker::{BufferBarrierDesc, ImageBarrierDesc};

#[derive(Debug, Clone, Copy)]
pub struct HeadlessConfig {
    /// graphics family 中的 queue 数量
    pub queue_count: u32,
    /// 提交后是否立即完成
    pub auto_signal: bool,
    pub descriptor_capacity: u32,
    /// buffer 与 texture 之间拷贝时的行对齐
    pub row_pitch_alignment: u64,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            queue_count: 2,
            auto_signal: true,
            descriptor_capacity: 1 << 16,
            row_pitch_alignment: 1,
        }
    }
}

/// 被记录下来的命令，资源以对象 id 表示
#[derive(Debug, Clone, PartialEq)]
pub enum HeadlessCommand {
    Barrier {
        images: Vec<(u64, ImageBarrierDesc)>,
        buffers: Vec<(u64, BufferBarrierDesc)>,
    },
    BeginRendering {
        colors: Vec<u64>,
        depth: Option<u64>,
    },
    EndRendering,
    SetViewport(Viewport),
    SetScissor(Rect2D),
    BindShader(u64),
    PushConstants {
        shader: u64,
        offset: u32,
        size: usize,
    },
    BindIndexBuffer {
        buffer: u64,
        offset: u64,
        index_type: IndexType,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    DrawIndexedIndirect {
        buffer: u64,
        draw_count: u32,
    },
    DrawIndexedIndirectCount {
        buffer: u64,
        count_buffer: u64,
        max_draw_count: u32,
    },
    Dispatch(u32, u32, u32),
    ClearColor {
        texture: u64,
        color: ClearColor,
    },
    ClearDepth {
        texture: u64,
        depth: f32,
    },
    CopyBuffer {
        src: u64,
        dst: u64,
        size: u64,
    },
    CopyBufferToTexture {
        src: u64,
        dst: u64,
        row_pitch: u64,
    },
    CopyTextureToBuffer {
        src: u64,
        dst: u64,
        row_pitch: u64,
    },
    CopyTexture {
        src: u64,
        dst: u64,
    },
    BlitTexture {
        src: u64,
        dst: u64,
    },
    UpdateBuffer {
        buffer: u64,
        offset: u64,
        size: usize,
    },
    BeginLabel(String),
    EndLabel,
}

#[derive(Debug, Clone)]
pub struct HeadlessSubmission {
    pub queue_index: usize,
    pub timeline_value: u64,
    pub wait_count: usize,
    /// 每个 wait 所阻塞的 stage
    pub wait_stages: Vec<PipelineStages>,
    pub signal_count: usize,
    pub commands: Vec<HeadlessCommand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedAcquire {
    Suboptimal,
    OutOfDate,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedPresent {
    Suboptimal,
    OutOfDate,
    Fail,
}

#[derive(Debug, Default, Clone, Copy)]
struct HeadlessTimeline {
    submitted: u64,
    completed: u64,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_id: u64,
    auto_signal: bool,
    timelines: Vec<HeadlessTimeline>,

    acquire_script: VecDeque<ScriptedAcquire>,
    present_script: VecDeque<ScriptedPresent>,
    /// 接下来需要失败的提交次数
    failing_submits: u32,

    swapchain_creations: u32,
    depth_creations: u32,
    acquire_count: u32,
    present_count: u32,
    live_buffers: i64,
    live_textures: i64,
    live_samplers: i64,
    live_shaders: i64,

    descriptor_writes: Vec<(DescriptorSlot, u64)>,
    submissions: Vec<HeadlessSubmission>,
    destroyed: bool,
}

impl HeadlessState {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

type SharedState = Arc<Mutex<HeadlessState>>;

// resources -------------------------------------------------------------------------------------

pub struct HeadlessBuffer {
    id: u64,
    size: u64,
    /// 只有 host 可见的 buffer 才有 CPU 端存储
    storage: Option<Box<[UnsafeCell<u8>]>>,
}

// storage 只通过 mapped_ptr 暴露，与 GPU 映射内存的约束一致：由调用方保证读写不冲突
unsafe impl Send for HeadlessBuffer {}
unsafe impl Sync for HeadlessBuffer {}

impl HeadlessBuffer {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl RhiBuffer for HeadlessBuffer {
    #[inline]
    fn size(&self) -> u64 {
        self.size
    }

    fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.storage.as_ref().and_then(|storage| NonNull::new(UnsafeCell::raw_get(storage.as_ptr())))
    }

    #[inline]
    fn device_address(&self) -> u64 {
        self.id << 32
    }
}

#[derive(Debug)]
pub struct HeadlessTexture {
    id: u64,
    extent: Extent2D,
    format: TextureFormat,
}

impl HeadlessTexture {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl RhiTexture for HeadlessTexture {
    #[inline]
    fn extent(&self) -> Extent2D {
        self.extent
    }

    #[inline]
    fn format(&self) -> TextureFormat {
        self.format
    }
}

#[derive(Debug)]
pub struct HeadlessSampler {
    id: u64,
}

#[derive(Debug)]
pub struct HeadlessShader {
    id: u64,
    kind: ShaderKind,
}

impl RhiShader for HeadlessShader {
    #[inline]
    fn kind(&self) -> ShaderKind {
        self.kind
    }
}

#[derive(Debug)]
pub struct HeadlessSemaphore {
    _id: u64,
}

// command list ----------------------------------------------------------------------------------

pub struct HeadlessCommandList {
    state: SharedState,
    queue_index: usize,
    name: String,
    recording: bool,
    commands: Vec<HeadlessCommand>,
    /// 最近一次提交对应的 timeline 值
    last_submitted: Cell<u64>,
}

impl HeadlessCommandList {
    fn push(&mut self, command: HeadlessCommand) {
        assert!(self.recording, "command list {} is not recording", self.name);
        self.commands.push(command);
    }

    #[inline]
    pub fn commands(&self) -> &[HeadlessCommand] {
        &self.commands
    }
}

impl RhiCommandList<HeadlessDevice> for HeadlessCommandList {
    fn reset(&mut self) -> GfxResult<()> {
        let completed = self.state.lock().timelines[self.queue_index].completed;
        assert!(
            completed >= self.last_submitted.get(),
            "command list {} reset before its submission {} signaled (completed {})",
            self.name,
            self.last_submitted.get(),
            completed
        );
        self.commands.clear();
        self.recording = false;
        Ok(())
    }

    fn begin(&mut self) -> GfxResult<()> {
        self.recording = true;
        Ok(())
    }

    fn end(&mut self) -> GfxResult<()> {
        self.recording = false;
        Ok(())
    }

    fn barriers(&mut self, images: &[ImageBarrier<'_, HeadlessDevice>], buffers: &[BufferBarrier<'_, HeadlessDevice>]) {
        self.push(HeadlessCommand::Barrier {
            images: images.iter().map(|b| (b.texture.id, b.desc)).collect(),
            buffers: buffers.iter().map(|b| (b.buffer.id, b.desc)).collect(),
        });
    }

    fn begin_rendering(&mut self, desc: &RenderingDesc<'_, HeadlessDevice>) {
        self.push(HeadlessCommand::BeginRendering {
            colors: desc.colors.iter().map(|c| c.texture.id).collect(),
            depth: desc.depth.as_ref().map(|d| d.texture.id),
        });
    }

    fn end_rendering(&mut self) {
        self.push(HeadlessCommand::EndRendering);
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.push(HeadlessCommand::SetViewport(*viewport));
    }

    fn set_scissor(&mut self, scissor: &Rect2D) {
        self.push(HeadlessCommand::SetScissor(*scissor));
    }

    fn bind_shader(&mut self, shader: &HeadlessShader) {
        self.push(HeadlessCommand::BindShader(shader.id));
    }

    fn push_constants(&mut self, shader: &HeadlessShader, offset: u32, data: &[u8]) {
        self.push(HeadlessCommand::PushConstants {
            shader: shader.id,
            offset,
            size: data.len(),
        });
    }

    fn bind_index_buffer(&mut self, buffer: &HeadlessBuffer, offset: u64, index_type: IndexType) {
        self.push(HeadlessCommand::BindIndexBuffer {
            buffer: buffer.id,
            offset,
            index_type,
        });
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, _first_vertex: u32, _first_instance: u32) {
        self.push(HeadlessCommand::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.push(HeadlessCommand::DrawIndexed {
            index_count,
            instance_count,
        });
    }

    fn draw_indexed_indirect(&mut self, buffer: &HeadlessBuffer, _offset: u64, draw_count: u32, _stride: u32) {
        self.push(HeadlessCommand::DrawIndexedIndirect {
            buffer: buffer.id,
            draw_count,
        });
    }

    fn draw_indexed_indirect_count(
        &mut self,
        buffer: &HeadlessBuffer,
        _offset: u64,
        count_buffer: &HeadlessBuffer,
        _count_offset: u64,
        max_draw_count: u32,
        _stride: u32,
    ) {
        self.push(HeadlessCommand::DrawIndexedIndirectCount {
            buffer: buffer.id,
            count_buffer: count_buffer.id,
            max_draw_count,
        });
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.push(HeadlessCommand::Dispatch(x, y, z));
    }

    fn clear_color(&mut self, texture: &HeadlessTexture, color: ClearColor) {
        self.push(HeadlessCommand::ClearColor {
            texture: texture.id,
            color,
        });
    }

    fn clear_depth(&mut self, texture: &HeadlessTexture, depth: f32) {
        self.push(HeadlessCommand::ClearDepth {
            texture: texture.id,
            depth,
        });
    }

    fn copy_buffer(&mut self, src: &HeadlessBuffer, dst: &HeadlessBuffer, regions: &[BufferCopyRegion]) {
        self.push(HeadlessCommand::CopyBuffer {
            src: src.id,
            dst: dst.id,
            size: regions.iter().map(|r| r.size).sum(),
        });
    }

    fn copy_buffer_to_texture(&mut self, src: &HeadlessBuffer, dst: &HeadlessTexture, region: &BufferTextureCopyRegion) {
        self.push(HeadlessCommand::CopyBufferToTexture {
            src: src.id,
            dst: dst.id,
            row_pitch: region.row_pitch,
        });
    }

    fn copy_texture_to_buffer(&mut self, src: &HeadlessTexture, dst: &HeadlessBuffer, region: &BufferTextureCopyRegion) {
        self.push(HeadlessCommand::CopyTextureToBuffer {
            src: src.id,
            dst: dst.id,
            row_pitch: region.row_pitch,
        });
    }

    fn copy_texture(&mut self, src: &HeadlessTexture, dst: &HeadlessTexture, _extent: Extent2D) {
        self.push(HeadlessCommand::CopyTexture { src: src.id, dst: dst.id });
    }

    fn blit_texture(
        &mut self,
        src: &HeadlessTexture,
        dst: &HeadlessTexture,
        _src_rect: Rect2D,
        _dst_rect: Rect2D,
        _filter: Filter,
    ) {
        self.push(HeadlessCommand::BlitTexture { src: src.id, dst: dst.id });
    }

    fn update_buffer(&mut self, buffer: &HeadlessBuffer, offset: u64, data: &[u8]) {
        self.push(HeadlessCommand::UpdateBuffer {
            buffer: buffer.id,
            offset,
            size: data.len(),
        });
    }

    fn begin_label(&mut self, label: &str, _color: [f32; 4]) {
        self.push(HeadlessCommand::BeginLabel(label.to_string()));
    }

    fn end_label(&mut self) {
        self.push(HeadlessCommand::EndLabel);
    }
}

// queue -----------------------------------------------------------------------------------------

pub struct HeadlessQueue {
    state: SharedState,
    index: usize,
}

impl RhiQueue<HeadlessDevice> for HeadlessQueue {
    fn submit(&self, submit: &QueueSubmit<'_, HeadlessDevice>) -> GfxResult<()> {
        let mut state = self.state.lock();
        if state.failing_submits > 0 {
            state.failing_submits -= 1;
            return Err(GfxError::SubmitFailed("scripted failure".to_string()));
        }
        let auto_signal = state.auto_signal;
        let timeline = &mut state.timelines[self.index];
        if submit.timeline_value <= timeline.submitted {
            return Err(GfxError::SubmitFailed(format!(
                "timeline value {} is not greater than {}",
                submit.timeline_value, timeline.submitted
            )));
        }
        timeline.submitted = submit.timeline_value;
        if auto_signal {
            timeline.completed = submit.timeline_value;
        }

        let mut commands = Vec::new();
        for list in submit.command_lists {
            assert!(!list.recording, "command list {} submitted while recording", list.name);
            list.last_submitted.set(submit.timeline_value);
            commands.extend(list.commands.iter().cloned());
        }
        state.submissions.push(HeadlessSubmission {
            queue_index: self.index,
            timeline_value: submit.timeline_value,
            wait_count: submit.waits.len(),
            wait_stages: submit.waits.iter().map(|wait| wait.stage).collect(),
            signal_count: submit.signals.len(),
            commands,
        });
        Ok(())
    }

    fn completed_value(&self) -> GfxResult<u64> {
        Ok(self.state.lock().timelines[self.index].completed)
    }

    fn wait_value(&self, value: u64, timeout: Option<Duration>) -> GfxResult<bool> {
        let timeline = self.state.lock().timelines[self.index];
        if timeline.completed >= value {
            return Ok(true);
        }
        if timeout.is_some() {
            return Ok(false);
        }
        Err(GfxError::FenceWaitFailed(format!(
            "headless timeline {} would never reach {} (completed {})",
            self.index, value, timeline.completed
        )))
    }
}

// swapchain -------------------------------------------------------------------------------------

pub struct HeadlessSwapchain {
    state: SharedState,
    desc: SwapchainDesc,
    images: Vec<HeadlessTexture>,
    next_image: u32,
}

impl HeadlessSwapchain {
    fn build_images(state: &mut HeadlessState, desc: &SwapchainDesc) -> Vec<HeadlessTexture> {
        (0..desc.image_count)
            .map(|_| HeadlessTexture {
                id: state.alloc_id(),
                extent: desc.extent,
                format: desc.format,
            })
            .collect()
    }
}

impl RhiSwapchain<HeadlessDevice> for HeadlessSwapchain {
    #[inline]
    fn extent(&self) -> Extent2D {
        self.desc.extent
    }

    #[inline]
    fn format(&self) -> TextureFormat {
        self.desc.format
    }

    #[inline]
    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    #[inline]
    fn image(&self, index: u32) -> &HeadlessTexture {
        &self.images[index as usize]
    }

    fn acquire_next_image(&mut self, _signal: &HeadlessSemaphore, _timeout: Duration) -> GfxResult<AcquireResult> {
        let scripted = {
            let mut state = self.state.lock();
            state.acquire_count += 1;
            state.acquire_script.pop_front()
        };
        let index = self.next_image;
        match scripted {
            Some(ScriptedAcquire::OutOfDate) => return Ok(AcquireResult::OutOfDate),
            Some(ScriptedAcquire::Fail) => {
                return Err(GfxError::AcquireNextImageFailed("scripted failure".to_string()));
            }
            Some(ScriptedAcquire::Suboptimal) | None => {}
        }
        self.next_image = (self.next_image + 1) % self.image_count();
        Ok(AcquireResult::Acquired {
            index,
            suboptimal: scripted == Some(ScriptedAcquire::Suboptimal),
        })
    }

    fn present(&mut self, _queue: &HeadlessQueue, image_index: u32, _wait: &HeadlessSemaphore) -> GfxResult<PresentResult> {
        debug_assert!(image_index < self.image_count());
        let mut state = self.state.lock();
        state.present_count += 1;
        match state.present_script.pop_front() {
            Some(ScriptedPresent::Suboptimal) => Ok(PresentResult::Suboptimal),
            Some(ScriptedPresent::OutOfDate) => Ok(PresentResult::OutOfDate),
            Some(ScriptedPresent::Fail) => Err(GfxError::PresentFailed("scripted failure".to_string())),
            None => Ok(PresentResult::Optimal),
        }
    }
}

// probe -----------------------------------------------------------------------------------------

/// 从外部观察与控制 headless 设备
#[derive(Clone)]
pub struct HeadlessProbe {
    state: SharedState,
}

impl HeadlessProbe {
    /// 将第 `queue_index` 个 queue 的 timeline 推进到 `value`（不会超过已提交的值）
    pub fn signal_up_to(&self, queue_index: usize, value: u64) {
        let mut state = self.state.lock();
        let timeline = &mut state.timelines[queue_index];
        timeline.completed = timeline.completed.max(value.min(timeline.submitted));
    }

    pub fn signal_all(&self) {
        for timeline in &mut self.state.lock().timelines {
            timeline.completed = timeline.submitted;
        }
    }

    pub fn set_auto_signal(&self, auto_signal: bool) {
        self.state.lock().auto_signal = auto_signal;
    }

    pub fn script_acquire(&self, result: ScriptedAcquire) {
        self.state.lock().acquire_script.push_back(result);
    }

    pub fn script_present(&self, result: ScriptedPresent) {
        self.state.lock().present_script.push_back(result);
    }

    /// 让接下来的 `count` 次提交返回错误，失败的提交不会推进 timeline
    pub fn fail_next_submits(&self, count: u32) {
        self.state.lock().failing_submits = count;
    }

    pub fn submitted_value(&self, queue_index: usize) -> u64 {
        self.state.lock().timelines[queue_index].submitted
    }

    pub fn completed_value(&self, queue_index: usize) -> u64 {
        self.state.lock().timelines[queue_index].completed
    }

    pub fn swapchain_creations(&self) -> u32 {
        self.state.lock().swapchain_creations
    }

    pub fn depth_creations(&self) -> u32 {
        self.state.lock().depth_creations
    }

    pub fn acquire_count(&self) -> u32 {
        self.state.lock().acquire_count
    }

    pub fn present_count(&self) -> u32 {
        self.state.lock().present_count
    }

    pub fn live_buffers(&self) -> i64 {
        self.state.lock().live_buffers
    }

    pub fn live_textures(&self) -> i64 {
        self.state.lock().live_textures
    }

    pub fn live_samplers(&self) -> i64 {
        self.state.lock().live_samplers
    }

    pub fn live_shaders(&self) -> i64 {
        self.state.lock().live_shaders
    }

    pub fn submissions(&self) -> Vec<HeadlessSubmission> {
        self.state.lock().submissions.clone()
    }

    pub fn last_submission(&self) -> Option<HeadlessSubmission> {
        self.state.lock().submissions.last().cloned()
    }

    pub fn descriptor_writes(&self) -> Vec<(DescriptorSlot, u64)> {
        self.state.lock().descriptor_writes.clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }
}

// device ----------------------------------------------------------------------------------------

pub struct HeadlessDevice {
    state: SharedState,
    config: HeadlessConfig,
}

impl HeadlessDevice {
    pub fn new(config: HeadlessConfig) -> Self {
        let state = HeadlessState {
            auto_signal: config.auto_signal,
            ..Default::default()
        };
        log::info!("headless device created: {:?}", config);
        Self {
            state: Arc::new(Mutex::new(state)),
            config,
        }
    }

    pub fn probe(&self) -> HeadlessProbe {
        HeadlessProbe {
            state: self.state.clone(),
        }
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

impl RhiDevice for HeadlessDevice {
    type Buffer = HeadlessBuffer;
    type Texture = HeadlessTexture;
    type Sampler = HeadlessSampler;
    type Shader = HeadlessShader;
    type CommandList = HeadlessCommandList;
    type Queue = HeadlessQueue;
    type Semaphore = HeadlessSemaphore;
    type Swapchain = HeadlessSwapchain;

    fn backend_name(&self) -> &'static str {
        "headless"
    }

    fn graphics_queue_count(&self) -> u32 {
        self.config.queue_count
    }

    fn descriptor_capacity(&self, _kind: DescriptorKind) -> u32 {
        self.config.descriptor_capacity
    }

    fn texture_row_pitch_alignment(&self) -> u64 {
        self.config.row_pitch_alignment
    }

    fn create_queue(&self, queue_index: u32, _name: &str) -> GfxResult<HeadlessQueue> {
        if queue_index >= self.config.queue_count {
            return Err(GfxError::QueueNotFound(format!("graphics queue {queue_index}")));
        }
        let mut state = self.state.lock();
        state.timelines.push(HeadlessTimeline::default());
        Ok(HeadlessQueue {
            state: self.state.clone(),
            index: state.timelines.len() - 1,
        })
    }

    fn create_command_list(&self, queue: &HeadlessQueue, name: &str) -> GfxResult<HeadlessCommandList> {
        Ok(HeadlessCommandList {
            state: self.state.clone(),
            queue_index: queue.index,
            name: name.to_string(),
            recording: false,
            commands: Vec::new(),
            last_submitted: Cell::new(0),
        })
    }

    fn create_semaphore(&self, _name: &str) -> GfxResult<HeadlessSemaphore> {
        Ok(HeadlessSemaphore {
            _id: self.state.lock().alloc_id(),
        })
    }

    fn create_buffer(&self, desc: &BufferDesc) -> GfxResult<HeadlessBuffer> {
        if desc.size == 0 {
            return Err(GfxError::BufferCreateFailed(format!("buffer {} has zero size", desc.name)));
        }
        let storage: Option<Box<[UnsafeCell<u8>]>> = desc.ty.is_host_visible().then(|| (0..desc.size).map(|_| UnsafeCell::new(0u8)).collect());
        let mut state = self.state.lock();
        state.live_buffers += 1;
        Ok(HeadlessBuffer {
            id: state.alloc_id(),
            size: desc.size,
            storage,
        })
    }

    fn create_texture(&self, desc: &TextureDesc) -> GfxResult<HeadlessTexture> {
        if desc.extent.is_zero() {
            return Err(GfxError::ImageCreateFailed(format!("texture {} has zero extent", desc.name)));
        }
        let mut state = self.state.lock();
        state.live_textures += 1;
        if desc.format.is_depth() {
            state.depth_creations += 1;
        }
        Ok(HeadlessTexture {
            id: state.alloc_id(),
            extent: desc.extent,
            format: desc.format,
        })
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> GfxResult<HeadlessSampler> {
        let mut state = self.state.lock();
        state.live_samplers += 1;
        Ok(HeadlessSampler { id: state.alloc_id() })
    }

    fn create_shader(&self, desc: &ShaderDesc<'_>) -> GfxResult<HeadlessShader> {
        let empty = match desc {
            ShaderDesc::Graphics(g) => g.vertex.is_empty() || g.fragment.is_empty(),
            ShaderDesc::Compute(c) => c.code.is_empty(),
        };
        if empty {
            return Err(GfxError::ShaderCreateFailed(format!("shader {} has empty bytecode", desc.name())));
        }
        let mut state = self.state.lock();
        state.live_shaders += 1;
        Ok(HeadlessShader {
            id: state.alloc_id(),
            kind: desc.kind(),
        })
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> GfxResult<HeadlessSwapchain> {
        if desc.extent.is_zero() {
            return Err(GfxError::SwapchainCreateFailed("zero extent".to_string()));
        }
        let mut state = self.state.lock();
        state.swapchain_creations += 1;
        let images = HeadlessSwapchain::build_images(&mut state, desc);
        Ok(HeadlessSwapchain {
            state: self.state.clone(),
            desc: *desc,
            images,
            next_image: 0,
        })
    }

    fn recreate_swapchain(&self, swapchain: &mut HeadlessSwapchain, desc: &SwapchainDesc) -> GfxResult<()> {
        if desc.extent.is_zero() {
            return Err(GfxError::SwapchainCreateFailed("zero extent".to_string()));
        }
        let mut state = self.state.lock();
        state.swapchain_creations += 1;
        swapchain.images = HeadlessSwapchain::build_images(&mut state, desc);
        swapchain.desc = *desc;
        swapchain.next_image = 0;
        Ok(())
    }

    fn write_descriptor(&self, slot: DescriptorSlot, write: DescriptorWrite<'_, Self>) {
        debug_assert_eq!(slot.kind, write.kind());
        let id = match write {
            DescriptorWrite::SampledImage(texture) | DescriptorWrite::StorageImage(texture) => texture.id,
            DescriptorWrite::StorageBuffer(buffer) | DescriptorWrite::ConstantBuffer(buffer) => buffer.id,
            DescriptorWrite::Sampler(sampler) => sampler.id,
        };
        self.state.lock().descriptor_writes.push((slot, id));
    }

    fn destroy_buffer(&self, _buffer: HeadlessBuffer) {
        self.state.lock().live_buffers -= 1;
    }

    fn destroy_texture(&self, _texture: HeadlessTexture) {
        self.state.lock().live_textures -= 1;
    }

    fn destroy_sampler(&self, _sampler: HeadlessSampler) {
        self.state.lock().live_samplers -= 1;
    }

    fn destroy_shader(&self, _shader: HeadlessShader) {
        self.state.lock().live_shaders -= 1;
    }

    fn destroy_command_list(&self, _command_list: HeadlessCommandList) {}

    fn destroy_semaphore(&self, _semaphore: HeadlessSemaphore) {}

    fn destroy_queue(&self, _queue: HeadlessQueue) {}

    fn destroy_swapchain(&self, _swapchain: HeadlessSwapchain) {}

    fn wait_idle(&self) -> GfxResult<()> {
        let state = self.state.lock();
        if state.timelines.iter().any(|t| t.completed < t.submitted) {
            return Err(GfxError::DeviceWaitFailed("headless timeline has pending work".to_string()));
        }
        Ok(())
    }

    fn destroy(self) {
        let mut state = self.state.lock();
        if state.live_buffers != 0 || state.live_textures != 0 || state.live_samplers != 0 || state.live_shaders != 0
        {
            log::warn!(
                "headless device destroyed with live objects: buffers {}, textures {}, samplers {}, shaders {}",
                state.live_buffers,
                state.live_textures,
                state.live_samplers,
                state.live_shaders
            );
        }
        state.destroyed = true;
        log::info!("headless device destroyed");
    }
}
