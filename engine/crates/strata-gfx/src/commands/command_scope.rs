use std::borrow::Cow;

use itertools::Itertools;

use crate::backend::{
    BufferBarrier, BufferCopyRegion, BufferTextureCopyRegion, ColorAttachment, DepthAttachment, ImageBarrier, LoadOp,
    RenderingDesc, RhiBuffer, RhiCommandList, RhiDevice, RhiTexture,
};
use crate::basic::types::{ClearColor, Extent2D, IndexType, Rect2D, Viewport};
use crate::commands::barrier_batch::BarrierBatch;
use crate::commands::command_recorder::CommandRecorder;
use crate::context::ContextShared;
use crate::error::{GfxError, GfxResult};
use crate::frame::swapchain::Swapchain;
use crate::handles::{BufferHandle, BufferLocation, ImageHandle, ShaderHandle};
use crate::resources::buffer::{BufferDesc, BufferType};
use crate::resources::registry::ResourceRegistry;
use crate::resources::sampler::Filter;
use crate::resources::shader::PUSH_CONSTANT_SIZE;
use crate::sync::resource_state::{BufferState, ImageLayout, ImageState};
use crate::sync::state_tracker::{BufferBarrierDesc, ImageBarrierDesc, ResourceStateTracker};

/// `update_buffer` 单次允许的最大数据量
pub const MAX_INLINE_UPDATE_SIZE: usize = 65536;

/// 以句柄的形式录制命令
///
/// 由 `Context::begin_frame` 或 `begin_transfer` 返回，借用了当前帧（或传输作用域）的 recorder。
/// 所有的状态转换都通过资源记录中保存的当前状态计算 barrier，并立即录制。
///
/// - 帧作用域中可以访问 swapchain 相关的命令
/// - 传输作用域中可以使用 staging 上传（`upload_buffer` / `upload_texture`）
pub struct CommandScope<'a, D: RhiDevice> {
    shared: &'a ContextShared<D>,
    recorder: &'a mut CommandRecorder<D>,
    swapchain: Option<&'a mut Swapchain<D>>,
    staging: Option<&'a mut Vec<D::Buffer>>,
}

// new & init
impl<'a, D: RhiDevice> CommandScope<'a, D> {
    pub(crate) fn new(
        shared: &'a ContextShared<D>,
        recorder: &'a mut CommandRecorder<D>,
        swapchain: Option<&'a mut Swapchain<D>>,
        staging: Option<&'a mut Vec<D::Buffer>>,
    ) -> Self {
        Self {
            shared,
            recorder,
            swapchain,
            staging,
        }
    }
}

// tools
impl<D: RhiDevice> CommandScope<'_, D> {
    fn swapchain_parts(&mut self) -> (&mut CommandRecorder<D>, &mut Swapchain<D>) {
        match self.swapchain.as_deref_mut() {
            Some(swapchain) => (&mut *self.recorder, swapchain),
            None => panic!("swapchain commands are only available inside a frame"),
        }
    }

    fn transfer_parts(&mut self) -> (&mut CommandRecorder<D>, &mut Vec<D::Buffer>) {
        match self.staging.as_deref_mut() {
            Some(staging) => (&mut *self.recorder, staging),
            None => panic!("uploads are only available inside a transfer scope"),
        }
    }

    fn image_transition(registry: &mut ResourceRegistry<D>, handle: ImageHandle, new: ImageState) -> ImageBarrierDesc {
        let record = registry.texture_mut(handle);
        ResourceStateTracker::transition_image(&mut record.state, new, record.desc.format)
    }

    fn buffer_transition(registry: &mut ResourceRegistry<D>, handle: BufferHandle, new: BufferState) -> BufferBarrierDesc {
        let record = registry.buffer_mut(handle);
        ResourceStateTracker::transition_buffer(&mut record.state, new)
    }

    /// 创建 staging buffer 并写入数据，staging 在传输作用域结束时释放
    fn stage<'s>(device: &D, staging: &'s mut Vec<D::Buffer>, data: &[u8], name: &str) -> GfxResult<&'s D::Buffer> {
        assert!(!data.is_empty(), "upload of empty data");
        let buffer = device.create_buffer(&BufferDesc::new(data.len() as u64, BufferType::Staging, name))?;
        let Some(ptr) = buffer.mapped_ptr() else {
            device.destroy_buffer(buffer);
            return Err(GfxError::BufferMapFailed(format!("staging buffer {name} is not host visible")));
        };
        // SAFETY: staging buffer 刚刚创建，大小等于 data 的长度，且 GPU 还没有访问它
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len());
        }
        staging.push(buffer);
        Ok(&staging[staging.len() - 1])
    }

    /// 按后端要求的行跨度重新排列紧密排列的像素数据，跨度相同时不拷贝
    fn pitch_rows(data: &[u8], row_bytes: usize, row_pitch: usize) -> Cow<'_, [u8]> {
        if row_bytes == row_pitch || row_bytes == 0 {
            return Cow::Borrowed(data);
        }
        let mut pitched = vec![0u8; data.len() / row_bytes * row_pitch];
        for (src, dst) in data.chunks_exact(row_bytes).zip(pitched.chunks_exact_mut(row_pitch)) {
            dst[..row_bytes].copy_from_slice(src);
        }
        Cow::Owned(pitched)
    }

    /// 附件布局：带 stencil 的深度格式使用 DepthStencilAttachment
    fn depth_attachment_state(has_stencil: bool) -> ImageState {
        if has_stencil { ImageState::DEPTH_STENCIL_ATTACHMENT } else { ImageState::DEPTH_ATTACHMENT }
    }
}

// 状态转换
impl<D: RhiDevice> CommandScope<'_, D> {
    pub fn transition_image(&mut self, handle: ImageHandle, layout: ImageLayout) -> ImageBarrierDesc {
        self.transition_image_state(handle, ImageState::for_layout(layout))
    }

    pub fn transition_image_state(&mut self, handle: ImageHandle, new: ImageState) -> ImageBarrierDesc {
        let mut registry = self.shared.registry.lock();
        let record = registry.texture_mut(handle);
        self.recorder.transition_image(&record.texture, &mut record.state, new)
    }

    pub fn transition_buffer(&mut self, handle: BufferHandle, new: BufferState) -> BufferBarrierDesc {
        let mut registry = self.shared.registry.lock();
        let record = registry.buffer_mut(handle);
        self.recorder.transition_buffer(&record.buffer, &mut record.state, new)
    }

    /// 多个 image 的状态转换，作为一次 barrier 调用录制
    pub fn transition_images(&mut self, transitions: &[(ImageHandle, ImageLayout)]) {
        let _span = tracy_client::span!("CommandScope::transition_images");
        let mut registry = self.shared.registry.lock();
        let descs = transitions
            .iter()
            .map(|&(handle, layout)| Self::image_transition(&mut registry, handle, ImageState::for_layout(layout)))
            .collect_vec();

        let mut batch = BarrierBatch::new();
        batch.images = transitions
            .iter()
            .zip(descs)
            .map(|(&(handle, _), desc)| ImageBarrier {
                texture: registry.texture(handle).texture(),
                desc,
            })
            .collect();
        self.recorder.flush_barriers(batch);
    }

    /// 当前 swapchain image 的状态转换
    pub fn transition_swapchain_image(&mut self, layout: ImageLayout) -> ImageBarrierDesc {
        let (recorder, swapchain) = self.swapchain_parts();
        swapchain.transition_current(recorder, ImageState::for_layout(layout))
    }
}

// rendering
impl<D: RhiDevice> CommandScope<'_, D> {
    /// 以当前 swapchain image 与深度图作为附件开始渲染，同时将 viewport 与 scissor 设置为整个 swapchain
    ///
    /// `load_previous` 为 false 时清空为黑色，深度清空为 1.0
    pub fn begin_rendering_swapchain(&mut self, load_previous: bool) {
        let (recorder, swapchain) = self.swapchain_parts();
        swapchain.transition_current(recorder, ImageState::COLOR_ATTACHMENT);
        let depth_state = Self::depth_attachment_state(swapchain.depth_format().has_stencil());
        swapchain.transition_depth(recorder, depth_state);

        let extent = swapchain.extent();
        let (color_load, depth_load) =
            if load_previous { (LoadOp::Load, LoadOp::Load) } else { (LoadOp::Clear(ClearColor::BLACK), LoadOp::Clear(1.0)) };
        recorder.cmd().begin_rendering(&RenderingDesc {
            area: Rect2D::from_extent(extent),
            colors: vec![ColorAttachment {
                texture: swapchain.current_image(),
                load: color_load,
            }],
            depth: Some(DepthAttachment {
                texture: swapchain.depth(),
                load: depth_load,
            }),
        });
        recorder.set_in_rendering(true);
        recorder.cmd().set_viewport(&Viewport::from_extent(extent));
        recorder.cmd().set_scissor(&Rect2D::from_extent(extent));
    }

    /// 以指定的 image 作为附件开始渲染，渲染区域为第一个附件的尺寸
    pub fn begin_rendering(&mut self, colors: &[ImageHandle], depth: Option<ImageHandle>, clear: Option<ClearColor>) {
        assert!(!colors.is_empty() || depth.is_some(), "rendering without attachments");
        let shared = self.shared;
        let mut registry = shared.registry.lock();

        let mut transitions = colors
            .iter()
            .map(|&handle| (handle, Self::image_transition(&mut registry, handle, ImageState::COLOR_ATTACHMENT)))
            .collect_vec();
        if let Some(handle) = depth {
            let state = Self::depth_attachment_state(registry.texture(handle).desc().format.has_stencil());
            transitions.push((handle, Self::image_transition(&mut registry, handle, state)));
        }
        let barriers = transitions
            .iter()
            .map(|&(handle, desc)| ImageBarrier {
                texture: registry.texture(handle).texture(),
                desc,
            })
            .collect_vec();
        self.recorder.emit_barriers(&barriers, &[]);

        let extent = barriers[0].texture.extent();
        let color_load = clear.map_or(LoadOp::Load, LoadOp::Clear);
        let depth_load = if clear.is_some() { LoadOp::Clear(1.0) } else { LoadOp::Load };
        self.recorder.cmd().begin_rendering(&RenderingDesc {
            area: Rect2D::from_extent(extent),
            colors: colors
                .iter()
                .map(|&handle| ColorAttachment {
                    texture: registry.texture(handle).texture(),
                    load: color_load,
                })
                .collect(),
            depth: depth.map(|handle| DepthAttachment {
                texture: registry.texture(handle).texture(),
                load: depth_load,
            }),
        });
        self.recorder.set_in_rendering(true);
    }

    pub fn end_rendering(&mut self) {
        assert!(self.recorder.in_rendering(), "end_rendering without begin_rendering");
        self.recorder.cmd().end_rendering();
        self.recorder.set_in_rendering(false);
    }

    #[inline]
    pub fn set_viewport(&mut self, viewport: &Viewport) {
        self.recorder.cmd().set_viewport(viewport);
    }

    #[inline]
    pub fn set_scissor(&mut self, scissor: &Rect2D) {
        self.recorder.cmd().set_scissor(scissor);
    }
}

// 绑定
impl<D: RhiDevice> CommandScope<'_, D> {
    pub fn bind_shader(&mut self, handle: ShaderHandle) {
        let registry = self.shared.registry.lock();
        self.recorder.cmd().bind_shader(registry.shader(handle));
        self.recorder.set_bound_shader(handle);
    }

    /// 向当前绑定的 shader 写入 push constant，数据不超过 128 字节
    pub fn push_constant<T: bytemuck::Pod>(&mut self, value: &T) {
        self.push_constant_bytes(0, bytemuck::bytes_of(value));
    }

    pub fn push_constant_bytes(&mut self, offset: u32, data: &[u8]) {
        assert!(
            offset as usize + data.len() <= PUSH_CONSTANT_SIZE as usize,
            "push constant range {}..{} exceeds {} bytes",
            offset,
            offset as usize + data.len(),
            PUSH_CONSTANT_SIZE
        );
        let Some(handle) = self.recorder.bound_shader() else {
            panic!("push_constant without a bound shader");
        };
        let registry = self.shared.registry.lock();
        self.recorder.cmd().push_constants(registry.shader(handle), offset, data);
    }

    pub fn bind_index_buffer(&mut self, handle: BufferHandle, offset: u64, index_type: IndexType) {
        let registry = self.shared.registry.lock();
        let record = registry.buffer(handle);
        debug_assert_eq!(record.desc().ty, BufferType::Index, "buffer {} is not an index buffer", record.desc().name);
        self.recorder.cmd().bind_index_buffer(record.buffer(), offset, index_type);
    }
}

// draw & dispatch
impl<D: RhiDevice> CommandScope<'_, D> {
    #[inline]
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.recorder.cmd().draw(vertex_count, instance_count, first_vertex, first_instance);
    }

    #[inline]
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.recorder.cmd().draw_indexed(index_count, instance_count, first_index, vertex_offset, first_instance);
    }

    pub fn draw_indexed_indirect(&mut self, handle: BufferHandle, offset: u64, draw_count: u32, stride: u32) {
        let registry = self.shared.registry.lock();
        self.recorder.cmd().draw_indexed_indirect(registry.buffer(handle).buffer(), offset, draw_count, stride);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn draw_indexed_indirect_count(
        &mut self,
        handle: BufferHandle,
        offset: u64,
        count_handle: BufferHandle,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    ) {
        let registry = self.shared.registry.lock();
        self.recorder.cmd().draw_indexed_indirect_count(
            registry.buffer(handle).buffer(),
            offset,
            registry.buffer(count_handle).buffer(),
            count_offset,
            max_draw_count,
            stride,
        );
    }

    #[inline]
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.recorder.cmd().dispatch(x, y, z);
    }
}

// clear
impl<D: RhiDevice> CommandScope<'_, D> {
    /// General → clear → ColorAttachment
    pub fn clear_image(&mut self, handle: ImageHandle, color: ClearColor) {
        let shared = self.shared;
        let mut registry = shared.registry.lock();
        debug_assert!(!registry.texture(handle).desc().format.is_depth(), "clear_image on a depth image");

        let desc = Self::image_transition(&mut registry, handle, ImageState::GENERAL);
        let texture = registry.texture(handle).texture();
        self.recorder.emit_barriers(&[ImageBarrier { texture, desc }], &[]);
        self.recorder.cmd().clear_color(texture, color);

        let desc = Self::image_transition(&mut registry, handle, ImageState::COLOR_ATTACHMENT);
        self.recorder.emit_barriers(&[ImageBarrier { texture: registry.texture(handle).texture(), desc }], &[]);
    }

    /// General → clear → DepthAttachment
    pub fn clear_depth_image(&mut self, handle: ImageHandle, depth: f32) {
        let shared = self.shared;
        let mut registry = shared.registry.lock();
        let has_stencil = registry.texture(handle).desc().format.has_stencil();

        let desc = Self::image_transition(&mut registry, handle, ImageState::GENERAL);
        let texture = registry.texture(handle).texture();
        self.recorder.emit_barriers(&[ImageBarrier { texture, desc }], &[]);
        self.recorder.cmd().clear_depth(texture, depth);

        let desc = Self::image_transition(&mut registry, handle, Self::depth_attachment_state(has_stencil));
        self.recorder.emit_barriers(&[ImageBarrier { texture: registry.texture(handle).texture(), desc }], &[]);
    }

    pub fn clear_swapchain_image(&mut self, color: ClearColor) {
        let (recorder, swapchain) = self.swapchain_parts();
        swapchain.transition_current(recorder, ImageState::GENERAL);
        recorder.cmd().clear_color(swapchain.current_image(), color);
        swapchain.transition_current(recorder, ImageState::COLOR_ATTACHMENT);
    }
}

// copy & blit
impl<D: RhiDevice> CommandScope<'_, D> {
    /// src → TransferSrc，dst → TransferDst，之后拷贝整个 mip 0
    pub fn copy_image(&mut self, src: ImageHandle, dst: ImageHandle) {
        assert_ne!(src, dst, "copy_image with the same image");
        let shared = self.shared;
        let mut registry = shared.registry.lock();
        let src_desc = Self::image_transition(&mut registry, src, ImageState::TRANSFER_SRC);
        let dst_desc = Self::image_transition(&mut registry, dst, ImageState::TRANSFER_DST);

        let src_texture = registry.texture(src).texture();
        let dst_texture = registry.texture(dst).texture();
        debug_assert_eq!(src_texture.extent(), dst_texture.extent(), "copy_image extent mismatch");
        self.recorder.emit_barriers(
            &[
                ImageBarrier {
                    texture: src_texture,
                    desc: src_desc,
                },
                ImageBarrier {
                    texture: dst_texture,
                    desc: dst_desc,
                },
            ],
            &[],
        );
        self.recorder.cmd().copy_texture(src_texture, dst_texture, src_texture.extent());
    }

    /// 整个 src 缩放到整个 dst
    pub fn blit_image(&mut self, src: ImageHandle, dst: ImageHandle, filter: Filter) {
        assert_ne!(src, dst, "blit_image with the same image");
        let shared = self.shared;
        let mut registry = shared.registry.lock();
        let src_desc = Self::image_transition(&mut registry, src, ImageState::TRANSFER_SRC);
        let dst_desc = Self::image_transition(&mut registry, dst, ImageState::TRANSFER_DST);

        let src_texture = registry.texture(src).texture();
        let dst_texture = registry.texture(dst).texture();
        self.recorder.emit_barriers(
            &[
                ImageBarrier {
                    texture: src_texture,
                    desc: src_desc,
                },
                ImageBarrier {
                    texture: dst_texture,
                    desc: dst_desc,
                },
            ],
            &[],
        );
        self.recorder.cmd().blit_texture(
            src_texture,
            dst_texture,
            Rect2D::from_extent(src_texture.extent()),
            Rect2D::from_extent(dst_texture.extent()),
            filter,
        );
    }

    pub fn copy_to_swapchain(&mut self, src: ImageHandle) {
        self.image_to_swapchain(src, None);
    }

    pub fn blit_to_swapchain(&mut self, src: ImageHandle, filter: Filter) {
        self.image_to_swapchain(src, Some(filter));
    }

    /// filter 为 None 时拷贝，否则 blit
    fn image_to_swapchain(&mut self, src: ImageHandle, filter: Option<Filter>) {
        let shared = self.shared;
        let mut registry = shared.registry.lock();
        let src_desc = Self::image_transition(&mut registry, src, ImageState::TRANSFER_SRC);
        let src_texture = registry.texture(src).texture();

        let (recorder, swapchain) = self.swapchain_parts();
        let (dst_texture, dst_state) = swapchain.current_image_mut();
        let dst_desc = ResourceStateTracker::transition_image(dst_state, ImageState::TRANSFER_DST, dst_texture.format());
        recorder.emit_barriers(
            &[
                ImageBarrier {
                    texture: src_texture,
                    desc: src_desc,
                },
                ImageBarrier {
                    texture: dst_texture,
                    desc: dst_desc,
                },
            ],
            &[],
        );

        match filter {
            None => {
                let extent = Extent2D::new(
                    src_texture.extent().width.min(dst_texture.extent().width),
                    src_texture.extent().height.min(dst_texture.extent().height),
                );
                recorder.cmd().copy_texture(src_texture, dst_texture, extent);
            }
            Some(filter) => recorder.cmd().blit_texture(
                src_texture,
                dst_texture,
                Rect2D::from_extent(src_texture.extent()),
                Rect2D::from_extent(dst_texture.extent()),
                filter,
            ),
        }
    }

    /// src → TransferSrc，dst → TransferDst，之后按 regions 拷贝
    pub fn copy_buffer(&mut self, src: BufferHandle, dst: BufferHandle, regions: &[BufferCopyRegion]) {
        assert_ne!(src, dst, "copy_buffer with the same buffer");
        let shared = self.shared;
        let mut registry = shared.registry.lock();
        let src_desc = Self::buffer_transition(&mut registry, src, BufferState::TRANSFER_SRC);
        let dst_desc = Self::buffer_transition(&mut registry, dst, BufferState::TRANSFER_DST);

        let src_buffer = registry.buffer(src).buffer();
        let dst_buffer = registry.buffer(dst).buffer();
        debug_assert!(regions.iter().all(|r| r.src_offset + r.size <= src_buffer.size()), "copy_buffer src out of range");
        debug_assert!(regions.iter().all(|r| r.dst_offset + r.size <= dst_buffer.size()), "copy_buffer dst out of range");
        self.recorder.emit_barriers(
            &[],
            &[
                BufferBarrier {
                    buffer: src_buffer,
                    desc: src_desc,
                },
                BufferBarrier {
                    buffer: dst_buffer,
                    desc: dst_desc,
                },
            ],
        );
        self.recorder.cmd().copy_buffer(src_buffer, dst_buffer, regions);
    }

    /// 在命令流中内联更新 buffer 的一小段数据
    pub fn update_buffer(&mut self, handle: BufferHandle, offset: u64, data: &[u8]) {
        assert!(data.len() <= MAX_INLINE_UPDATE_SIZE, "update_buffer data exceeds {} bytes", MAX_INLINE_UPDATE_SIZE);
        let shared = self.shared;
        let mut registry = shared.registry.lock();
        let desc = Self::buffer_transition(&mut registry, handle, BufferState::TRANSFER_DST);
        let buffer = registry.buffer(handle).buffer();
        debug_assert!(offset + data.len() as u64 <= buffer.size(), "update_buffer out of range");
        self.recorder.emit_barriers(&[], &[BufferBarrier { buffer, desc }]);
        self.recorder.cmd().update_buffer(buffer, offset, data);
    }

    /// 拷贝 image 的 mip 0 到 buffer。目标为 readback buffer 时，之后转换到 host 可读
    pub fn copy_image_to_buffer(&mut self, src: ImageHandle, dst: BufferHandle) {
        let shared = self.shared;
        let mut registry = shared.registry.lock();
        let image_desc = Self::image_transition(&mut registry, src, ImageState::TRANSFER_SRC);
        let buffer_desc = Self::buffer_transition(&mut registry, dst, BufferState::TRANSFER_DST);

        let row_pitch = registry.texture(src).desc().row_pitch(shared.device.texture_row_pitch_alignment());
        let texture = registry.texture(src).texture();
        let buffer = registry.buffer(dst).buffer();
        debug_assert!(row_pitch * texture.extent().height as u64 <= buffer.size(), "readback buffer too small");
        self.recorder.emit_barriers(
            &[ImageBarrier {
                texture,
                desc: image_desc,
            }],
            &[BufferBarrier {
                buffer,
                desc: buffer_desc,
            }],
        );
        self.recorder.cmd().copy_texture_to_buffer(
            texture,
            buffer,
            &BufferTextureCopyRegion {
                buffer_offset: 0,
                row_pitch,
                extent: texture.extent(),
                mip_level: 0,
            },
        );

        if dst.location == BufferLocation::Readback {
            let desc = Self::buffer_transition(&mut registry, dst, BufferState::HOST_READ);
            self.recorder.emit_barriers(
                &[],
                &[BufferBarrier {
                    buffer: registry.buffer(dst).buffer(),
                    desc,
                }],
            );
        }
    }
}

// upload，只在传输作用域中可用
impl<D: RhiDevice> CommandScope<'_, D> {
    /// 通过 staging buffer 将数据写入 buffer 的 `offset` 处
    pub fn upload_buffer(&mut self, handle: BufferHandle, offset: u64, data: &[u8]) -> GfxResult<()> {
        let _span = tracy_client::span!("CommandScope::upload_buffer");
        let shared = self.shared;
        let (recorder, staging) = self.transfer_parts();
        let src = Self::stage(&shared.device, staging, data, "staging-buffer")?;

        let mut registry = shared.registry.lock();
        let desc = Self::buffer_transition(&mut registry, handle, BufferState::TRANSFER_DST);
        let dst = registry.buffer(handle).buffer();
        assert!(offset + data.len() as u64 <= dst.size(), "upload_buffer out of range");
        recorder.emit_barriers(&[], &[BufferBarrier { buffer: dst, desc }]);
        recorder.cmd().copy_buffer(
            src,
            dst,
            &[BufferCopyRegion {
                src_offset: 0,
                dst_offset: offset,
                size: data.len() as u64,
            }],
        );
        Ok(())
    }

    /// 上传 mip 0 的数据：→ TransferDst，拷贝，之后 sampled image → ShaderReadOnly，storage image → General
    pub fn upload_texture(&mut self, handle: ImageHandle, data: &[u8]) -> GfxResult<()> {
        let _span = tracy_client::span!("CommandScope::upload_texture");
        let shared = self.shared;
        let alignment = shared.device.texture_row_pitch_alignment();
        let (expected_size, usage, row_bytes, row_pitch) = {
            let registry = shared.registry.lock();
            let desc = registry.texture(handle).desc();
            let row_bytes = desc.extent.width as u64 * desc.format.bytes_per_pixel() as u64;
            (desc.base_level_size(), desc.usage, row_bytes, desc.row_pitch(alignment))
        };
        assert_eq!(data.len() as u64, expected_size, "upload_texture data size mismatch");

        let pitched = Self::pitch_rows(data, row_bytes as usize, row_pitch as usize);
        let (recorder, staging) = self.transfer_parts();
        let src = Self::stage(&shared.device, staging, &pitched, "staging-texture")?;

        let mut registry = shared.registry.lock();

        let desc = Self::image_transition(&mut registry, handle, ImageState::TRANSFER_DST);
        let texture = registry.texture(handle).texture();
        recorder.emit_barriers(&[ImageBarrier { texture, desc }], &[]);
        recorder.cmd().copy_buffer_to_texture(
            src,
            texture,
            &BufferTextureCopyRegion {
                buffer_offset: 0,
                row_pitch,
                extent: texture.extent(),
                mip_level: 0,
            },
        );

        let final_state = if usage.is_sampled() { ImageState::SHADER_READ } else { ImageState::GENERAL };
        let desc = Self::image_transition(&mut registry, handle, final_state);
        recorder.emit_barriers(
            &[ImageBarrier {
                texture: registry.texture(handle).texture(),
                desc,
            }],
            &[],
        );
        Ok(())
    }
}

// debug label & getters
impl<D: RhiDevice> CommandScope<'_, D> {
    #[inline]
    pub fn begin_label(&mut self, label: &str, color: [f32; 4]) {
        self.recorder.cmd().begin_label(label, color);
    }

    #[inline]
    pub fn end_label(&mut self) {
        self.recorder.cmd().end_label();
    }

    #[inline]
    pub fn recorder(&mut self) -> &mut CommandRecorder<D> {
        self.recorder
    }

    #[inline]
    pub fn is_frame(&self) -> bool {
        self.swapchain.is_some()
    }

    #[inline]
    pub fn is_transfer(&self) -> bool {
        self.staging.is_some()
    }

    /// 当前帧的 swapchain 尺寸
    #[inline]
    pub fn swapchain_extent(&self) -> Option<Extent2D> {
        self.swapchain.as_deref().map(|swapchain| swapchain.extent())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessCommand, HeadlessConfig, HeadlessDevice};
    use crate::basic::format::TextureFormat;
    use crate::handles::ImageUsage;
    use crate::resources::shader::{GraphicsShaderDesc, ShaderDesc};
    use crate::resources::texture::TextureDesc;
    use crate::test_utils::headless_context;

    fn image_barrier_count(command: &HeadlessCommand) -> Option<usize> {
        match command {
            HeadlessCommand::Barrier { images, .. } => Some(images.len()),
            _ => None,
        }
    }

    #[test]
    fn test_swapchain_pass() {
        let (mut ctx, probe) = headless_context(HeadlessConfig::default());
        let shader = ctx
            .create_shader(&ShaderDesc::Graphics(GraphicsShaderDesc::new("triangle", &[1, 2, 3, 4], &[5, 6, 7, 8])))
            .unwrap();
        {
            let mut cmd = ctx.begin_frame().unwrap();
            cmd.begin_rendering_swapchain(false);
            cmd.bind_shader(shader);
            cmd.push_constant(&[1.0f32, 0.0, 0.0, 1.0]);
            cmd.draw(3, 1, 0, 0);
            cmd.end_rendering();
        }
        ctx.end_frame().unwrap();

        let commands = probe.last_submission().unwrap().commands;
        assert_eq!(image_barrier_count(&commands[0]), Some(1));
        assert_eq!(image_barrier_count(&commands[1]), Some(1));
        assert!(matches!(&commands[2], HeadlessCommand::BeginRendering { colors, depth: Some(_) } if colors.len() == 1));
        assert!(matches!(commands[3], HeadlessCommand::SetViewport(_)));
        assert!(matches!(commands[4], HeadlessCommand::SetScissor(_)));
        assert!(matches!(commands[5], HeadlessCommand::BindShader(_)));
        assert!(matches!(commands[6], HeadlessCommand::PushConstants { offset: 0, size: 16, .. }));
        assert!(matches!(commands[7], HeadlessCommand::Draw { vertex_count: 3, instance_count: 1 }));
        assert!(matches!(commands[8], HeadlessCommand::EndRendering));
        assert_eq!(commands.len(), 10);
        ctx.destroy();
    }

    #[test]
    fn test_offscreen_rendering_transitions_attachments() {
        let (mut ctx, probe) = headless_context(HeadlessConfig::default());
        let color = ctx
            .create_texture(&TextureDesc::new_2d(16, 16, TextureFormat::Rgba16Float, ImageUsage::SampledReadWrite))
            .unwrap();
        let depth = ctx.create_texture(&TextureDesc::new_2d(16, 16, TextureFormat::D32Float, ImageUsage::Temporary)).unwrap();
        {
            let mut cmd = ctx.begin_frame().unwrap();
            cmd.begin_rendering(&[color], Some(depth), Some(ClearColor::TRANSPARENT));
            cmd.end_rendering();
            cmd.transition_image(color, ImageLayout::ShaderReadOnly);
        }
        ctx.end_frame().unwrap();

        let commands = probe.last_submission().unwrap().commands;
        // color 与 depth 的转换合并为一次 barrier
        assert_eq!(image_barrier_count(&commands[0]), Some(2));
        assert!(matches!(&commands[1], HeadlessCommand::BeginRendering { colors, depth: Some(_) } if colors.len() == 1));
        assert_eq!(ctx.shared().image_state(depth), ImageState::DEPTH_ATTACHMENT);
        assert_eq!(ctx.shared().image_state(color), ImageState::SHADER_READ);
        ctx.destroy();
    }

    #[test]
    fn test_copy_and_clear_image() {
        let (mut ctx, probe) = headless_context(HeadlessConfig::default());
        let desc = TextureDesc::new_2d(8, 8, TextureFormat::Rgba8Unorm, ImageUsage::ReadWrite);
        let src = ctx.create_texture(&desc).unwrap();
        let dst = ctx.create_texture(&desc).unwrap();
        {
            let mut cmd = ctx.begin_frame().unwrap();
            cmd.clear_image(src, ClearColor::BLACK);
            cmd.copy_image(src, dst);
            cmd.copy_to_swapchain(dst);
        }
        ctx.end_frame().unwrap();

        let commands = probe.last_submission().unwrap().commands;
        assert_eq!(image_barrier_count(&commands[0]), Some(1));
        assert!(matches!(commands[1], HeadlessCommand::ClearColor { .. }));
        assert_eq!(image_barrier_count(&commands[2]), Some(1));
        assert_eq!(image_barrier_count(&commands[3]), Some(2));
        assert!(matches!(commands[4], HeadlessCommand::CopyTexture { .. }));
        assert_eq!(image_barrier_count(&commands[5]), Some(2));
        assert!(matches!(commands[6], HeadlessCommand::CopyTexture { .. }));

        assert_eq!(ctx.shared().image_state(src), ImageState::TRANSFER_SRC);
        assert_eq!(ctx.shared().image_state(dst), ImageState::TRANSFER_SRC);
        ctx.destroy();
    }

    #[test]
    fn test_batched_transitions() {
        let (mut ctx, probe) = headless_context(HeadlessConfig::default());
        let desc = TextureDesc::new_2d(8, 8, TextureFormat::Rgba8Unorm, ImageUsage::Sampled);
        let a = ctx.create_texture(&desc).unwrap();
        let b = ctx.create_texture(&desc).unwrap();
        {
            let mut cmd = ctx.begin_frame().unwrap();
            cmd.transition_images(&[(a, ImageLayout::TransferDst), (b, ImageLayout::ShaderReadOnly)]);
        }
        ctx.end_frame().unwrap();

        let commands = probe.last_submission().unwrap().commands;
        assert_eq!(image_barrier_count(&commands[0]), Some(2));
        assert_eq!(ctx.shared().image_state(a), ImageState::TRANSFER_DST);
        assert_eq!(ctx.shared().image_state(b), ImageState::SHADER_READ);
        ctx.destroy();
    }

    #[test]
    fn test_readback_copy_ends_host_readable() {
        let (mut ctx, _probe) = headless_context(HeadlessConfig::default());
        let image = ctx.create_texture(&TextureDesc::new_2d(4, 4, TextureFormat::Rgba8Unorm, ImageUsage::ReadWrite)).unwrap();
        let readback = ctx.create_buffer(&BufferDesc::new(64, BufferType::Readback, "readback")).unwrap();
        {
            let mut cmd = ctx.begin_frame().unwrap();
            cmd.copy_image_to_buffer(image, readback);
        }
        ctx.end_frame().unwrap();
        assert_eq!(ctx.shared().buffer_state(readback), BufferState::HOST_READ);
        ctx.destroy();
    }

    #[test]
    fn test_pitch_rows() {
        let data = [1u8, 2, 3, 4, 5, 6];
        assert!(matches!(CommandScope::<HeadlessDevice>::pitch_rows(&data, 3, 3), Cow::Borrowed(_)));

        let pitched = CommandScope::<HeadlessDevice>::pitch_rows(&data, 3, 4);
        assert_eq!(&*pitched, &[1, 2, 3, 0, 4, 5, 6, 0]);
    }

    #[test]
    #[should_panic(expected = "push_constant without a bound shader")]
    fn test_push_constant_requires_shader() {
        let (mut ctx, _probe) = headless_context(HeadlessConfig::default());
        let mut cmd = ctx.begin_frame().unwrap();
        cmd.push_constant(&0u32);
    }

    #[test]
    #[should_panic(expected = "exceeds 128 bytes")]
    fn test_push_constant_size_limit() {
        let (mut ctx, _probe) = headless_context(HeadlessConfig::default());
        let mut cmd = ctx.begin_frame().unwrap();
        cmd.push_constant_bytes(0, &[0u8; 132]);
    }

    #[test]
    #[should_panic(expected = "only available inside a transfer scope")]
    fn test_upload_outside_transfer_panics() {
        let (mut ctx, _probe) = headless_context(HeadlessConfig::default());
        let buffer = ctx.create_buffer(&BufferDesc::new(16, BufferType::Storage, "ssbo")).unwrap();
        let mut cmd = ctx.begin_frame().unwrap();
        let _ = cmd.upload_buffer(buffer, 0, &[0u8; 16]);
    }

    #[test]
    #[should_panic(expected = "only available inside a frame")]
    fn test_swapchain_command_in_transfer_panics() {
        let (mut ctx, _probe) = headless_context(HeadlessConfig::default());
        let mut cmd = ctx.begin_transfer().unwrap();
        cmd.clear_swapchain_image(ClearColor::BLACK);
    }
}
