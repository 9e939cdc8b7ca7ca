use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use itertools::Itertools;
use strata_gfx::backend::{
    BufferBarrier, BufferCopyRegion, BufferTextureCopyRegion, ImageBarrier, LoadOp, RenderingDesc, RhiCommandList,
    RhiTexture,
};
use strata_gfx::basic::types::{ClearColor, Extent2D, IndexType, Rect2D, Viewport};
use strata_gfx::error::{GfxError, GfxResult};
use strata_gfx::resources::sampler::Filter;

use crate::convert;
use crate::foundation::device::DeviceFunctions;
use crate::pipelines::shader::VulkanShader;
use crate::resources::buffer::VulkanBuffer;
use crate::resources::texture::VulkanTexture;
use crate::vulkan_device::VulkanDevice;

/// 一个 command pool 与从中分配的唯一一个 primary command buffer
///
/// command pool 是和 queue family 绑定的，reset 时直接重置整个 pool。
pub struct VulkanCommandList {
    pool: vk::CommandPool,
    handle: vk::CommandBuffer,

    /// bind shader 时一同绑定的 bindless set
    bindless_set: vk::DescriptorSet,

    device: Arc<DeviceFunctions>,
    name: String,
}

// new & init
impl VulkanCommandList {
    pub fn new(
        device: Arc<DeviceFunctions>,
        queue_family_index: u32,
        bindless_set: vk::DescriptorSet,
        name: &str,
    ) -> GfxResult<Self> {
        let pool_ci = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let pool = unsafe { device.create_command_pool(&pool_ci, None) }
            .map_err(|e| GfxError::CommandPoolCreateFailed(format!("{name}: {e:?}")))?;
        device.set_object_debug_name(pool, format!("CommandPool::{name}"));

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let handle = match unsafe { device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe { device.destroy_command_pool(pool, None) };
                return Err(GfxError::CommandBufferCreateFailed(format!("{name}: {e:?}")));
            }
        };
        device.set_object_debug_name(handle, format!("CommandBuffer::{name}"));

        Ok(Self {
            pool,
            handle,
            bindless_set,
            device,
            name: name.to_string(),
        })
    }
}

// getters
impl VulkanCommandList {
    #[inline]
    pub fn vk_handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

// destroy
impl VulkanCommandList {
    /// command buffer 随 pool 一起释放
    pub fn destroy(self) {
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

// tools
impl VulkanCommandList {
    fn attachment_load_op<T>(load: &LoadOp<T>) -> vk::AttachmentLoadOp {
        match load {
            LoadOp::Load => vk::AttachmentLoadOp::LOAD,
            LoadOp::Clear(_) => vk::AttachmentLoadOp::CLEAR,
            LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }

    fn color_subresource(mip_level: u32) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    fn subresource_of(texture: &VulkanTexture, mip_level: u32) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: if texture.format().is_depth() {
                vk::ImageAspectFlags::DEPTH
            } else {
                vk::ImageAspectFlags::COLOR
            },
            ..Self::color_subresource(mip_level)
        }
    }

    fn buffer_image_copy(region: &BufferTextureCopyRegion, texture: &VulkanTexture) -> vk::BufferImageCopy2<'static> {
        // vk 的 row length 以 texel 为单位，0 表示紧密排列
        let bpp = texture.format().bytes_per_pixel() as u64;
        let tight = region.extent.width as u64 * bpp;
        let row_length = if region.row_pitch <= tight { 0 } else { (region.row_pitch / bpp) as u32 };
        vk::BufferImageCopy2::default()
            .buffer_offset(region.buffer_offset)
            .buffer_row_length(row_length)
            .buffer_image_height(0)
            .image_subresource(Self::subresource_of(texture, region.mip_level))
            .image_offset(vk::Offset3D::default())
            .image_extent(convert::extent_3d(region.extent))
    }
}

impl RhiCommandList<VulkanDevice> for VulkanCommandList {
    fn reset(&mut self) -> GfxResult<()> {
        unsafe { self.device.reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty()) }
            .map_err(|e| GfxError::CommandBeginFailed(format!("reset {}: {e:?}", self.name)))
    }

    fn begin(&mut self) -> GfxResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(self.handle, &begin_info) }
            .map_err(|e| GfxError::CommandBeginFailed(format!("{}: {e:?}", self.name)))
    }

    fn end(&mut self) -> GfxResult<()> {
        unsafe { self.device.end_command_buffer(self.handle) }
            .map_err(|e| GfxError::CommandEndFailed(format!("{}: {e:?}", self.name)))
    }

    fn barriers(&mut self, images: &[ImageBarrier<'_, VulkanDevice>], buffers: &[BufferBarrier<'_, VulkanDevice>]) {
        if images.is_empty() && buffers.is_empty() {
            return;
        }

        let image_barriers = images
            .iter()
            .map(|barrier| {
                let desc = &barrier.desc;
                vk::ImageMemoryBarrier2::default()
                    .src_stage_mask(convert::pipeline_stages(desc.src.stage))
                    .src_access_mask(convert::access_flags(desc.src.access))
                    .dst_stage_mask(convert::pipeline_stages(desc.dst.stage))
                    .dst_access_mask(convert::access_flags(desc.dst.access))
                    .old_layout(convert::image_layout(desc.src.layout))
                    .new_layout(convert::image_layout(desc.dst.layout))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(barrier.texture.vk_image())
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: convert::aspect(desc.aspect),
                        ..barrier.texture.full_range()
                    })
            })
            .collect_vec();
        let buffer_barriers = buffers
            .iter()
            .map(|barrier| {
                let desc = &barrier.desc;
                vk::BufferMemoryBarrier2::default()
                    .src_stage_mask(convert::pipeline_stages(desc.src.stage))
                    .src_access_mask(convert::access_flags(desc.src.access))
                    .dst_stage_mask(convert::pipeline_stages(desc.dst.stage))
                    .dst_access_mask(convert::access_flags(desc.dst.access))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(barrier.buffer.vk_buffer())
                    .offset(0)
                    .size(vk::WHOLE_SIZE)
            })
            .collect_vec();

        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(&image_barriers)
            .buffer_memory_barriers(&buffer_barriers);
        unsafe { self.device.cmd_pipeline_barrier2(self.handle, &dependency_info) };
    }

    fn begin_rendering(&mut self, desc: &RenderingDesc<'_, VulkanDevice>) {
        let color_attachments = desc
            .colors
            .iter()
            .map(|color| {
                let clear = match color.load {
                    LoadOp::Clear(c) => c,
                    _ => ClearColor::TRANSPARENT,
                };
                vk::RenderingAttachmentInfo::default()
                    .image_view(color.texture.vk_view())
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(Self::attachment_load_op(&color.load))
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(vk::ClearValue {
                        color: convert::clear_color(clear),
                    })
            })
            .collect_vec();

        let depth_attachment = desc.depth.as_ref().map(|depth| {
            let clear_depth = match depth.load {
                LoadOp::Clear(d) => d,
                _ => 1.0,
            };
            let layout = if depth.texture.format().has_stencil() {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
            };
            vk::RenderingAttachmentInfo::default()
                .image_view(depth.texture.vk_view())
                .image_layout(layout)
                .load_op(Self::attachment_load_op(&depth.load))
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: clear_depth,
                        stencil: 0,
                    },
                })
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(convert::rect(desc.area))
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
        }
        unsafe { self.device.cmd_begin_rendering(self.handle, &rendering_info) };
    }

    fn end_rendering(&mut self) {
        unsafe { self.device.cmd_end_rendering(self.handle) };
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        unsafe { self.device.cmd_set_viewport(self.handle, 0, &[convert::viewport(viewport)]) };
    }

    fn set_scissor(&mut self, scissor: &Rect2D) {
        unsafe { self.device.cmd_set_scissor(self.handle, 0, &[convert::rect(*scissor)]) };
    }

    fn bind_shader(&mut self, shader: &VulkanShader) {
        unsafe {
            self.device.cmd_bind_pipeline(self.handle, shader.bind_point(), shader.vk_pipeline());
            self.device.cmd_bind_descriptor_sets(
                self.handle,
                shader.bind_point(),
                shader.vk_layout(),
                0,
                &[self.bindless_set],
                &[],
            );
        }
    }

    fn push_constants(&mut self, shader: &VulkanShader, offset: u32, data: &[u8]) {
        unsafe {
            self.device.cmd_push_constants(self.handle, shader.vk_layout(), vk::ShaderStageFlags::ALL, offset, data)
        };
    }

    fn bind_index_buffer(&mut self, buffer: &VulkanBuffer, offset: u64, index_type: IndexType) {
        unsafe {
            self.device.cmd_bind_index_buffer(self.handle, buffer.vk_buffer(), offset, convert::index_type(index_type))
        };
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe { self.device.cmd_draw(self.handle, vertex_count, instance_count, first_vertex, first_instance) };
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.handle,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    fn draw_indexed_indirect(&mut self, buffer: &VulkanBuffer, offset: u64, draw_count: u32, stride: u32) {
        unsafe { self.device.cmd_draw_indexed_indirect(self.handle, buffer.vk_buffer(), offset, draw_count, stride) };
    }

    fn draw_indexed_indirect_count(
        &mut self,
        buffer: &VulkanBuffer,
        offset: u64,
        count_buffer: &VulkanBuffer,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed_indirect_count(
                self.handle,
                buffer.vk_buffer(),
                offset,
                count_buffer.vk_buffer(),
                count_offset,
                max_draw_count,
                stride,
            )
        };
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(self.handle, x, y, z) };
    }

    fn clear_color(&mut self, texture: &VulkanTexture, color: ClearColor) {
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            ..texture.full_range()
        };
        unsafe {
            self.device.cmd_clear_color_image(
                self.handle,
                texture.vk_image(),
                vk::ImageLayout::GENERAL,
                &convert::clear_color(color),
                &[range],
            )
        };
    }

    fn clear_depth(&mut self, texture: &VulkanTexture, depth: f32) {
        unsafe {
            self.device.cmd_clear_depth_stencil_image(
                self.handle,
                texture.vk_image(),
                vk::ImageLayout::GENERAL,
                &vk::ClearDepthStencilValue { depth, stencil: 0 },
                &[texture.full_range()],
            )
        };
    }

    fn copy_buffer(&mut self, src: &VulkanBuffer, dst: &VulkanBuffer, regions: &[BufferCopyRegion]) {
        let regions = regions
            .iter()
            .map(|r| vk::BufferCopy {
                src_offset: r.src_offset,
                dst_offset: r.dst_offset,
                size: r.size,
            })
            .collect_vec();
        unsafe { self.device.cmd_copy_buffer(self.handle, src.vk_buffer(), dst.vk_buffer(), &regions) };
    }

    fn copy_buffer_to_texture(&mut self, src: &VulkanBuffer, dst: &VulkanTexture, region: &BufferTextureCopyRegion) {
        let regions = [Self::buffer_image_copy(region, dst)];
        let copy_info = vk::CopyBufferToImageInfo2::default()
            .src_buffer(src.vk_buffer())
            .dst_image(dst.vk_image())
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .regions(&regions);
        unsafe { self.device.cmd_copy_buffer_to_image2(self.handle, &copy_info) };
    }

    fn copy_texture_to_buffer(&mut self, src: &VulkanTexture, dst: &VulkanBuffer, region: &BufferTextureCopyRegion) {
        let regions = [Self::buffer_image_copy(region, src)];
        let copy_info = vk::CopyImageToBufferInfo2::default()
            .src_image(src.vk_image())
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_buffer(dst.vk_buffer())
            .regions(&regions);
        unsafe { self.device.cmd_copy_image_to_buffer2(self.handle, &copy_info) };
    }

    fn copy_texture(&mut self, src: &VulkanTexture, dst: &VulkanTexture, extent: Extent2D) {
        let regions = [vk::ImageCopy2::default()
            .src_subresource(Self::subresource_of(src, 0))
            .dst_subresource(Self::subresource_of(dst, 0))
            .extent(convert::extent_3d(extent))];
        let copy_info = vk::CopyImageInfo2::default()
            .src_image(src.vk_image())
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(dst.vk_image())
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .regions(&regions);
        unsafe { self.device.cmd_copy_image2(self.handle, &copy_info) };
    }

    fn blit_texture(
        &mut self,
        src: &VulkanTexture,
        dst: &VulkanTexture,
        src_rect: Rect2D,
        dst_rect: Rect2D,
        filter: Filter,
    ) {
        let regions = [vk::ImageBlit2::default()
            .src_subresource(Self::color_subresource(0))
            .src_offsets(convert::rect_corners(src_rect))
            .dst_subresource(Self::color_subresource(0))
            .dst_offsets(convert::rect_corners(dst_rect))];
        let blit_info = vk::BlitImageInfo2::default()
            .src_image(src.vk_image())
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(dst.vk_image())
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .regions(&regions)
            .filter(convert::filter(filter));
        unsafe { self.device.cmd_blit_image2(self.handle, &blit_info) };
    }

    /// 大小限制：65536Bytes=64KB，需要在 render pass 之外进行
    fn update_buffer(&mut self, buffer: &VulkanBuffer, offset: u64, data: &[u8]) {
        unsafe { self.device.cmd_update_buffer(self.handle, buffer.vk_buffer(), offset, data) };
    }

    fn begin_label(&mut self, label: &str, color: [f32; 4]) {
        let Some(debug_utils) = self.device.debug_utils() else {
            return;
        };
        // 与 end_label 成对出现，不能因为名字非法而跳过
        let name = CString::new(label.replace('\0', "")).unwrap_or_default();
        unsafe {
            debug_utils.cmd_begin_debug_utils_label(
                self.handle,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(color),
            );
        }
    }

    fn end_label(&mut self) {
        if let Some(debug_utils) = self.device.debug_utils() {
            unsafe { debug_utils.cmd_end_debug_utils_label(self.handle) };
        }
    }
}
