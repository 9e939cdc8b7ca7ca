use std::collections::HashMap;
use std::ffi::{CString, c_void};
use std::mem::ManuallyDrop;
use std::sync::Arc;

use itertools::Itertools;
use strata_gfx::backend::{
    BufferBarrier, BufferCopyRegion, BufferTextureCopyRegion, ImageBarrier, LoadOp, RenderingDesc, RhiBuffer,
    RhiCommandList, RhiShader, RhiTexture,
};
use strata_gfx::basic::types::{ClearColor, Extent2D, IndexType, Rect2D, Viewport};
use strata_gfx::error::{GfxError, GfxResult};
use strata_gfx::resources::buffer::{BufferDesc, BufferType};
use strata_gfx::resources::sampler::Filter;
use strata_gfx::resources::shader::ShaderKind;
use windows::Win32::Foundation::BOOL;
use windows::Win32::Graphics::Direct3D12::*;
use windows::core::Interface;

use crate::convert;
use crate::d3d12_device::D3D12Device;
use crate::foundation::device::{DeviceShared, set_debug_name};
use crate::pipelines::shader::D3D12Shader;
use crate::resources::buffer::D3D12Buffer;
use crate::resources::texture::D3D12Texture;

/// update_buffer 使用的 upload page 大小
const UPLOAD_PAGE_SIZE: u64 = 256 * 1024;

/// 一个 command allocator 与一个 direct command list
pub struct D3D12CommandList {
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
    /// ExecuteCommandLists 需要的基类接口
    base: ID3D12CommandList,

    /// 每次 begin 之后需要重新绑定 root signature
    bound_graphics: bool,
    bound_compute: bool,

    /// buffer 在每次 ExecuteCommandLists 结束后退回 COMMON，所以只需要记录本次录制中的状态
    buffer_states: HashMap<usize, D3D12_RESOURCE_STATES>,
    upload: UploadArena,

    shared: Arc<DeviceShared>,
    name: String,
}

// new & init
impl D3D12CommandList {
    pub fn new(shared: Arc<DeviceShared>, name: &str) -> GfxResult<Self> {
        let device = shared.device();
        let allocator: ID3D12CommandAllocator = unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
            .map_err(|e| GfxError::CommandPoolCreateFailed(format!("{name}: {e}")))?;
        set_debug_name(&allocator, format!("CommandAllocator::{name}"));

        let list: ID3D12GraphicsCommandList = unsafe {
            device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None::<&ID3D12PipelineState>)
        }
        .map_err(|e| GfxError::CommandBufferCreateFailed(format!("{name}: {e}")))?;
        set_debug_name(&list, format!("CommandList::{name}"));
        // 新建的 command list 处于录制状态，需要先关闭才能 Reset
        unsafe { list.Close() }.map_err(|e| GfxError::CommandBufferCreateFailed(format!("{name}: {e}")))?;
        let base = list.cast::<ID3D12CommandList>().map_err(|e| GfxError::CommandBufferCreateFailed(e.to_string()))?;

        Ok(Self {
            allocator,
            list,
            base,
            bound_graphics: false,
            bound_compute: false,
            buffer_states: HashMap::new(),
            upload: UploadArena::default(),
            shared,
            name: name.to_string(),
        })
    }
}

// getters
impl D3D12CommandList {
    #[inline]
    pub fn native(&self) -> &ID3D12GraphicsCommandList {
        &self.list
    }

    #[inline]
    pub fn base(&self) -> &ID3D12CommandList {
        &self.base
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

// destroy
impl D3D12CommandList {
    pub fn destroy(self) {
        self.upload.destroy();
    }
}

// tools
impl D3D12CommandList {
    fn transition(
        resource: &ID3D12Resource,
        before: D3D12_RESOURCE_STATES,
        after: D3D12_RESOURCE_STATES,
    ) -> D3D12_RESOURCE_BARRIER {
        D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                    // 借用 resource，barrier 不会 Release
                    pResource: unsafe { std::mem::transmute_copy(resource) },
                    Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                    StateBefore: before,
                    StateAfter: after,
                }),
            },
        }
    }

    fn uav_barrier(resource: &ID3D12Resource) -> D3D12_RESOURCE_BARRIER {
        D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_UAV,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                UAV: ManuallyDrop::new(D3D12_RESOURCE_UAV_BARRIER {
                    pResource: unsafe { std::mem::transmute_copy(resource) },
                }),
            },
        }
    }

    /// 状态相同时只有 UAV 之间需要 barrier
    fn state_barrier(
        resource: &ID3D12Resource,
        before: D3D12_RESOURCE_STATES,
        after: D3D12_RESOURCE_STATES,
    ) -> Option<D3D12_RESOURCE_BARRIER> {
        if before != after {
            Some(Self::transition(resource, before, after))
        } else if after == D3D12_RESOURCE_STATE_UNORDERED_ACCESS {
            Some(Self::uav_barrier(resource))
        } else {
            None
        }
    }

    /// buffer 从 COMMON 出发可以隐式提升到任意状态，此时不需要 barrier
    fn buffer_barrier(&mut self, buffer: &D3D12Buffer, after: D3D12_RESOURCE_STATES) -> Option<D3D12_RESOURCE_BARRIER> {
        if buffer.has_fixed_state() {
            return None;
        }
        let key = buffer.resource().as_raw() as usize;
        let before = self.buffer_states.insert(key, after).unwrap_or(D3D12_RESOURCE_STATE_COMMON);
        if before == D3D12_RESOURCE_STATE_COMMON {
            return None;
        }
        Self::state_barrier(buffer.resource(), before, after)
    }

    fn copy_location_subresource(resource: &ID3D12Resource, subresource: u32) -> D3D12_TEXTURE_COPY_LOCATION {
        D3D12_TEXTURE_COPY_LOCATION {
            pResource: unsafe { std::mem::transmute_copy(resource) },
            Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                SubresourceIndex: subresource,
            },
        }
    }

    /// buffer 中按 `row_pitch` 排列的一块纹理数据，row pitch 需要 256 字节对齐
    fn copy_location_footprint(
        buffer: &D3D12Buffer,
        texture: &D3D12Texture,
        region: &BufferTextureCopyRegion,
    ) -> D3D12_TEXTURE_COPY_LOCATION {
        D3D12_TEXTURE_COPY_LOCATION {
            pResource: unsafe { std::mem::transmute_copy(buffer.resource()) },
            Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                    Offset: region.buffer_offset,
                    Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                        Format: texture.formats().view,
                        Width: region.extent.width,
                        Height: region.extent.height,
                        Depth: 1,
                        RowPitch: region.row_pitch as u32,
                    },
                },
            },
        }
    }

    fn ensure_bound(&mut self, kind: ShaderKind) {
        let bindless = self.shared.bindless();
        match kind {
            ShaderKind::Graphics if !self.bound_graphics => {
                bindless.bind_graphics(&self.list);
                self.bound_graphics = true;
            }
            ShaderKind::Compute if !self.bound_compute => {
                bindless.bind_compute(&self.list);
                self.bound_compute = true;
            }
            _ => {}
        }
    }

    /// 对 `General` 状态的纹理做一次临时的状态切换
    fn with_texture_state(&self, texture: &D3D12Texture, state: D3D12_RESOURCE_STATES, f: impl FnOnce()) {
        let general = texture.general_state();
        unsafe {
            self.list.ResourceBarrier(&[Self::transition(texture.resource(), general, state)]);
        }
        f();
        unsafe {
            self.list.ResourceBarrier(&[Self::transition(texture.resource(), state, general)]);
        }
    }
}

impl RhiCommandList<D3D12Device> for D3D12CommandList {
    fn reset(&mut self) -> GfxResult<()> {
        self.upload.reset();
        unsafe { self.allocator.Reset() }.map_err(|e| {
            convert::device_error(e, |msg| GfxError::CommandBeginFailed(format!("reset {}: {msg}", self.name)))
        })
    }

    fn begin(&mut self) -> GfxResult<()> {
        unsafe { self.list.Reset(&self.allocator, None::<&ID3D12PipelineState>) }.map_err(|e| {
            convert::device_error(e, |msg| GfxError::CommandBeginFailed(format!("{}: {msg}", self.name)))
        })?;
        self.bound_graphics = false;
        self.bound_compute = false;
        self.buffer_states.clear();
        unsafe { self.list.SetDescriptorHeaps(&self.shared.bindless().heaps()) };
        Ok(())
    }

    fn end(&mut self) -> GfxResult<()> {
        unsafe { self.list.Close() }.map_err(|e| {
            convert::device_error(e, |msg| GfxError::CommandEndFailed(format!("{}: {msg}", self.name)))
        })
    }

    fn barriers(&mut self, images: &[ImageBarrier<'_, D3D12Device>], buffers: &[BufferBarrier<'_, D3D12Device>]) {
        let mut barriers = images
            .iter()
            .filter_map(|barrier| {
                let texture = barrier.texture;
                let before = convert::texture_state(barrier.desc.src.layout, texture.allow_uav());
                let after = convert::texture_state(barrier.desc.dst.layout, texture.allow_uav());
                Self::state_barrier(texture.resource(), before, after)
            })
            .collect_vec();
        for barrier in buffers {
            if let Some(b) = self.buffer_barrier(barrier.buffer, convert::buffer_state(barrier.desc.dst)) {
                barriers.push(b);
            }
        }

        if !barriers.is_empty() {
            unsafe { self.list.ResourceBarrier(&barriers) };
        }
    }

    fn begin_rendering(&mut self, desc: &RenderingDesc<'_, D3D12Device>) {
        let rects = [convert::rect(desc.area)];
        let mut rtvs = Vec::with_capacity(desc.colors.len());
        for color in &desc.colors {
            let Some(rtv) = color.texture.rtv() else {
                log::error!("{}: color attachment has no rtv", self.name);
                continue;
            };
            rtvs.push(rtv);
            match color.load {
                LoadOp::Clear(c) => unsafe { self.list.ClearRenderTargetView(rtv, c.0.as_ptr(), Some(&rects)) },
                LoadOp::DontCare => unsafe { self.list.DiscardResource(color.texture.resource(), None) },
                LoadOp::Load => {}
            }
        }

        let dsv = desc.depth.as_ref().and_then(|depth| {
            let dsv = depth.texture.dsv()?;
            match depth.load {
                LoadOp::Clear(d) => {
                    let mut flags = D3D12_CLEAR_FLAG_DEPTH;
                    if depth.texture.format().has_stencil() {
                        flags |= D3D12_CLEAR_FLAG_STENCIL;
                    }
                    unsafe { self.list.ClearDepthStencilView(dsv, flags, d, 0, Some(&rects)) };
                }
                LoadOp::DontCare => unsafe { self.list.DiscardResource(depth.texture.resource(), None) },
                LoadOp::Load => {}
            }
            Some(dsv)
        });

        unsafe {
            self.list.OMSetRenderTargets(
                rtvs.len() as u32,
                (!rtvs.is_empty()).then_some(rtvs.as_ptr()),
                BOOL::from(false),
                dsv.as_ref().map(|dsv| dsv as *const _),
            )
        };
    }

    /// D3D12 没有 render pass 的概念
    fn end_rendering(&mut self) {}

    fn set_viewport(&mut self, viewport: &Viewport) {
        unsafe { self.list.RSSetViewports(&[convert::viewport(viewport)]) };
    }

    fn set_scissor(&mut self, scissor: &Rect2D) {
        unsafe { self.list.RSSetScissorRects(&[convert::rect(*scissor)]) };
    }

    fn bind_shader(&mut self, shader: &D3D12Shader) {
        self.ensure_bound(shader.kind());
        unsafe {
            self.list.SetPipelineState(shader.pso());
            if let Some(topology) = shader.topology() {
                self.list.IASetPrimitiveTopology(topology);
            }
        }
    }

    /// root constants 以 4 字节为单位
    fn push_constants(&mut self, shader: &D3D12Shader, offset: u32, data: &[u8]) {
        let words = data
            .chunks(4)
            .map(|chunk| {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                u32::from_le_bytes(word)
            })
            .collect_vec();
        let ptr = words.as_ptr() as *const c_void;
        unsafe {
            match shader.kind() {
                ShaderKind::Graphics => {
                    self.list.SetGraphicsRoot32BitConstants(0, words.len() as u32, ptr, offset / 4)
                }
                ShaderKind::Compute => self.list.SetComputeRoot32BitConstants(0, words.len() as u32, ptr, offset / 4),
            }
        }
    }

    fn bind_index_buffer(&mut self, buffer: &D3D12Buffer, offset: u64, index_type: IndexType) {
        let view = D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: buffer.device_address() + offset,
            SizeInBytes: buffer.size().saturating_sub(offset).min(u32::MAX as u64) as u32,
            Format: convert::index_format(index_type),
        };
        unsafe { self.list.IASetIndexBuffer(Some(&view)) };
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe { self.list.DrawInstanced(vertex_count, instance_count, first_vertex, first_instance) };
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
            self.list.DrawIndexedInstanced(index_count, instance_count, first_index, vertex_offset, first_instance)
        };
    }

    fn draw_indexed_indirect(&mut self, buffer: &D3D12Buffer, offset: u64, draw_count: u32, stride: u32) {
        let signature = match self.shared.draw_indexed_signature(stride) {
            Ok(signature) => signature,
            Err(e) => {
                log::error!("{}: skip indirect draw, {}", self.name, e);
                return;
            }
        };
        unsafe {
            self.list.ExecuteIndirect(&signature, draw_count, buffer.resource(), offset, None::<&ID3D12Resource>, 0)
        };
    }

    fn draw_indexed_indirect_count(
        &mut self,
        buffer: &D3D12Buffer,
        offset: u64,
        count_buffer: &D3D12Buffer,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    ) {
        let signature = match self.shared.draw_indexed_signature(stride) {
            Ok(signature) => signature,
            Err(e) => {
                log::error!("{}: skip indirect draw, {}", self.name, e);
                return;
            }
        };
        unsafe {
            self.list.ExecuteIndirect(
                &signature,
                max_draw_count,
                buffer.resource(),
                offset,
                count_buffer.resource(),
                count_offset,
            )
        };
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        unsafe { self.list.Dispatch(x, y, z) };
    }

    fn clear_color(&mut self, texture: &D3D12Texture, color: ClearColor) {
        let Some(rtv) = texture.rtv() else {
            log::error!("{}: clear_color on a texture without rtv", self.name);
            return;
        };
        self.with_texture_state(texture, D3D12_RESOURCE_STATE_RENDER_TARGET, || unsafe {
            self.list.ClearRenderTargetView(rtv, color.0.as_ptr(), None)
        });
    }

    fn clear_depth(&mut self, texture: &D3D12Texture, depth: f32) {
        let Some(dsv) = texture.dsv() else {
            log::error!("{}: clear_depth on a texture without dsv", self.name);
            return;
        };
        let mut flags = D3D12_CLEAR_FLAG_DEPTH;
        if texture.format().has_stencil() {
            flags |= D3D12_CLEAR_FLAG_STENCIL;
        }
        self.with_texture_state(texture, D3D12_RESOURCE_STATE_DEPTH_WRITE, || unsafe {
            self.list.ClearDepthStencilView(dsv, flags, depth, 0, None)
        });
    }

    fn copy_buffer(&mut self, src: &D3D12Buffer, dst: &D3D12Buffer, regions: &[BufferCopyRegion]) {
        for region in regions {
            unsafe {
                self.list.CopyBufferRegion(dst.resource(), region.dst_offset, src.resource(), region.src_offset, region.size)
            };
        }
    }

    fn copy_buffer_to_texture(&mut self, src: &D3D12Buffer, dst: &D3D12Texture, region: &BufferTextureCopyRegion) {
        let dst_location = Self::copy_location_subresource(dst.resource(), region.mip_level);
        let src_location = Self::copy_location_footprint(src, dst, region);
        unsafe { self.list.CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None) };
    }

    fn copy_texture_to_buffer(&mut self, src: &D3D12Texture, dst: &D3D12Buffer, region: &BufferTextureCopyRegion) {
        let dst_location = Self::copy_location_footprint(dst, src, region);
        let src_location = Self::copy_location_subresource(src.resource(), region.mip_level);
        let src_box = convert::extent_box(region.extent);
        unsafe { self.list.CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, Some(&src_box)) };
    }

    fn copy_texture(&mut self, src: &D3D12Texture, dst: &D3D12Texture, extent: Extent2D) {
        let dst_location = Self::copy_location_subresource(dst.resource(), 0);
        let src_location = Self::copy_location_subresource(src.resource(), 0);
        let src_box = convert::extent_box(extent);
        unsafe { self.list.CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, Some(&src_box)) };
    }

    /// D3D12 没有 blit，只支持尺寸与格式都相同的区域拷贝
    fn blit_texture(
        &mut self,
        src: &D3D12Texture,
        dst: &D3D12Texture,
        src_rect: Rect2D,
        dst_rect: Rect2D,
        _filter: Filter,
    ) {
        if src_rect.extent != dst_rect.extent || src.formats().resource != dst.formats().resource {
            log::error!(
                "{}: blit with scaling or format conversion is not supported, {:?} {:?} -> {:?} {:?}",
                self.name,
                src.format(),
                src_rect.extent,
                dst.format(),
                dst_rect.extent
            );
            return;
        }
        let dst_location = Self::copy_location_subresource(dst.resource(), 0);
        let src_location = Self::copy_location_subresource(src.resource(), 0);
        let src_box = convert::rect_box(src_rect);
        unsafe {
            self.list.CopyTextureRegion(
                &dst_location,
                dst_rect.offset.x.max(0) as u32,
                dst_rect.offset.y.max(0) as u32,
                0,
                &src_location,
                Some(&src_box),
            )
        };
    }

    /// 数据先写入 upload page，再拷贝到目标 buffer
    fn update_buffer(&mut self, buffer: &D3D12Buffer, offset: u64, data: &[u8]) {
        let (page, page_offset) = match self.upload.write(self.shared.device(), data, &self.name) {
            Ok(location) => location,
            Err(e) => {
                log::error!("{}: skip update_buffer, {}", self.name, e);
                return;
            }
        };
        unsafe {
            self.list.CopyBufferRegion(buffer.resource(), offset, page, page_offset, data.len() as u64)
        };
    }

    /// PIX 的 ANSI 字符串事件
    fn begin_label(&mut self, label: &str, _color: [f32; 4]) {
        // 与 end_label 成对出现，不能因为名字非法而跳过
        let name = CString::new(label.replace('\0', "")).unwrap_or_default();
        let bytes = name.as_bytes_with_nul();
        unsafe { self.list.BeginEvent(1, Some(bytes.as_ptr() as *const c_void), bytes.len() as u32) };
    }

    fn end_label(&mut self) {
        unsafe { self.list.EndEvent() };
    }
}

/// update_buffer 使用的线性上传区，随 command list 一起 reset
#[derive(Default)]
struct UploadArena {
    pages: Vec<D3D12Buffer>,
    current: usize,
    cursor: u64,
}

impl UploadArena {
    /// 返回数据所在的 page 以及在 page 中的偏移
    fn write(&mut self, device: &ID3D12Device, data: &[u8], name: &str) -> GfxResult<(&ID3D12Resource, u64)> {
        let size = data.len() as u64;
        debug_assert!(size <= UPLOAD_PAGE_SIZE);

        if self.current < self.pages.len() && self.cursor + size > UPLOAD_PAGE_SIZE {
            self.current += 1;
            self.cursor = 0;
        }
        if self.current == self.pages.len() {
            let desc = BufferDesc::new(UPLOAD_PAGE_SIZE, BufferType::Staging, format!("{name}-upload-{}", self.current));
            self.pages.push(D3D12Buffer::new(device, &desc)?);
            self.cursor = 0;
        }

        let page = &self.pages[self.current];
        let ptr = page.mapped_ptr().ok_or_else(|| GfxError::BufferMapFailed(format!("{name} upload page")))?;
        let offset = self.cursor;
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().add(offset as usize), data.len()) };
        self.cursor = (offset + size).next_multiple_of(4);
        Ok((page.resource(), offset))
    }

    /// 调用方保证之前的提交已经执行完毕
    fn reset(&mut self) {
        self.current = 0;
        self.cursor = 0;
    }

    fn destroy(self) {
        for page in self.pages {
            page.destroy();
        }
    }
}
