use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{DescriptorWrite, RhiBuffer, RhiDevice, RhiTexture};
use crate::basic::types::Extent2D;
use crate::commands::command_scope::CommandScope;
use crate::commands::queue::Queue;
use crate::commands::transfer::TransferContext;
use crate::descriptors::descriptor_allocator::{DescriptorAllocator, DescriptorKind, DescriptorSlot};
use crate::error::{GfxError, GfxResult};
use crate::frame::frame_scheduler::FrameScheduler;
use crate::handles::{BufferHandle, ImageHandle, ImageUsage, SamplerHandle, ShaderHandle};
use crate::resources::buffer::{BufferDesc, BufferRecord};
use crate::resources::deferred_destroy::{DeferredDestroyQueue, DeferredResource};
use crate::resources::registry::ResourceRegistry;
use crate::resources::sampler::{SamplerDesc, SamplerRecord};
use crate::resources::shader::ShaderDesc;
use crate::resources::texture::{TextureDesc, TextureRecord};
use crate::settings::GfxSettings;
use crate::sync::resource_state::{BufferState, ImageState};
use crate::thread_context::ThreadContext;

/// 主线程与 thread context 共享的部分：设备、descriptor 分配器与资源表
///
/// descriptor 分配器与资源表各自持有一把锁，因此资源可以在任意线程上创建
pub struct ContextShared<D: RhiDevice> {
    pub(crate) device: D,
    pub(crate) descriptors: DescriptorAllocator,
    pub(crate) registry: Mutex<ResourceRegistry<D>>,
}

// 资源创建
impl<D: RhiDevice> ContextShared<D> {
    fn image_write(kind: DescriptorKind, texture: &D::Texture) -> DescriptorWrite<'_, D> {
        match kind {
            DescriptorKind::StorageImage => DescriptorWrite::StorageImage(texture),
            _ => DescriptorWrite::SampledImage(texture),
        }
    }

    /// 为 texture 分配 `desc` 所需的全部 slot，失败时归还已经分配的 slot
    fn allocate_image_slots(
        &self,
        desc: &TextureDesc,
        texture: &D::Texture,
    ) -> GfxResult<(Option<DescriptorSlot>, Option<DescriptorSlot>)> {
        let mut sampled_slot = None;
        let mut storage_slot = None;
        for kind in desc.descriptor_kinds() {
            let allocated = self
                .descriptors
                .allocate_with(kind, |slot| self.device.write_descriptor(slot, Self::image_write(kind, texture)));
            match allocated {
                Ok(slot) if kind == DescriptorKind::SampledImage => sampled_slot = Some(slot),
                Ok(slot) => storage_slot = Some(slot),
                Err(err) => {
                    sampled_slot.into_iter().chain(storage_slot).for_each(|slot| self.descriptors.free(slot));
                    return Err(err);
                }
            }
        }
        Ok((sampled_slot, storage_slot))
    }

    pub fn create_buffer(&self, desc: &BufferDesc) -> GfxResult<BufferHandle> {
        let _span = tracy_client::span!("Context::create_buffer");
        let buffer = self.device.create_buffer(desc)?;
        let slot = match desc.ty.descriptor_kind() {
            Some(kind) => {
                let write = |slot| {
                    let content = match kind {
                        DescriptorKind::ConstantBuffer => DescriptorWrite::ConstantBuffer(&buffer),
                        _ => DescriptorWrite::StorageBuffer(&buffer),
                    };
                    self.device.write_descriptor(slot, content);
                };
                match self.descriptors.allocate_with(kind, write) {
                    Ok(slot) => Some(slot),
                    Err(err) => {
                        self.device.destroy_buffer(buffer);
                        return Err(err);
                    }
                }
            }
            None => None,
        };

        let handle = self.registry.lock().register_buffer(BufferRecord {
            buffer,
            desc: desc.clone(),
            state: BufferState::UNDEFINED,
            slot,
        });
        log::debug!("buffer {} created: {:?}, {} bytes, slot {:?}", desc.name, handle, desc.size, slot.map(|s| s.index));
        Ok(handle)
    }

    pub fn create_texture(&self, desc: &TextureDesc) -> GfxResult<ImageHandle> {
        let _span = tracy_client::span!("Context::create_texture");
        let texture = self.device.create_texture(desc)?;
        let (sampled_slot, storage_slot) = match self.allocate_image_slots(desc, &texture) {
            Ok(slots) => slots,
            Err(err) => {
                self.device.destroy_texture(texture);
                return Err(err);
            }
        };

        let handle = self.registry.lock().register_texture(TextureRecord {
            texture,
            desc: desc.clone(),
            state: ImageState::UNDEFINED,
            sampled_slot,
            storage_slot,
        });
        log::debug!(
            "texture {} created: {:?}, {}x{} {:?}",
            desc.name,
            handle,
            desc.extent.width,
            desc.extent.height,
            desc.format
        );
        Ok(handle)
    }

    pub fn create_sampler(&self, desc: &SamplerDesc) -> GfxResult<SamplerHandle> {
        let sampler = self.device.create_sampler(desc)?;
        let slot = match self.descriptors.allocate_with(DescriptorKind::Sampler, |slot| {
            self.device.write_descriptor(slot, DescriptorWrite::Sampler(&sampler))
        }) {
            Ok(slot) => slot,
            Err(err) => {
                self.device.destroy_sampler(sampler);
                return Err(err);
            }
        };
        let handle = self.registry.lock().register_sampler(SamplerRecord { sampler, slot });
        log::debug!("sampler {} created at slot {}", desc.name, slot.index);
        Ok(handle)
    }

    pub fn create_shader(&self, desc: &ShaderDesc<'_>) -> GfxResult<ShaderHandle> {
        let _span = tracy_client::span!("Context::create_shader");
        let shader = self.device.create_shader(desc)?;
        let handle = self.registry.lock().register_shader(shader);
        log::debug!("{:?} shader {} created", desc.kind(), desc.name());
        Ok(handle)
    }

    /// 立即销毁 texture 并归还其 slot，调用方保证 GPU 不再引用它
    pub(crate) fn destroy_texture_now(&self, handle: ImageHandle) {
        let record = self.registry.lock().remove_texture(handle);
        record.slots().for_each(|slot| self.descriptors.free(slot));
        log::debug!("texture {} destroyed: {:?}", record.desc.name, handle);
        self.device.destroy_texture(record.texture);
    }
}

// buffer
impl<D: RhiDevice> ContextShared<D> {
    /// host 可见 buffer 的持久映射地址
    pub fn map_buffer(&self, handle: BufferHandle) -> GfxResult<NonNull<u8>> {
        let registry = self.registry.lock();
        let record = registry.buffer(handle);
        record
            .buffer()
            .mapped_ptr()
            .ok_or_else(|| GfxError::BufferMapFailed(format!("buffer {} is not host visible", record.desc().name)))
    }

    /// 直接写入 host 可见的 buffer，调用方保证 GPU 没有在使用这段数据
    pub fn upload_to_buffer(&self, handle: BufferHandle, offset: u64, data: &[u8]) -> GfxResult<()> {
        let registry = self.registry.lock();
        let record = registry.buffer(handle);
        assert!(offset + data.len() as u64 <= record.desc().size, "upload_to_buffer out of range");
        let ptr = record
            .buffer()
            .mapped_ptr()
            .ok_or_else(|| GfxError::BufferMapFailed(format!("buffer {} is not host visible", record.desc().name)))?;
        // SAFETY: 范围已经检查，映射内存在 buffer 销毁之前一直有效
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().add(offset as usize), data.len());
        }
        Ok(())
    }

    /// 从 host 可见的 buffer 中读取数据，调用方保证 GPU 已经写入完毕
    pub fn download_buffer(&self, handle: BufferHandle, offset: u64, size: u64) -> GfxResult<Vec<u8>> {
        let registry = self.registry.lock();
        let record = registry.buffer(handle);
        assert!(offset + size <= record.desc().size, "download_buffer out of range");
        let ptr = record
            .buffer()
            .mapped_ptr()
            .ok_or_else(|| GfxError::BufferMapFailed(format!("buffer {} is not host visible", record.desc().name)))?;
        // SAFETY: 同 upload_to_buffer
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr().add(offset as usize), size as usize) };
        Ok(bytes.to_vec())
    }

    #[inline]
    pub fn buffer_address(&self, handle: BufferHandle) -> u64 {
        self.registry.lock().buffer(handle).buffer().device_address()
    }

    #[inline]
    pub fn buffer_size(&self, handle: BufferHandle) -> u64 {
        self.registry.lock().buffer(handle).desc().size
    }

    #[inline]
    pub fn buffer_slot_index(&self, handle: BufferHandle) -> Option<u32> {
        self.registry.lock().buffer(handle).slot().map(|slot| slot.index)
    }
}

// image
impl<D: RhiDevice> ContextShared<D> {
    #[inline]
    pub fn image_size(&self, handle: ImageHandle) -> Extent2D {
        self.registry.lock().texture(handle).texture().extent()
    }

    /// shader 中访问该 image 使用的 descriptor 索引，temporary image 没有索引
    #[inline]
    pub fn image_slot_index(&self, handle: ImageHandle) -> Option<u32> {
        self.registry.lock().texture(handle).slot_index()
    }

    #[inline]
    pub fn image_state(&self, handle: ImageHandle) -> ImageState {
        self.registry.lock().texture(handle).state()
    }

    #[inline]
    pub fn buffer_state(&self, handle: BufferHandle) -> BufferState {
        self.registry.lock().buffer(handle).state()
    }

    #[inline]
    pub fn contains_image(&self, handle: ImageHandle) -> bool {
        self.registry.lock().contains_texture(handle)
    }

    #[inline]
    pub fn sampler_slot_index(&self, handle: SamplerHandle) -> u32 {
        self.registry.lock().sampler(handle).slot().index
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn descriptors(&self) -> &DescriptorAllocator {
        &self.descriptors
    }
}

/// GFX 层的入口
///
/// 拥有设备、descriptor 分配器、帧调度器以及所有资源。通过 [`Context::destroy`] 显式销毁。
///
/// 每一帧的流程：
/// 1. [`Context::begin_frame`]：回收已经完成的延迟销毁资源，等待 frame fence，acquire swapchain image
/// 2. 通过返回的 [`CommandScope`] 录制命令
/// 3. [`Context::end_frame`]：提交并 present，切换到下一个 frame slot
pub struct Context<D: RhiDevice> {
    shared: Arc<ContextShared<D>>,
    graphics_queue: Queue<D>,
    scheduler: FrameScheduler<D>,
    transfer: TransferContext<D>,
    deferred: DeferredDestroyQueue<D>,

    default_sampler: SamplerHandle,
    thread_context_count: u32,
    settings: GfxSettings,
}

// new & init
impl<D: RhiDevice> Context<D> {
    pub fn new(device: D, settings: GfxSettings, extent: Extent2D) -> GfxResult<Self> {
        let _span = tracy_client::span!("Context::new");
        let settings = settings.sanitized();
        log::info!(
            "create context: backend {}, app {}, {} frames in flight",
            device.backend_name(),
            settings.app_name,
            settings.frames_in_flight
        );

        let descriptors = DescriptorAllocator::new(&settings.descriptors, |kind| device.descriptor_capacity(kind));
        let graphics_queue = Queue::new(device.create_queue(0, "graphics")?, "graphics");
        let scheduler = FrameScheduler::new(&device, &graphics_queue, &settings, extent)?;
        let transfer = TransferContext::new(&device, &graphics_queue, "transfer")?;

        let shared = Arc::new(ContextShared {
            device,
            descriptors,
            registry: Mutex::new(ResourceRegistry::new()),
        });
        let default_sampler = shared.create_sampler(&SamplerDesc::linear_repeat())?;
        debug_assert_eq!(shared.sampler_slot_index(default_sampler), 0);

        Ok(Self {
            shared,
            graphics_queue,
            scheduler,
            transfer,
            deferred: DeferredDestroyQueue::new(),
            default_sampler,
            thread_context_count: 0,
            settings,
        })
    }
}

// frame
impl<D: RhiDevice> Context<D> {
    /// 开始新的一帧，返回当前帧的命令录制器。开始的帧必须通过 [`Self::end_frame`] 结束
    pub fn begin_frame(&mut self) -> GfxResult<CommandScope<'_, D>> {
        let _span = tracy_client::span!("Context::begin_frame");
        let completed = self.graphics_queue.completed_value()?;
        self.deferred.collect(completed, &self.shared.device, &self.shared.descriptors);

        self.scheduler.begin_frame(&self.shared.device, &self.graphics_queue)?;
        Ok(self.commands())
    }

    /// 当前帧的命令录制器，只能在 begin_frame 与 end_frame 之间调用
    pub fn commands(&mut self) -> CommandScope<'_, D> {
        let (recorder, swapchain) = self.scheduler.frame_parts();
        CommandScope::new(&self.shared, recorder, Some(swapchain), None)
    }

    pub fn end_frame(&mut self) -> GfxResult<()> {
        let _span = tracy_client::span!("Context::end_frame");
        let result = self.scheduler.end_frame(&self.shared.device, &mut self.graphics_queue);
        // 提交之后 last_submitted 即为当前帧的 timeline 值；提交失败时该帧不会执行
        self.deferred.retire_pending(self.graphics_queue.last_submitted());
        result
    }

    /// 窗口尺寸变化，extent 为 0 时延迟重建
    pub fn resize(&mut self, extent: Extent2D) -> GfxResult<()> {
        self.scheduler.resize(&self.shared.device, extent)
    }
}

// transfer
impl<D: RhiDevice> Context<D> {
    /// 在 graphics queue 上开始传输作用域
    pub fn begin_transfer(&mut self) -> GfxResult<CommandScope<'_, D>> {
        self.transfer.begin()?;
        Ok(self.transfer_commands())
    }

    pub fn transfer_commands(&mut self) -> CommandScope<'_, D> {
        let (recorder, staging) = self.transfer.parts();
        CommandScope::new(&self.shared, recorder, None, Some(staging))
    }

    /// 提交传输命令并等待完成，之后释放 staging buffer
    pub fn end_transfer(&mut self) -> GfxResult<()> {
        self.transfer.end(&self.shared.device, &mut self.graphics_queue)
    }

    /// 创建 texture 并通过传输作用域上传 mip 0 的数据，返回时 texture 处于 ShaderReadOnly（storage image 为 General）
    ///
    /// 上传失败时 texture 随之销毁
    pub fn create_texture_with_data(&mut self, desc: &TextureDesc, data: &[u8]) -> GfxResult<ImageHandle> {
        let handle = self.shared.create_texture(desc)?;
        let uploaded = self.transfer.begin().and_then(|_| {
            let uploaded = self.transfer_commands().upload_texture(handle, data);
            let ended = self.end_transfer();
            uploaded.and(ended)
        });
        if let Err(err) = uploaded {
            log::error!("texture {} upload failed: {}", desc.name, err);
            self.destroy_texture(handle);
            return Err(err);
        }
        Ok(handle)
    }
}

// factories
impl<D: RhiDevice> Context<D> {
    #[inline]
    pub fn create_buffer(&self, desc: &BufferDesc) -> GfxResult<BufferHandle> {
        self.shared.create_buffer(desc)
    }

    #[inline]
    pub fn create_texture(&self, desc: &TextureDesc) -> GfxResult<ImageHandle> {
        self.shared.create_texture(desc)
    }

    #[inline]
    pub fn create_sampler(&self, desc: &SamplerDesc) -> GfxResult<SamplerHandle> {
        self.shared.create_sampler(desc)
    }

    #[inline]
    pub fn create_shader(&self, desc: &ShaderDesc<'_>) -> GfxResult<ShaderHandle> {
        self.shared.create_shader(desc)
    }
}

// destroy，资源在 GPU 不再引用之后才真正释放
impl<D: RhiDevice> Context<D> {
    /// 帧录制期间销毁的资源等到当前帧提交后再确定 retire value；
    /// 传输作用域中销毁的资源需要等待该作用域的提交
    fn retire(&mut self, resource: DeferredResource<D>, slots: Vec<DescriptorSlot>) {
        if self.scheduler.is_recording() {
            self.deferred.push_pending(resource, slots);
        } else {
            let retire_value = self.graphics_queue.last_submitted() + self.transfer.is_active() as u64;
            self.deferred.push(resource, slots, retire_value);
        }
    }

    pub fn destroy_buffer(&mut self, handle: BufferHandle) {
        let record = self.shared.registry.lock().remove_buffer(handle);
        log::debug!("buffer {} destroyed: {:?}", record.desc.name, handle);
        self.retire(DeferredResource::Buffer(record.buffer), record.slot.into_iter().collect());
    }

    pub fn destroy_texture(&mut self, handle: ImageHandle) {
        let record = self.shared.registry.lock().remove_texture(handle);
        log::debug!("texture {} destroyed: {:?}", record.desc.name, handle);
        let slots = record.slots().collect();
        self.retire(DeferredResource::Texture(record.texture), slots);
    }

    pub fn destroy_sampler(&mut self, handle: SamplerHandle) {
        debug_assert_ne!(handle, self.default_sampler, "the default sampler is destroyed with the context");
        let record = self.shared.registry.lock().remove_sampler(handle);
        self.retire(DeferredResource::Sampler(record.sampler), vec![record.slot]);
    }

    pub fn destroy_shader(&mut self, handle: ShaderHandle) {
        let shader = self.shared.registry.lock().remove_shader(handle);
        self.retire(DeferredResource::Shader(shader), Vec::new());
    }
}

// buffer & image
impl<D: RhiDevice> Context<D> {
    #[inline]
    pub fn map_buffer(&self, handle: BufferHandle) -> GfxResult<NonNull<u8>> {
        self.shared.map_buffer(handle)
    }

    #[inline]
    pub fn upload_to_buffer(&self, handle: BufferHandle, offset: u64, data: &[u8]) -> GfxResult<()> {
        self.shared.upload_to_buffer(handle, offset, data)
    }

    #[inline]
    pub fn download_buffer(&self, handle: BufferHandle, offset: u64, size: u64) -> GfxResult<Vec<u8>> {
        self.shared.download_buffer(handle, offset, size)
    }

    #[inline]
    pub fn buffer_address(&self, handle: BufferHandle) -> u64 {
        self.shared.buffer_address(handle)
    }

    #[inline]
    pub fn image_size(&self, handle: ImageHandle) -> Extent2D {
        self.shared.image_size(handle)
    }

    #[inline]
    pub fn image_slot_index(&self, handle: ImageHandle) -> Option<u32> {
        self.shared.image_slot_index(handle)
    }

    /// sampled 数组中第 `index` 个 image 的句柄
    pub fn read_only_image_from_index(&self, index: u32) -> ImageHandle {
        let handle = ImageHandle::new(index, ImageUsage::Sampled);
        debug_assert!(self.shared.contains_image(handle), "no sampled image at index {}", index);
        handle
    }

    /// 将 temporary image 的内容提升为 `base`
    ///
    /// `temp` 的原生 texture 替换 `base` 的原生 texture 并重写 `base` 的 descriptor slot，
    /// `base` 原先的 texture 延迟销毁，`temp` 句柄随之失效
    pub fn update_image(&mut self, base: ImageHandle, temp: ImageHandle) {
        assert_eq!(temp.usage, ImageUsage::Temporary, "update_image source must be a temporary image");
        let shared = &*self.shared;
        let old_texture = {
            let mut registry = shared.registry.lock();
            let temp_record = registry.remove_texture(temp);
            let base_record = registry.texture_mut(base);
            debug_assert_eq!(base_record.desc.format, temp_record.desc.format, "update_image format mismatch");

            let old_texture = std::mem::replace(&mut base_record.texture, temp_record.texture);
            base_record.state = temp_record.state;
            base_record.desc.extent = temp_record.desc.extent;
            base_record.desc.mip_levels = temp_record.desc.mip_levels;
            for slot in base_record.slots() {
                shared.descriptors.rewrite(slot, |slot| {
                    shared.device.write_descriptor(slot, ContextShared::image_write(slot.kind, &base_record.texture))
                });
            }
            old_texture
        };
        log::debug!("image {:?} updated from {:?}", base, temp);
        self.retire(DeferredResource::Texture(old_texture), Vec::new());
    }

    /// 销毁所有 temporary image
    pub fn clear_temp_images(&mut self) {
        let drained = self.shared.registry.lock().drain_temporary_images();
        if !drained.is_empty() {
            log::debug!("clear {} temporary images", drained.len());
        }
        for record in drained {
            self.retire(DeferredResource::Texture(record.texture), Vec::new());
        }
    }
}

// thread context
impl<D: RhiDevice> Context<D> {
    /// 在 graphics family 的其他 queue 上创建 thread context
    pub fn create_thread_context(&mut self) -> GfxResult<ThreadContext<D>> {
        let queue_count = self.shared.device.graphics_queue_count();
        if queue_count <= 1 {
            return Err(GfxError::Unsupported(
                "thread context requires more than one queue in the graphics family".to_string(),
            ));
        }
        let queue_index = 1 + self.thread_context_count % (queue_count - 1);
        let thread_context = ThreadContext::new(self.shared.clone(), queue_index, self.thread_context_count)?;
        self.thread_context_count += 1;
        Ok(thread_context)
    }

    /// 等待 thread context 的 queue 空闲之后销毁
    pub fn destroy_thread_context(&mut self, thread_context: ThreadContext<D>) -> GfxResult<()> {
        thread_context.destroy()
    }
}

// tools
impl<D: RhiDevice> Context<D> {
    /// 等待 graphics queue 与设备空闲
    pub fn wait_idle(&mut self) -> GfxResult<()> {
        assert!(!self.scheduler.is_recording(), "wait_idle inside a frame");
        self.graphics_queue.wait_idle()?;
        self.shared.device.wait_idle()
    }
}

// getters
impl<D: RhiDevice> Context<D> {
    #[inline]
    pub fn device(&self) -> &D {
        &self.shared.device
    }

    #[inline]
    pub fn shared(&self) -> &ContextShared<D> {
        &self.shared
    }

    #[inline]
    pub fn settings(&self) -> &GfxSettings {
        &self.settings
    }

    #[inline]
    pub fn graphics_queue(&self) -> &Queue<D> {
        &self.graphics_queue
    }

    #[inline]
    pub fn frame_scheduler(&self) -> &FrameScheduler<D> {
        &self.scheduler
    }

    #[inline]
    pub fn current_frame(&self) -> usize {
        self.scheduler.current_frame()
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.scheduler.frame_id()
    }

    #[inline]
    pub fn swapchain_extent(&self) -> Extent2D {
        self.scheduler.swapchain().extent()
    }

    #[inline]
    pub fn default_sampler(&self) -> SamplerHandle {
        self.default_sampler
    }

    #[inline]
    pub fn pending_destroy_count(&self) -> usize {
        self.deferred.len()
    }
}

// destroy
impl<D: RhiDevice> Context<D> {
    /// 按顺序销毁：等待设备空闲 → 清空延迟销毁队列 → 销毁存活的资源 → 销毁 frame slot 与 swapchain → 销毁设备
    ///
    /// 所有的 thread context 需要先通过 [`Self::destroy_thread_context`] 销毁
    pub fn destroy(mut self) {
        let _span = tracy_client::span!("Context::destroy");
        assert!(!self.scheduler.is_recording(), "context destroyed inside a frame");
        assert_eq!(Arc::strong_count(&self.shared), 1, "thread contexts must be destroyed before the context");

        if let Err(err) = self.wait_idle() {
            log::error!("wait idle failed during context destroy: {}", err);
        }

        let shared = &*self.shared;
        let deferred_count = self.deferred.drain(&shared.device, &shared.descriptors);

        let drained = shared.registry.lock().drain_all();
        let live_count = drained.textures.len() + drained.buffers.len() + drained.samplers.len() + drained.shaders.len();
        for record in drained.textures {
            record.slots().for_each(|slot| shared.descriptors.free(slot));
            shared.device.destroy_texture(record.texture);
        }
        for record in drained.buffers {
            record.slot.into_iter().for_each(|slot| shared.descriptors.free(slot));
            shared.device.destroy_buffer(record.buffer);
        }
        for record in drained.samplers {
            shared.descriptors.free(record.slot);
            shared.device.destroy_sampler(record.sampler);
        }
        for shader in drained.shaders {
            shared.device.destroy_shader(shader);
        }
        log::info!("context resources released: {} deferred, {} live", deferred_count, live_count);

        self.transfer.destroy(&shared.device);
        self.scheduler.destroy(&shared.device);
        self.graphics_queue.destroy(&shared.device);

        match Arc::try_unwrap(self.shared) {
            Ok(shared) => shared.device.destroy(),
            Err(_) => unreachable!("strong count checked above"),
        }
        log::info!("context destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessCommand, HeadlessConfig, ScriptedAcquire, ScriptedPresent};
    use crate::basic::format::TextureFormat;
    use crate::resources::buffer::BufferType;
    use crate::sync::resource_state::{ImageLayout, PipelineStages};
    use crate::test_utils::{TEST_EXTENT, headless_context};

    fn sampled_desc(name: &str) -> TextureDesc {
        TextureDesc::new_2d(4, 4, TextureFormat::Rgba8Unorm, ImageUsage::Sampled).with_name(name)
    }

    fn run_frame(ctx: &mut Context<crate::backend::headless::HeadlessDevice>) {
        ctx.begin_frame().unwrap();
        ctx.end_frame().unwrap();
    }

    #[test]
    fn test_end_to_end_frames() {
        let (mut ctx, probe) = headless_context(HeadlessConfig::default());
        let texture = ctx.create_texture(&sampled_desc("albedo")).unwrap();
        assert_eq!(ctx.image_slot_index(texture), Some(0));
        assert_eq!(ctx.current_frame(), 0);

        {
            let mut cmd = ctx.begin_frame().unwrap();
            let barrier = cmd.transition_image(texture, ImageLayout::ShaderReadOnly);
            assert_eq!(barrier.src, ImageState::UNDEFINED);
            assert_eq!(barrier.dst.layout, ImageLayout::ShaderReadOnly);
            assert_eq!(barrier.dst.stage, PipelineStages::FRAGMENT_SHADER | PipelineStages::COMPUTE_SHADER);
        }
        ctx.end_frame().unwrap();
        assert_eq!(ctx.current_frame(), 1);

        // 第一个 barrier 为 texture 的转换，第二个为 swapchain image → Present
        let submission = probe.last_submission().unwrap();
        let barriers = submission
            .commands
            .iter()
            .filter_map(|command| match command {
                HeadlessCommand::Barrier { images, .. } => Some(images.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(barriers.len(), 2);
        assert_eq!(barriers[0].len(), 1);
        assert_eq!(barriers[0][0].1.dst.layout, ImageLayout::ShaderReadOnly);
        assert_eq!(barriers[1][0].1.dst.layout, ImageLayout::Present);
        assert_eq!(submission.wait_count, 1);
        assert_eq!(submission.signal_count, 1);

        run_frame(&mut ctx);
        assert_eq!(ctx.current_frame(), 0);
        assert_eq!(ctx.frame_id(), 2);
        assert_eq!(ctx.image_slot_index(texture), Some(0));
        assert_eq!(ctx.shared().image_state(texture), ImageState::SHADER_READ);
        assert_eq!(probe.present_count(), 2);

        ctx.destroy();
        assert!(probe.is_destroyed());
        assert_eq!(probe.live_textures(), 0);
        assert_eq!(probe.live_samplers(), 0);
    }

    #[test]
    fn test_frame_waits_for_slot_fence() {
        let (mut ctx, probe) = headless_context(HeadlessConfig {
            auto_signal: false,
            ..Default::default()
        });

        run_frame(&mut ctx);
        run_frame(&mut ctx);
        assert_eq!(probe.submitted_value(0), 2);

        // slot 0 的提交（值 1）还没有完成
        let err = ctx.begin_frame().err().unwrap();
        assert!(matches!(err, GfxError::FenceTimeout { value: 1, .. }));
        assert!(err.is_synchronization());
        assert_eq!(ctx.current_frame(), 0);

        probe.signal_up_to(0, 1);
        run_frame(&mut ctx);
        assert_eq!(ctx.frame_scheduler().slot(0).fence_value(), 3);
        assert_eq!(ctx.current_frame(), 1);

        probe.set_auto_signal(true);
        probe.signal_all();
        ctx.destroy();
    }

    #[test]
    fn test_suboptimal_acquire_recreates_once() {
        let (mut ctx, probe) = headless_context(HeadlessConfig::default());
        assert_eq!(probe.swapchain_creations(), 1);
        assert_eq!(probe.depth_creations(), 1);

        run_frame(&mut ctx);
        probe.script_acquire(ScriptedAcquire::Suboptimal);
        probe.script_acquire(ScriptedAcquire::Suboptimal);
        let acquires_before = probe.acquire_count();
        {
            let cmd = ctx.begin_frame().unwrap();
            assert!(cmd.is_frame());
        }
        // 重建一次，重试一次；重试的结果即使仍是 suboptimal 也会被接受
        assert_eq!(probe.acquire_count() - acquires_before, 2);
        assert_eq!(probe.swapchain_creations(), 2);
        assert_eq!(probe.depth_creations(), 2);
        let swapchain = ctx.frame_scheduler().swapchain();
        assert!(swapchain.current_index() < swapchain.image_count());
        assert_eq!(swapchain.current_index(), 0);
        ctx.end_frame().unwrap();

        ctx.destroy();
        assert_eq!(probe.live_textures(), 0);
    }

    #[test]
    fn test_out_of_date_twice_fails() {
        let (mut ctx, probe) = headless_context(HeadlessConfig::default());
        probe.script_acquire(ScriptedAcquire::OutOfDate);
        probe.script_acquire(ScriptedAcquire::OutOfDate);

        let err = ctx.begin_frame().err().unwrap();
        assert!(matches!(err, GfxError::AcquireNextImageFailed(_)));
        assert_eq!(probe.swapchain_creations(), 2);

        // 失败之后仍然可以继续下一帧
        run_frame(&mut ctx);
        ctx.destroy();
    }

    #[test]
    fn test_failed_present_does_not_wedge_frames() {
        let (mut ctx, probe) = headless_context(HeadlessConfig::default());
        ctx.begin_frame().unwrap();
        probe.script_present(ScriptedPresent::Fail);
        assert!(ctx.end_frame().is_err());
        assert!(!ctx.frame_scheduler().is_recording());

        run_frame(&mut ctx);
        run_frame(&mut ctx);
        assert_eq!(probe.present_count(), 3);
        ctx.destroy();
    }

    #[test]
    fn test_suboptimal_present_recreates() {
        let (mut ctx, probe) = headless_context(HeadlessConfig::default());
        probe.script_present(ScriptedPresent::Suboptimal);
        run_frame(&mut ctx);
        assert_eq!(probe.swapchain_creations(), 2);
        assert_eq!(ctx.current_frame(), 1);

        probe.script_present(ScriptedPresent::OutOfDate);
        run_frame(&mut ctx);
        assert_eq!(probe.swapchain_creations(), 3);
        ctx.destroy();
    }

    #[test]
    fn test_resize_zero_extent_is_deferred() {
        let (mut ctx, probe) = headless_context(HeadlessConfig::default());
        ctx.resize(Extent2D::new(0, 0)).unwrap();
        assert_eq!(probe.swapchain_creations(), 1);
        assert!(ctx.frame_scheduler().resize_pending());

        ctx.resize(Extent2D::new(128, 64)).unwrap();
        assert_eq!(probe.swapchain_creations(), 2);
        assert_eq!(ctx.swapchain_extent(), Extent2D::new(128, 64));

        // 尺寸不变时不会重建
        ctx.resize(Extent2D::new(128, 64)).unwrap();
        assert_eq!(probe.swapchain_creations(), 2);
        assert_ne!(ctx.swapchain_extent(), TEST_EXTENT);
        ctx.destroy();
    }

    #[test]
    fn test_deferred_destroy_waits_for_frame() {
        let (mut ctx, probe) = headless_context(HeadlessConfig {
            auto_signal: false,
            ..Default::default()
        });
        let buffer = ctx.create_buffer(&BufferDesc::new(256, BufferType::Storage, "particles")).unwrap();
        assert_eq!(ctx.shared().buffer_slot_index(buffer), Some(0));

        ctx.begin_frame().unwrap();
        ctx.destroy_buffer(buffer);
        ctx.end_frame().unwrap();
        assert_eq!(probe.live_buffers(), 1);
        assert_eq!(ctx.pending_destroy_count(), 1);

        // 帧的提交完成之后，下一次 begin_frame 才回收
        probe.signal_up_to(0, 1);
        ctx.begin_frame().unwrap();
        assert_eq!(probe.live_buffers(), 0);
        assert_eq!(ctx.pending_destroy_count(), 0);
        ctx.end_frame().unwrap();

        // 回收的 slot 可以被复用
        let reused = ctx.create_buffer(&BufferDesc::new(64, BufferType::Storage, "reused")).unwrap();
        assert_eq!(ctx.shared().buffer_slot_index(reused), Some(0));

        probe.set_auto_signal(true);
        probe.signal_all();
        ctx.destroy();
        assert_eq!(probe.live_buffers(), 0);
    }

    #[test]
    fn test_create_texture_with_data() {
        let (mut ctx, probe) = headless_context(HeadlessConfig::default());
        let data = vec![0xffu8; 4 * 4 * 4];
        let texture = ctx.create_texture_with_data(&sampled_desc("white"), &data).unwrap();

        assert_eq!(ctx.shared().image_state(texture), ImageState::SHADER_READ);
        assert_eq!(probe.live_buffers(), 0, "staging buffer is freed at end_transfer");
        let submission = probe.last_submission().unwrap();
        assert!(submission.commands.iter().any(|c| matches!(c, HeadlessCommand::CopyBufferToTexture { .. })));
        ctx.destroy();
    }

    #[test]
    fn test_failed_texture_upload_releases_texture() {
        let (mut ctx, probe) = headless_context(HeadlessConfig::default());
        let textures_before = probe.live_textures();

        probe.fail_next_submits(1);
        let err = ctx.create_texture_with_data(&sampled_desc("broken"), &[0u8; 64]).unwrap_err();
        assert!(matches!(err, GfxError::SubmitFailed(_)));
        assert_eq!(ctx.shared().registry.lock().texture_count(), 0);
        assert!(!ctx.transfer.is_active());
        assert_eq!(probe.live_buffers(), 0, "staging buffer is freed when the submit fails");
        assert_eq!(ctx.pending_destroy_count(), 1);

        run_frame(&mut ctx);
        assert_eq!(probe.live_textures(), textures_before);

        // 传输作用域与 slot 都可以继续使用
        let texture = ctx.create_texture_with_data(&sampled_desc("white"), &[0xffu8; 64]).unwrap();
        assert_eq!(ctx.image_slot_index(texture), Some(0));
        assert_eq!(ctx.shared().image_state(texture), ImageState::SHADER_READ);
        ctx.destroy();
    }

    #[test]
    fn test_texture_upload_honors_row_pitch_alignment() {
        let (mut ctx, probe) = headless_context(HeadlessConfig {
            row_pitch_alignment: 256,
            ..Default::default()
        });
        let data = vec![0x7fu8; 4 * 4 * 4];
        ctx.create_texture_with_data(&sampled_desc("pitched"), &data).unwrap();

        let submission = probe.last_submission().unwrap();
        assert!(
            submission
                .commands
                .iter()
                .any(|c| matches!(c, HeadlessCommand::CopyBufferToTexture { row_pitch: 256, .. }))
        );
        ctx.destroy();
    }

    #[test]
    fn test_transfer_scope_upload_buffer() {
        let (mut ctx, probe) = headless_context(HeadlessConfig::default());
        let buffer = ctx.create_buffer(&BufferDesc::new(64, BufferType::Storage, "ssbo")).unwrap();
        {
            let mut cmd = ctx.begin_transfer().unwrap();
            assert!(cmd.is_transfer());
            cmd.upload_buffer(buffer, 16, &[1, 2, 3, 4]).unwrap();
        }
        assert_eq!(probe.live_buffers(), 2);
        ctx.end_transfer().unwrap();
        assert_eq!(probe.live_buffers(), 1);
        assert_eq!(probe.completed_value(0), ctx.graphics_queue().last_submitted());
        ctx.destroy();
    }

    #[test]
    fn test_host_visible_buffers() {
        let (ctx, _probe) = headless_context(HeadlessConfig::default());
        let readback = ctx.create_buffer(&BufferDesc::new(16, BufferType::Readback, "readback")).unwrap();
        let uniform = ctx.create_buffer(&BufferDesc::new(16, BufferType::Uniform, "ubo")).unwrap();
        let storage = ctx.create_buffer(&BufferDesc::new(16, BufferType::Storage, "ssbo")).unwrap();

        ctx.upload_to_buffer(readback, 4, bytemuck::bytes_of(&7u32)).unwrap();
        let bytes = ctx.download_buffer(readback, 4, 4).unwrap();
        assert_eq!(bytemuck::pod_read_unaligned::<u32>(&bytes), 7);

        assert!(ctx.map_buffer(uniform).is_ok());
        assert!(matches!(ctx.map_buffer(storage), Err(GfxError::BufferMapFailed(_))));
        assert_ne!(ctx.buffer_address(storage), 0);
        assert_eq!(ctx.shared().buffer_slot_index(uniform), Some(0));
        assert_eq!(ctx.shared().buffer_slot_index(readback), None);
        ctx.destroy();
    }

    #[test]
    fn test_update_image_promotes_temporary() {
        let (mut ctx, probe) = headless_context(HeadlessConfig::default());
        let base = ctx.create_texture(&sampled_desc("base")).unwrap();
        let temp = ctx
            .create_texture(&TextureDesc::new_2d(8, 8, TextureFormat::Rgba8Unorm, ImageUsage::Temporary).with_name("temp"))
            .unwrap();
        assert_eq!(ctx.image_slot_index(temp), None);
        let writes_before = probe.descriptor_writes().len();

        ctx.update_image(base, temp);
        assert_eq!(ctx.image_size(base), Extent2D::new(8, 8));
        assert!(!ctx.shared().contains_image(temp));
        assert_eq!(probe.descriptor_writes().len(), writes_before + 1);
        assert_eq!(ctx.read_only_image_from_index(base.index), base);

        // 旧的 texture 延迟销毁
        assert_eq!(ctx.pending_destroy_count(), 1);
        run_frame(&mut ctx);
        assert_eq!(ctx.pending_destroy_count(), 0);
        ctx.destroy();
        assert_eq!(probe.live_textures(), 0);
    }

    #[test]
    fn test_clear_temp_images() {
        let (mut ctx, probe) = headless_context(HeadlessConfig::default());
        let desc = TextureDesc::new_2d(8, 8, TextureFormat::Rgba16Float, ImageUsage::Temporary);
        for _ in 0..3 {
            ctx.create_texture(&desc).unwrap();
        }
        let textures_before = probe.live_textures();
        ctx.clear_temp_images();
        assert_eq!(ctx.pending_destroy_count(), 3);
        run_frame(&mut ctx);
        assert_eq!(probe.live_textures(), textures_before - 3);
        ctx.destroy();
    }

    #[test]
    fn test_teardown_releases_everything() {
        let (ctx, probe) = headless_context(HeadlessConfig::default());
        ctx.create_texture(&sampled_desc("a")).unwrap();
        ctx.create_texture(&TextureDesc::new_2d(4, 4, TextureFormat::Rgba8Unorm, ImageUsage::SampledReadWrite)).unwrap();
        ctx.create_buffer(&BufferDesc::new(32, BufferType::Index, "ib")).unwrap();
        ctx.create_sampler(&SamplerDesc::nearest_clamp()).unwrap();
        ctx.create_shader(&ShaderDesc::Compute(crate::resources::shader::ComputeShaderDesc::new("cull", &[0u8; 4])))
            .unwrap();

        ctx.destroy();
        assert_eq!(probe.live_textures(), 0);
        assert_eq!(probe.live_buffers(), 0);
        assert_eq!(probe.live_samplers(), 0);
        assert_eq!(probe.live_shaders(), 0);
        assert!(probe.is_destroyed());
    }

    #[test]
    fn test_default_sampler_at_slot_zero() {
        let (ctx, _probe) = headless_context(HeadlessConfig::default());
        assert_eq!(ctx.shared().sampler_slot_index(ctx.default_sampler()), 0);
        let nearest = ctx.create_sampler(&SamplerDesc::nearest_clamp()).unwrap();
        assert_eq!(ctx.shared().sampler_slot_index(nearest), 1);
        ctx.destroy();
    }

    #[test]
    fn test_thread_context_requires_second_queue() {
        let (mut ctx, _probe) = headless_context(HeadlessConfig {
            queue_count: 1,
            ..Default::default()
        });
        assert!(matches!(ctx.create_thread_context(), Err(GfxError::Unsupported(_))));
        ctx.destroy();
    }
}
