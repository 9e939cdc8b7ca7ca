use std::sync::Arc;

use crate::backend::RhiDevice;
use crate::commands::command_scope::CommandScope;
use crate::commands::queue::Queue;
use crate::commands::transfer::TransferContext;
use crate::context::ContextShared;
use crate::error::GfxResult;
use crate::handles::{BufferHandle, ImageHandle, SamplerHandle};
use crate::resources::buffer::BufferDesc;
use crate::resources::sampler::SamplerDesc;
use crate::resources::texture::TextureDesc;

/// 在其他线程上创建并上传资源
///
/// 拥有 graphics family 中另一个 queue 以及自己的传输作用域，与主线程只共享设备、descriptor 分配器与资源表。
/// 传输作用域结束时会在 CPU 端等待完成，因此上传的资源之后可以直接在主线程的帧中使用。
pub struct ThreadContext<D: RhiDevice> {
    shared: Arc<ContextShared<D>>,
    queue: Queue<D>,
    transfer: TransferContext<D>,
    id: u32,
}

// new & init
impl<D: RhiDevice> ThreadContext<D> {
    pub(crate) fn new(shared: Arc<ContextShared<D>>, queue_index: u32, id: u32) -> GfxResult<Self> {
        let name = format!("thread-{id}");
        let queue = Queue::new(shared.device.create_queue(queue_index, &name)?, &name);
        let transfer = TransferContext::new(&shared.device, &queue, &format!("{name}-transfer"))?;
        log::info!("thread context {} created on graphics queue {}", id, queue_index);
        Ok(Self {
            shared,
            queue,
            transfer,
            id,
        })
    }
}

// transfer
impl<D: RhiDevice> ThreadContext<D> {
    pub fn begin_transfer(&mut self) -> GfxResult<CommandScope<'_, D>> {
        self.transfer.begin()?;
        Ok(self.transfer_commands())
    }

    pub fn transfer_commands(&mut self) -> CommandScope<'_, D> {
        let (recorder, staging) = self.transfer.parts();
        CommandScope::new(&self.shared, recorder, None, Some(staging))
    }

    pub fn end_transfer(&mut self) -> GfxResult<()> {
        self.transfer.end(&self.shared.device, &mut self.queue)
    }
}

// factories
impl<D: RhiDevice> ThreadContext<D> {
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

    /// 上传失败时等待 queue 空闲后立即销毁 texture
    pub fn create_texture_with_data(&mut self, desc: &TextureDesc, data: &[u8]) -> GfxResult<ImageHandle> {
        let handle = self.shared.create_texture(desc)?;
        let uploaded = self.transfer.begin().and_then(|_| {
            let uploaded = self.transfer_commands().upload_texture(handle, data);
            let ended = self.end_transfer();
            uploaded.and(ended)
        });
        if let Err(err) = uploaded {
            log::error!("thread context {} texture {} upload failed: {}", self.id, desc.name, err);
            if let Err(wait_err) = self.queue.wait_idle() {
                log::error!("thread context {} failed to wait idle: {}", self.id, wait_err);
            }
            self.shared.destroy_texture_now(handle);
            return Err(err);
        }
        Ok(handle)
    }
}

// getters
impl<D: RhiDevice> ThreadContext<D> {
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn queue(&self) -> &Queue<D> {
        &self.queue
    }

    #[inline]
    pub fn shared(&self) -> &ContextShared<D> {
        &self.shared
    }
}

// destroy
impl<D: RhiDevice> ThreadContext<D> {
    /// 等待 queue 空闲后销毁，即使等待失败也会释放所有对象
    pub(crate) fn destroy(mut self) -> GfxResult<()> {
        assert!(!self.transfer.is_active(), "thread context {} destroyed inside a transfer scope", self.id);
        let waited = self.queue.wait_idle();
        if let Err(err) = &waited {
            log::error!("thread context {} failed to wait idle: {}", self.id, err);
        }
        self.transfer.destroy(&self.shared.device);
        self.queue.destroy(&self.shared.device);
        log::info!("thread context {} destroyed", self.id);
        waited
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::headless::HeadlessConfig;
    use crate::basic::format::TextureFormat;
    use crate::error::GfxError;
    use crate::handles::ImageUsage;
    use crate::resources::buffer::{BufferDesc, BufferType};
    use crate::resources::texture::TextureDesc;
    use crate::sync::resource_state::ImageState;
    use crate::test_utils::headless_context;

    #[test]
    fn test_upload_on_worker_thread() {
        let (mut ctx, probe) = headless_context(HeadlessConfig::default());
        let mut worker = ctx.create_thread_context().unwrap();
        assert_eq!(worker.id(), 0);

        let (texture, buffer) = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let desc = TextureDesc::new_2d(2, 2, TextureFormat::Rgba8Unorm, ImageUsage::Sampled);
                    let texture = worker.create_texture_with_data(&desc, &[0x80; 16]).unwrap();

                    let buffer = worker.create_buffer(&BufferDesc::new(32, BufferType::Storage, "vertices")).unwrap();
                    {
                        let mut cmd = worker.begin_transfer().unwrap();
                        cmd.upload_buffer(buffer, 0, &[7u8; 32]).unwrap();
                    }
                    worker.end_transfer().unwrap();
                    (texture, buffer)
                })
                .join()
                .unwrap()
        });

        // 在 thread context 上创建的资源对主线程可见
        assert_eq!(ctx.shared().image_state(texture), ImageState::SHADER_READ);
        assert_eq!(ctx.image_slot_index(texture), Some(0));
        assert_eq!(ctx.shared().buffer_slot_index(buffer), Some(0));
        assert_eq!(worker.queue().last_submitted(), 2);
        assert_eq!(ctx.graphics_queue().last_submitted(), 0);

        ctx.begin_frame().unwrap();
        ctx.end_frame().unwrap();

        ctx.destroy_thread_context(worker).unwrap();
        ctx.destroy();
        assert_eq!(probe.live_buffers(), 0);
        assert_eq!(probe.live_textures(), 0);
    }

    #[test]
    fn test_failed_upload_on_worker_releases_texture() {
        let (mut ctx, probe) = headless_context(HeadlessConfig::default());
        let textures_before = probe.live_textures();
        let mut worker = ctx.create_thread_context().unwrap();
        let desc = TextureDesc::new_2d(2, 2, TextureFormat::Rgba8Unorm, ImageUsage::Sampled);

        probe.fail_next_submits(1);
        assert!(matches!(worker.create_texture_with_data(&desc, &[0x80; 16]), Err(GfxError::SubmitFailed(_))));
        assert_eq!(ctx.shared().registry.lock().texture_count(), 0);
        assert_eq!(probe.live_textures(), textures_before);
        assert_eq!(probe.live_buffers(), 0);

        // 失败之后 slot 归还，传输作用域可以继续使用
        let texture = worker.create_texture_with_data(&desc, &[0x80; 16]).unwrap();
        assert_eq!(ctx.image_slot_index(texture), Some(0));

        ctx.destroy_thread_context(worker).unwrap();
        ctx.destroy();
        assert_eq!(probe.live_textures(), 0);
    }

    #[test]
    #[should_panic(expected = "thread contexts must be destroyed before the context")]
    fn test_context_destroy_with_live_thread_context_panics() {
        let (mut ctx, _probe) = headless_context(HeadlessConfig::default());
        let _worker = ctx.create_thread_context().unwrap();
        ctx.destroy();
    }
}
