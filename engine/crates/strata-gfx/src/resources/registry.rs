use slotmap::SlotMap;

use crate::backend::RhiDevice;
use crate::handles::{BufferHandle, BufferLocation, HANDLE_INDEX_MAX, ImageArray, ImageHandle, SamplerHandle, ShaderHandle};
use crate::resources::buffer::BufferRecord;
use crate::resources::handle_table::HandleTable;
use crate::resources::sampler::SamplerRecord;
use crate::resources::texture::TextureRecord;

/// 所有存活资源的注册表
///
/// image 按用途分为 writable / sampled / temporary 三个数组，buffer 分为 device / readback 两个数组，
/// 句柄中的 tag 决定了 index 指向哪个数组。
pub struct ResourceRegistry<D: RhiDevice> {
    writable_images: HandleTable<TextureRecord<D>>,
    sampled_images: HandleTable<TextureRecord<D>>,
    temporary_images: HandleTable<TextureRecord<D>>,

    device_buffers: HandleTable<BufferRecord<D>>,
    readback_buffers: HandleTable<BufferRecord<D>>,

    samplers: HandleTable<SamplerRecord<D>>,
    shaders: SlotMap<ShaderHandle, D::Shader>,
}

/// teardown 时从注册表中取出的全部资源
pub struct DrainedResources<D: RhiDevice> {
    pub textures: Vec<TextureRecord<D>>,
    pub buffers: Vec<BufferRecord<D>>,
    pub samplers: Vec<SamplerRecord<D>>,
    pub shaders: Vec<D::Shader>,
}

impl<D: RhiDevice> Default for ResourceRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl<D: RhiDevice> ResourceRegistry<D> {
    pub fn new() -> Self {
        Self {
            writable_images: HandleTable::new(),
            sampled_images: HandleTable::new(),
            temporary_images: HandleTable::new(),
            device_buffers: HandleTable::new(),
            readback_buffers: HandleTable::new(),
            samplers: HandleTable::new(),
            shaders: SlotMap::with_key(),
        }
    }
}

// tools
impl<D: RhiDevice> ResourceRegistry<D> {
    #[inline]
    fn image_table(&self, array: ImageArray) -> &HandleTable<TextureRecord<D>> {
        match array {
            ImageArray::Writable => &self.writable_images,
            ImageArray::Sampled => &self.sampled_images,
            ImageArray::Temporary => &self.temporary_images,
        }
    }

    #[inline]
    fn image_table_mut(&mut self, array: ImageArray) -> &mut HandleTable<TextureRecord<D>> {
        match array {
            ImageArray::Writable => &mut self.writable_images,
            ImageArray::Sampled => &mut self.sampled_images,
            ImageArray::Temporary => &mut self.temporary_images,
        }
    }

    #[inline]
    fn buffer_table(&self, location: BufferLocation) -> &HandleTable<BufferRecord<D>> {
        match location {
            BufferLocation::Device => &self.device_buffers,
            BufferLocation::Readback => &self.readback_buffers,
        }
    }

    #[inline]
    fn buffer_table_mut(&mut self, location: BufferLocation) -> &mut HandleTable<BufferRecord<D>> {
        match location {
            BufferLocation::Device => &mut self.device_buffers,
            BufferLocation::Readback => &mut self.readback_buffers,
        }
    }
}

// register
impl<D: RhiDevice> ResourceRegistry<D> {
    pub fn register_texture(&mut self, record: TextureRecord<D>) -> ImageHandle {
        let usage = record.desc.usage;
        let index = self.image_table_mut(usage.into()).insert(record);
        assert!(index <= HANDLE_INDEX_MAX, "image array overflow");
        ImageHandle::new(index, usage)
    }

    pub fn register_buffer(&mut self, record: BufferRecord<D>) -> BufferHandle {
        let location = record.desc.ty.location();
        let index = self.buffer_table_mut(location).insert(record);
        assert!(index <= HANDLE_INDEX_MAX, "buffer array overflow");
        BufferHandle::new(index, location)
    }

    pub fn register_sampler(&mut self, record: SamplerRecord<D>) -> SamplerHandle {
        SamplerHandle(self.samplers.insert(record))
    }

    pub fn register_shader(&mut self, shader: D::Shader) -> ShaderHandle {
        self.shaders.insert(shader)
    }
}

// unregister
impl<D: RhiDevice> ResourceRegistry<D> {
    pub fn remove_texture(&mut self, handle: ImageHandle) -> TextureRecord<D> {
        self.image_table_mut(handle.array()).remove(handle.index)
    }

    pub fn remove_buffer(&mut self, handle: BufferHandle) -> BufferRecord<D> {
        self.buffer_table_mut(handle.location).remove(handle.index)
    }

    pub fn remove_sampler(&mut self, handle: SamplerHandle) -> SamplerRecord<D> {
        self.samplers.remove(handle.0)
    }

    pub fn remove_shader(&mut self, handle: ShaderHandle) -> D::Shader {
        self.shaders.remove(handle).unwrap_or_else(|| panic!("invalid shader handle {:?}", handle))
    }

    /// 移除所有 temporary image
    pub fn drain_temporary_images(&mut self) -> Vec<TextureRecord<D>> {
        self.temporary_images.drain().into_iter().map(|(_, record)| record).collect()
    }

    pub fn drain_all(&mut self) -> DrainedResources<D> {
        let textures = [&mut self.writable_images, &mut self.sampled_images, &mut self.temporary_images]
            .into_iter()
            .flat_map(|table| table.drain().into_iter().map(|(_, record)| record))
            .collect();
        let buffers = [&mut self.device_buffers, &mut self.readback_buffers]
            .into_iter()
            .flat_map(|table| table.drain().into_iter().map(|(_, record)| record))
            .collect();
        let samplers = self.samplers.drain().into_iter().map(|(_, record)| record).collect();
        let shaders = self.shaders.drain().map(|(_, shader)| shader).collect();

        DrainedResources {
            textures,
            buffers,
            samplers,
            shaders,
        }
    }
}

// getter & iter
impl<D: RhiDevice> ResourceRegistry<D> {
    #[inline]
    pub fn texture(&self, handle: ImageHandle) -> &TextureRecord<D> {
        self.image_table(handle.array()).get(handle.index)
    }

    #[inline]
    pub fn texture_mut(&mut self, handle: ImageHandle) -> &mut TextureRecord<D> {
        self.image_table_mut(handle.array()).get_mut(handle.index)
    }

    #[inline]
    pub fn contains_texture(&self, handle: ImageHandle) -> bool {
        self.image_table(handle.array()).try_get(handle.index).is_some_and(|record| record.desc.usage == handle.usage)
    }

    #[inline]
    pub fn buffer(&self, handle: BufferHandle) -> &BufferRecord<D> {
        self.buffer_table(handle.location).get(handle.index)
    }

    #[inline]
    pub fn buffer_mut(&mut self, handle: BufferHandle) -> &mut BufferRecord<D> {
        self.buffer_table_mut(handle.location).get_mut(handle.index)
    }

    #[inline]
    pub fn sampler(&self, handle: SamplerHandle) -> &SamplerRecord<D> {
        self.samplers.get(handle.0)
    }

    #[inline]
    pub fn shader(&self, handle: ShaderHandle) -> &D::Shader {
        self.shaders.get(handle).unwrap_or_else(|| panic!("invalid shader handle {:?}", handle))
    }

    pub fn texture_count(&self) -> usize {
        self.writable_images.len() + self.sampled_images.len() + self.temporary_images.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.device_buffers.len() + self.readback_buffers.len()
    }

    pub fn temporary_image_count(&self) -> usize {
        self.temporary_images.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessDevice;
    use crate::basic::format::TextureFormat;
    use crate::handles::ImageUsage;
    use crate::resources::buffer::{BufferDesc, BufferType};
    use crate::resources::texture::TextureDesc;
    use crate::sync::resource_state::{BufferState, ImageState};

    fn texture_record(device: &HeadlessDevice, usage: ImageUsage) -> TextureRecord<HeadlessDevice> {
        let desc = TextureDesc::new_2d(4, 4, TextureFormat::Rgba8Unorm, usage);
        TextureRecord {
            texture: device.create_texture(&desc).unwrap(),
            desc,
            state: ImageState::UNDEFINED,
            sampled_slot: None,
            storage_slot: None,
        }
    }

    #[test]
    fn test_images_use_separate_arrays() {
        let device = HeadlessDevice::default();
        let mut registry = ResourceRegistry::<HeadlessDevice>::new();

        let sampled = registry.register_texture(texture_record(&device, ImageUsage::Sampled));
        let writable = registry.register_texture(texture_record(&device, ImageUsage::ReadWrite));
        let temp = registry.register_texture(texture_record(&device, ImageUsage::Temporary));

        // 每个数组的索引都从 0 开始
        assert_eq!(sampled.index, 0);
        assert_eq!(writable.index, 0);
        assert_eq!(temp.index, 0);
        assert_eq!(registry.texture(sampled).desc().usage, ImageUsage::Sampled);
        assert_eq!(registry.texture(writable).desc().usage, ImageUsage::ReadWrite);

        // packed handle 解包后仍然指向同一个资源
        let unpacked = ImageHandle::unpack(temp.pack()).unwrap();
        assert!(registry.contains_texture(unpacked));
        assert_eq!(registry.temporary_image_count(), 1);
    }

    #[test]
    fn test_readback_buffer_array() {
        let device = HeadlessDevice::default();
        let mut registry = ResourceRegistry::<HeadlessDevice>::new();
        let desc = BufferDesc::new(64, BufferType::Readback, "readback");
        let handle = registry.register_buffer(BufferRecord {
            buffer: device.create_buffer(&desc).unwrap(),
            desc,
            state: BufferState::UNDEFINED,
            slot: None,
        });
        assert_eq!(handle.location, BufferLocation::Readback);
        assert_eq!(registry.buffer_count(), 1);
    }

    #[test]
    fn test_drain_all() {
        let device = HeadlessDevice::default();
        let mut registry = ResourceRegistry::<HeadlessDevice>::new();
        registry.register_texture(texture_record(&device, ImageUsage::Sampled));
        registry.register_texture(texture_record(&device, ImageUsage::Temporary));

        let drained = registry.drain_all();
        assert_eq!(drained.textures.len(), 2);
        assert_eq!(registry.texture_count(), 0);
    }
}
