use crate::basic::format::TextureFormat;
use crate::sync::resource_state::{BufferState, ImageAspect, ImageLayout, ImageState};

/// 一次 image 状态转换对应的 barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrierDesc {
    pub src: ImageState,
    pub dst: ImageState,
    pub aspect: ImageAspect,
}

/// 一次 buffer 状态转换对应的 barrier，作用于整个 buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrierDesc {
    pub src: BufferState,
    pub dst: BufferState,
}

/// 资源状态追踪
///
/// 资源的当前状态保存在资源记录自身之中，这里只负责根据当前状态与目标状态生成 barrier，
/// 并将当前状态更新为目标状态。即使前后状态完全相同也会生成 barrier 并更新状态。
pub struct ResourceStateTracker;

impl ResourceStateTracker {
    pub fn aspect_of(format: TextureFormat) -> ImageAspect {
        if format.has_stencil() {
            ImageAspect::DepthStencil
        } else if format.is_depth() {
            ImageAspect::Depth
        } else {
            ImageAspect::Color
        }
    }

    pub fn transition_image(current: &mut ImageState, new: ImageState, format: TextureFormat) -> ImageBarrierDesc {
        debug_assert!(new.layout != ImageLayout::Undefined, "can not transition image to Undefined layout");
        debug_assert!(
            !(format.is_depth() && new.layout.is_color_only()),
            "can not transition depth image ({:?}) to color layout {:?}",
            format,
            new.layout
        );
        debug_assert!(
            !(!format.is_depth() && new.layout.is_depth_only()),
            "can not transition color image ({:?}) to depth layout {:?}",
            format,
            new.layout
        );

        let barrier = ImageBarrierDesc {
            src: *current,
            dst: new,
            aspect: Self::aspect_of(format),
        };
        *current = new;
        barrier
    }

    pub fn transition_buffer(current: &mut BufferState, new: BufferState) -> BufferBarrierDesc {
        let barrier = BufferBarrierDesc { src: *current, dst: new };
        *current = new;
        barrier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::resource_state::{AccessFlags, PipelineStages};

    #[test]
    fn test_transition_updates_state() {
        let mut state = ImageState::UNDEFINED;
        let barrier = ResourceStateTracker::transition_image(
            &mut state,
            ImageState::for_layout(ImageLayout::ShaderReadOnly),
            TextureFormat::Rgba8Unorm,
        );

        assert_eq!(state, ImageState::SHADER_READ);
        assert_eq!(barrier.src, ImageState::UNDEFINED);
        assert_eq!(barrier.dst, ImageState::SHADER_READ);
        assert_eq!(barrier.aspect, ImageAspect::Color);
    }

    #[test]
    fn test_repeated_transition_still_emits() {
        let mut state = ImageState::GENERAL;
        let barrier = ResourceStateTracker::transition_image(&mut state, ImageState::GENERAL, TextureFormat::Rgba8Unorm);
        assert_eq!(barrier.src, barrier.dst);
        assert_eq!(state, ImageState::GENERAL);
    }

    #[test]
    fn test_layout_table() {
        let cases = [
            (ImageLayout::General, PipelineStages::ALL_COMMANDS, AccessFlags::MEMORY_READ | AccessFlags::MEMORY_WRITE),
            (ImageLayout::ColorAttachment, PipelineStages::COLOR_ATTACHMENT_OUTPUT, AccessFlags::COLOR_ATTACHMENT_READ | AccessFlags::COLOR_ATTACHMENT_WRITE),
            (ImageLayout::TransferSrc, PipelineStages::TRANSFER, AccessFlags::TRANSFER_READ),
            (ImageLayout::TransferDst, PipelineStages::TRANSFER, AccessFlags::TRANSFER_WRITE),
            (ImageLayout::Present, PipelineStages::BOTTOM_OF_PIPE, AccessFlags::empty()),
        ];
        for (layout, stage, access) in cases {
            let state = ImageState::for_layout(layout);
            assert_eq!(state.layout, layout);
            assert_eq!(state.stage, stage);
            assert_eq!(state.access, access);
        }
    }

    #[test]
    fn test_depth_aspect() {
        let mut state = ImageState::UNDEFINED;
        let barrier =
            ResourceStateTracker::transition_image(&mut state, ImageState::DEPTH_ATTACHMENT, TextureFormat::D32Float);
        assert_eq!(barrier.aspect, ImageAspect::Depth);

        let mut state = ImageState::UNDEFINED;
        let barrier = ResourceStateTracker::transition_image(
            &mut state,
            ImageState::DEPTH_STENCIL_ATTACHMENT,
            TextureFormat::D24UnormS8Uint,
        );
        assert_eq!(barrier.aspect, ImageAspect::DepthStencil);
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn test_transition_to_undefined_asserts() {
        let mut state = ImageState::GENERAL;
        ResourceStateTracker::transition_image(&mut state, ImageState::UNDEFINED, TextureFormat::Rgba8Unorm);
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn test_depth_to_color_layout_asserts() {
        let mut state = ImageState::UNDEFINED;
        ResourceStateTracker::transition_image(&mut state, ImageState::COLOR_ATTACHMENT, TextureFormat::D32Float);
    }

    #[test]
    fn test_buffer_transition() {
        let mut state = BufferState::UNDEFINED;
        let barrier = ResourceStateTracker::transition_buffer(&mut state, BufferState::TRANSFER_DST);
        assert_eq!(barrier.src, BufferState::UNDEFINED);
        assert_eq!(state, BufferState::TRANSFER_DST);
        assert!(state.is_write());
    }
}
