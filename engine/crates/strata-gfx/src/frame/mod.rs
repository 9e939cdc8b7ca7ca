pub mod frame_counter;
pub mod frame_scheduler;
pub mod frame_slot;
pub mod swapchain;
