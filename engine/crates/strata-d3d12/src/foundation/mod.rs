pub mod adapter;
pub mod device;
pub mod info_queue;
