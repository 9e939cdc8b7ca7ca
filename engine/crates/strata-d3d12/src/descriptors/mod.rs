pub mod free_list;
pub mod heap_layout;

#[cfg(windows)]
pub mod bindless;
#[cfg(windows)]
pub mod cpu_heap;
