pub mod descriptor_allocator;
