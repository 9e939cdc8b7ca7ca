pub mod buffer;
pub mod deferred_destroy;
pub mod handle_table;
pub mod registry;
pub mod sampler;
pub mod shader;
pub mod texture;
