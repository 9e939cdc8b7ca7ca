pub mod bindless;
pub mod shader;
