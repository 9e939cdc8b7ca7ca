pub mod barrier_batch;
pub mod command_recorder;
pub mod command_scope;
pub mod queue;
pub mod submit_info;
pub mod transfer;
