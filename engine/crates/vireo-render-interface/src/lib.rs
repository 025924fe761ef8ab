pub mod buffer_pool;
pub mod frame_counter;
pub mod frame_info;
pub mod gpu_resource_manager;
pub mod handles;
pub mod scratch_arena;
