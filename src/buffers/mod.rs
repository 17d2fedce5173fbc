pub mod buffer_pool;
pub mod fixed_buffer;
pub mod snapshot_map;
