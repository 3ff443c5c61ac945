//! Storage collaborators: contracts, in-memory doubles and the Redis adapter.

pub mod memory;
pub mod redis;
pub mod traits;
