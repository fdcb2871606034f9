pub mod backoff;
pub mod kafka;
pub mod memory;
pub mod partitioner;
