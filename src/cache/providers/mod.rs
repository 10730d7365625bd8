//! Cache tier implementations

pub mod durable;
pub mod memory;

pub use durable::{ConnectionStatus, DurableCache, DurableCacheOptions};
pub use memory::MemoryCache;
