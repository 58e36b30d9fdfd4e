//! Caching layer
//!
//! This module provides the bounded caches the runtime relies on:
//! - `EvictionCache`: a fixed-capacity LRU with an eviction callback
//! - `ConnectivityCache`: remembers URLs known to be reachable
//! - `OptimisticConnectivityCache`: assumes reachability until a probe fails

mod connectivity;
mod lru;

pub use connectivity::{probe, ConnectivityCache, ConnectivityEntry, OptimisticConnectivityCache};
pub use lru::{EvictCallback, EvictionCache};

use thiserror::Error;

/// Errors raised while building caches
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache capacity must be positive, got {0}")]
    InvalidCapacity(usize),

    #[error("Cache TTL out of range: {0} minutes")]
    InvalidTtl(u64),
}
