//! Shared counter store contract and its adapters.
//!
//! All cross-replica state lives behind [`CounterStore`]. The admission
//! engine never sweeps or deletes keys itself: window resets and block
//! expiry rely entirely on the store enforcing TTLs.

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The operation did not complete within the allotted time.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store answered with something we could not interpret.
    #[error("store protocol error: {0}")]
    Protocol(String),
}

/// Key-value contract shared by every replica enforcing the same limits.
///
/// Implementations must be safe to call concurrently against the same key.
/// `set_block` and `is_blocked` receive the counter key; the implementation
/// derives the block key with [`block_key`].
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter at `key` by one and, only if the key had no
    /// expiry, set it to `ttl`. Returns the post-increment value.
    ///
    /// The increment and the conditional expiry form a single atomic unit.
    async fn increment_and_expire(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Current counter value, or 0 when the key is absent or expired.
    async fn get_value(&self, key: &str) -> Result<u64, StoreError>;

    /// Mark `key` as blocked for `ttl`.
    async fn set_block(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Whether an unexpired block flag exists for `key`.
    async fn is_blocked(&self, key: &str) -> Result<bool, StoreError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Prefix distinguishing block flags from counters in the shared keyspace.
pub const BLOCK_PREFIX: &str = "block:";

/// Block flag key for a counter key.
pub fn block_key(key: &str) -> String {
    format!("{}{}", BLOCK_PREFIX, key)
}
