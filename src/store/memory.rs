//! In-process counter store.
//!
//! Backs a single replica, and doubles as the store used by tests. Expiry is
//! enforced on every access using the tokio clock, so paused-time tests can
//! step through windows and block periods deterministically.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{block_key, CounterStore, StoreError};

/// A stored value and its optional deadline.
#[derive(Debug, Clone, Copy)]
struct Slot {
    value: u64,
    expires_at: Option<Instant>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            value: 0,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if now >= deadline)
    }
}

/// Concurrent in-memory store.
///
/// The per-shard entry lock held during [`CounterStore::increment_and_expire`]
/// makes the increment and conditional expiry atomic per key.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slots: Arc<DashMap<String, Slot>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired counters and block flags. Returns how many were removed.
    ///
    /// Correctness never depends on this; it only reclaims memory.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.is_expired(now));
        let removed = before.saturating_sub(self.slots.len());
        if removed > 0 {
            debug!(removed, remaining = self.slots.len(), "Swept expired keys");
        }
        removed
    }

    /// Number of keys held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Remaining time to live of `key`, if it exists and has an expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let slot = self.slots.get(key)?;
        match slot.expires_at {
            Some(deadline) if deadline > now => Some(deadline - now),
            _ => None,
        }
    }

    fn live_value(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        match self.slots.get(key) {
            Some(slot) if !slot.is_expired(now) => Some(slot.value),
            _ => None,
        }
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_and_expire(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(Slot::empty);

        if slot.is_expired(now) {
            *slot = Slot::empty();
        }

        slot.value += 1;
        if slot.expires_at.is_none() {
            slot.expires_at = Some(now + ttl);
        }

        trace!(key, value = slot.value, "Incremented counter");
        Ok(slot.value)
    }

    async fn get_value(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.live_value(key).unwrap_or(0))
    }

    async fn set_block(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.slots.insert(
            block_key(key),
            Slot {
                value: 1,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn is_blocked(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live_value(&block_key(key)) == Some(1))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
