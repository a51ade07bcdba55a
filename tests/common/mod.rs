//! Store doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use gatekeeper::store::{CounterStore, MemoryStore, StoreError};

/// A store operation as seen by [`RecordingStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Increment(String),
    Get(String),
    SetBlock(String),
    IsBlocked(String),
}

/// Memory store that records every call made against it.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    calls: Mutex<Vec<Call>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn increments(&self, key: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, Call::Increment(k) if k == key))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl CounterStore for RecordingStore {
    async fn increment_and_expire(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        self.record(Call::Increment(key.to_string()));
        self.inner.increment_and_expire(key, ttl).await
    }

    async fn get_value(&self, key: &str) -> Result<u64, StoreError> {
        self.record(Call::Get(key.to_string()));
        self.inner.get_value(key).await
    }

    async fn set_block(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.record(Call::SetBlock(key.to_string()));
        self.inner.set_block(key, ttl).await
    }

    async fn is_blocked(&self, key: &str) -> Result<bool, StoreError> {
        self.record(Call::IsBlocked(key.to_string()));
        self.inner.is_blocked(key).await
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// A store that is never reachable.
pub struct FailingStore;

pub const FAILURE_DETAIL: &str = "connection refused by 10.9.8.7:6379";

#[async_trait]
impl CounterStore for FailingStore {
    async fn increment_and_expire(&self, _: &str, _: Duration) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable(FAILURE_DETAIL.to_string()))
    }

    async fn get_value(&self, _: &str) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable(FAILURE_DETAIL.to_string()))
    }

    async fn set_block(&self, _: &str, _: Duration) -> Result<(), StoreError> {
        Err(StoreError::Unavailable(FAILURE_DETAIL.to_string()))
    }

    async fn is_blocked(&self, _: &str) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable(FAILURE_DETAIL.to_string()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Recording store whose `is_blocked` holds until [`GatedStore::release`].
#[derive(Default)]
pub struct GatedStore {
    recorded: RecordingStore,
    entered: Notify,
    gate: Notify,
}

impl GatedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> &RecordingStore {
        &self.recorded
    }

    /// Resolves once a check is waiting at the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let one waiting (or the next) `is_blocked` call through.
    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl CounterStore for GatedStore {
    async fn increment_and_expire(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        self.recorded.increment_and_expire(key, ttl).await
    }

    async fn get_value(&self, key: &str) -> Result<u64, StoreError> {
        self.recorded.get_value(key).await
    }

    async fn set_block(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.recorded.set_block(key, ttl).await
    }

    async fn is_blocked(&self, key: &str) -> Result<bool, StoreError> {
        let blocked = self.recorded.is_blocked(key).await?;
        self.entered.notify_one();
        self.gate.notified().await;
        Ok(blocked)
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}
