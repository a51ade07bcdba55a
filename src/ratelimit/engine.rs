//! Fixed-window admission engine.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::backend::AdmissionBackend;
use super::identity::Identity;
use super::limits::LimitTable;
use crate::error::Result;
use crate::store::{CounterStore, StoreError};

/// Default bound on a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Over the limit in the current window, or inside a block period
    RateLimited,
    /// The presented token is not in the limit table
    UnregisteredCredential,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::RateLimited => write!(f, "rate limited"),
            DenyReason::UnregisteredCredential => write!(f, "unregistered credential"),
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Decides per request whether to admit it.
///
/// The engine keeps no state of its own: counters and block flags live in
/// the shared store, so any number of replicas can enforce the same limits.
pub struct AdmissionEngine<S> {
    store: Arc<S>,
    limits: Arc<LimitTable>,
    store_timeout: Duration,
}

impl<S> Clone for AdmissionEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            limits: Arc::clone(&self.limits),
            store_timeout: self.store_timeout,
        }
    }
}

impl<S: CounterStore> AdmissionEngine<S> {
    pub fn new(store: Arc<S>, limits: LimitTable) -> Self {
        Self {
            store,
            limits: Arc::new(limits),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Bound every store call by `timeout`.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn limits(&self) -> &LimitTable {
        &self.limits
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Whether `token` appears in the limit table.
    pub fn is_token_registered(&self, token: &str) -> bool {
        self.limits.tokens.contains(token)
    }

    /// Resolve the identity (token over IP) and decide.
    pub async fn check(&self, token: Option<&str>, ip: &str) -> Result<Decision> {
        self.decide(&Identity::resolve(token, ip)).await
    }

    /// Decide whether `identity` may make another request.
    ///
    /// An unregistered token is refused without touching the store. An
    /// active block flag refuses without counting. Otherwise the request is
    /// counted and, when the count passes the limit, the identity is blocked.
    pub async fn decide(&self, identity: &Identity) -> Result<Decision> {
        let Some(limit) = self.limits.limit_for(identity) else {
            debug!(kind = %identity.kind(), "Unregistered token refused");
            return Ok(Decision::Denied(DenyReason::UnregisteredCredential));
        };

        let key = identity.rate_key();
        trace!(key = %key, limit, "Checking admission");

        if self.bounded(self.store.is_blocked(key.as_str())).await? {
            debug!(key = %key, "Identity is blocked");
            return Ok(Decision::Denied(DenyReason::RateLimited));
        }

        let count = self
            .bounded(self.store.increment_and_expire(key.as_str(), self.limits.window))
            .await?;

        if count > limit {
            debug!(
                key = %key,
                count,
                limit,
                block_secs = self.limits.block_duration.as_secs(),
                "Limit exceeded, blocking identity"
            );
            self.bounded(self.store.set_block(key.as_str(), self.limits.block_duration))
                .await?;
            return Ok(Decision::Denied(DenyReason::RateLimited));
        }

        Ok(Decision::Allowed)
    }

    /// Run a store call under the configured timeout.
    async fn bounded<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        let outcome = match tokio::time::timeout(self.store_timeout, op).await {
            Ok(outcome) => outcome,
            Err(_) => Err(StoreError::Timeout(self.store_timeout)),
        };
        outcome.map_err(|e| {
            warn!(store = self.store.name(), error = %e, "Store operation failed");
            e.into()
        })
    }
}

#[async_trait]
impl<S: CounterStore + 'static> AdmissionBackend for AdmissionEngine<S> {
    async fn check(&self, token: Option<&str>, ip: &str) -> Result<Decision> {
        AdmissionEngine::check(self, token, ip).await
    }

    fn is_token_registered(&self, token: &str) -> bool {
        AdmissionEngine::is_token_registered(self, token)
    }
}
