//! Configured limits, fixed for the lifetime of the process.

use std::collections::HashMap;
use std::time::Duration;

use super::identity::Identity;
use crate::config::RateLimitingConfig;

/// Length of a counting window.
pub const WINDOW: Duration = Duration::from_secs(1);

/// Per-second limits for registered API tokens.
///
/// A token missing from this table is unregistered and always refused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenLimits {
    limits: HashMap<String, u64>,
}

impl TokenLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &str) -> Option<u64> {
        self.limits.get(token).copied()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.limits.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.limits.iter().map(|(token, limit)| (token.as_str(), *limit))
    }
}

impl From<HashMap<String, u64>> for TokenLimits {
    fn from(limits: HashMap<String, u64>) -> Self {
        Self { limits }
    }
}

impl<T: Into<String>> FromIterator<(T, u64)> for TokenLimits {
    fn from_iter<I: IntoIterator<Item = (T, u64)>>(iter: I) -> Self {
        Self {
            limits: iter
                .into_iter()
                .map(|(token, limit)| (token.into(), limit))
                .collect(),
        }
    }
}

/// Everything the engine needs to judge a request.
#[derive(Debug, Clone)]
pub struct LimitTable {
    /// Requests per window allowed for any single IP
    pub ip_limit: u64,
    /// Registered tokens and their limits
    pub tokens: TokenLimits,
    /// How long an identity stays blocked once over its limit
    pub block_duration: Duration,
    /// Counting window
    pub window: Duration,
}

impl LimitTable {
    /// A table with no registered tokens.
    pub fn new(ip_limit: u64, block_duration: Duration) -> Self {
        Self {
            ip_limit,
            tokens: TokenLimits::new(),
            block_duration,
            window: WINDOW,
        }
    }

    pub fn with_tokens(mut self, tokens: impl Into<TokenLimits>) -> Self {
        self.tokens = tokens.into();
        self
    }

    /// Build the table from loaded configuration.
    pub fn from_config(config: &RateLimitingConfig) -> Self {
        Self::new(config.ip_limit, config.block_duration())
            .with_tokens(TokenLimits::from(config.resolved_tokens()))
    }

    /// The limit for an identity, or `None` for an unregistered token.
    pub fn limit_for(&self, identity: &Identity) -> Option<u64> {
        match identity {
            Identity::Ip(_) => Some(self.ip_limit),
            Identity::Token(token) => self.tokens.get(token),
        }
    }
}
