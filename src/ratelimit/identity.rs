//! Client identities and the store keys derived from them.

use std::fmt;

use crate::store::block_key;

/// Namespace shared by every counter key.
const KEY_NAMESPACE: &str = "ratelimit";

/// The dimension a limit is enforced against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    /// Source IP address
    Ip,
    /// API credential
    Token,
}

impl IdentityKind {
    /// Segment used in the store key.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::Ip => "ip",
            IdentityKind::Token => "token",
        }
    }
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a request is counted against. Derived per request, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Ip(String),
    Token(String),
}

impl Identity {
    /// Pick the identity for a request: a non-empty token always wins over
    /// the IP address.
    pub fn resolve(token: Option<&str>, ip: &str) -> Self {
        match token {
            Some(token) if !token.is_empty() => Identity::Token(token.to_string()),
            _ => Identity::Ip(ip.to_string()),
        }
    }

    pub fn kind(&self) -> IdentityKind {
        match self {
            Identity::Ip(_) => IdentityKind::Ip,
            Identity::Token(_) => IdentityKind::Token,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Identity::Ip(value) | Identity::Token(value) => value,
        }
    }

    /// The counter key for this identity.
    pub fn rate_key(&self) -> RateKey {
        RateKey::new(self.kind(), self.value())
    }
}

/// Store key under which an identity's counter lives.
///
/// Rendered as `ratelimit:<kind>:<value>`; deployments sharing a store rely
/// on this exact layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey(String);

impl RateKey {
    pub fn new(kind: IdentityKind, value: &str) -> Self {
        Self(format!("{}:{}:{}", KEY_NAMESPACE, kind.as_str(), value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the block flag paired with this counter.
    pub fn block_key(&self) -> String {
        block_key(&self.0)
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RateKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
