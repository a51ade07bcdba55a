//! Object-safe admission trait used at the HTTP edge.

use async_trait::async_trait;

use super::engine::Decision;
use crate::error::Result;

/// Trait for admission engine implementations.
///
/// This trait erases the store type of an `AdmissionEngine`, so the HTTP
/// layer can hold whichever engine the process built at startup.
#[async_trait]
pub trait AdmissionBackend: Send + Sync {
    /// Decide for a request carrying an optional token from the given IP.
    async fn check(&self, token: Option<&str>, ip: &str) -> Result<Decision>;

    /// Whether `token` is registered in the limit table.
    fn is_token_registered(&self, token: &str) -> bool;
}
