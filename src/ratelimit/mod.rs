//! Admission decisions and the data they are keyed on.

mod backend;
mod engine;
mod identity;
mod limits;

pub use backend::AdmissionBackend;
pub use engine::{AdmissionEngine, Decision, DenyReason, DEFAULT_STORE_TIMEOUT};
pub use identity::{Identity, IdentityKind, RateKey};
pub use limits::{LimitTable, TokenLimits, WINDOW};
