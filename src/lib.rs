//! Gatekeeper - Distributed Request Admission Control
//!
//! This crate decides, per incoming HTTP request, whether to admit it. Each
//! client is identified by API token or source IP and counted in a fixed
//! one-second window held in a shared store; a client that exceeds its limit
//! is blocked for a configured period. Replicas cooperate only through the
//! store, so the service scales out without in-process coordination.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
