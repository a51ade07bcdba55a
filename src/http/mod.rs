//! HTTP edge: admission middleware and the server that hosts it.

pub mod middleware;
mod server;

pub use middleware::{admit, AdmissionState, ErrorBody};
pub use server::{
    router, router_with_timeout, serve_on, HttpServer, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
