//! Admission middleware: identity extraction and status mapping.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::ratelimit::{AdmissionBackend, Decision};

/// Header carrying the API credential.
pub const API_KEY_HEADER: &str = "api_key";
/// First hop wins in this comma-separated list.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Identity used when no header or peer address is available.
pub const UNKNOWN_CLIENT: &str = "unknown";

pub const RATE_LIMITED_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";
pub const INVALID_KEY_MESSAGE: &str = "invalid API key";
pub const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

/// JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    fn response(status: StatusCode, message: &str) -> Response {
        (
            status,
            Json(ErrorBody {
                error: message.to_string(),
            }),
        )
            .into_response()
    }
}

/// State handed to [`admit`].
#[derive(Clone)]
pub struct AdmissionState {
    backend: Arc<dyn AdmissionBackend>,
}

impl AdmissionState {
    pub fn new(backend: Arc<dyn AdmissionBackend>) -> Self {
        Self { backend }
    }
}

/// Gate a request on the admission engine.
///
/// Use with `axum::middleware::from_fn_with_state`. Allowed requests pass
/// through untouched; refusals answer 403 for an unregistered token and 429
/// otherwise; store failures answer 500 without details.
pub async fn admit(State(state): State<AdmissionState>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);
    let token = api_key(request.headers());

    match state.backend.check(token.as_deref(), &ip).await {
        Ok(Decision::Allowed) => {
            debug!(ip = %ip, "Request admitted");
            next.run(request).await
        }
        Ok(Decision::Denied(reason)) => {
            let presented = token.as_deref().filter(|t| !t.is_empty());
            match presented {
                Some(token) if !state.backend.is_token_registered(token) => {
                    info!(ip = %ip, "Request refused: invalid API key");
                    ErrorBody::response(StatusCode::FORBIDDEN, INVALID_KEY_MESSAGE)
                }
                _ => {
                    info!(ip = %ip, reason = %reason, "Request rate limited");
                    ErrorBody::response(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE)
                }
            }
        }
        Err(e) => {
            error!(ip = %ip, error = %e, "Admission check failed");
            ErrorBody::response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
        }
    }
}

/// Read the API credential, if the header is present.
pub fn api_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(API_KEY_HEADER)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
}

/// Client IP: first `X-Forwarded-For` entry, else `X-Real-IP`, else the
/// peer address without its port.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(first) = header(FORWARDED_FOR_HEADER)
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
    {
        return first.to_string();
    }

    if let Some(real_ip) = header(REAL_IP_HEADER) {
        return real_ip.to_string();
    }

    match peer {
        Some(addr) => strip_port(&addr.to_string()).to_string(),
        None => UNKNOWN_CLIENT.to_string(),
    }
}

/// Drop a trailing `:port`. IPv6 peers keep their brackets (`[::1]`).
pub fn strip_port(addr: &str) -> &str {
    match addr.rfind(':') {
        Some(idx) => &addr[..idx],
        None => addr,
    }
}
