//! HTTP server hosting the admission-gated API.

use axum::{middleware, routing::get, Json, Router};
use chrono::{Local, SecondsFormat};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::middleware::{admit, AdmissionState};
use crate::error::{GatekeeperError, Result};
use crate::ratelimit::AdmissionBackend;

/// Default upper bound on handling one request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Default time shutdown waits for in-flight requests.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP server for the admission-gated API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The admission engine guarding every route
    backend: Arc<dyn AdmissionBackend>,
    /// Requests running longer than this are answered with 408
    request_timeout: Duration,
    /// In-flight requests still running this long after the signal are abandoned
    shutdown_timeout: Duration,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, backend: Arc<dyn AdmissionBackend>) -> Self {
        Self {
            addr,
            backend,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Bind and serve until `signal` resolves, then drain in-flight requests.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        self.run(listener, signal).await
    }

    /// Serve on an already-bound listener.
    ///
    /// Once `signal` resolves, no new connections are accepted and in-flight
    /// requests get `shutdown_timeout` to finish before they are abandoned.
    pub async fn run<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Starting HTTP server with graceful shutdown");

        let (signalled_tx, signalled_rx) = oneshot::channel();
        let signal = async move {
            signal.await;
            let _ = signalled_tx.send(());
        };

        let app = router_with_timeout(self.backend, self.request_timeout);
        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal);
        let server = async move { server.await };
        tokio::pin!(server);

        let shutdown_timeout = self.shutdown_timeout;
        let drain_deadline = async move {
            match signalled_rx.await {
                Ok(()) => tokio::time::sleep(shutdown_timeout).await,
                Err(_) => std::future::pending().await,
            }
        };

        tokio::select! {
            result = &mut server => result.map_err(|e| {
                error!(error = %e, "HTTP server failed");
                GatekeeperError::Io(e)
            }),
            _ = drain_deadline => {
                warn!(
                    timeout_secs = shutdown_timeout.as_secs_f64(),
                    "Shutdown timed out, abandoning in-flight requests"
                );
                Ok(())
            }
        }
    }
}

/// Serve on an already-bound listener with default timeouts.
pub async fn serve_on<F>(
    listener: TcpListener,
    backend: Arc<dyn AdmissionBackend>,
    signal: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    HttpServer::new(addr, backend).run(listener, signal).await
}

/// Application routes with the default request timeout.
pub fn router(backend: Arc<dyn AdmissionBackend>) -> Router {
    router_with_timeout(backend, DEFAULT_REQUEST_TIMEOUT)
}

/// Application routes wrapped by request tracing, panic recovery, the
/// request timeout and admission control, outermost first.
pub fn router_with_timeout(backend: Arc<dyn AdmissionBackend>, timeout: Duration) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/test", get(api_test))
        .layer(middleware::from_fn_with_state(
            AdmissionState::new(backend),
            admit,
        ))
        .layer(TimeoutLayer::new(timeout))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

async fn index() -> Json<Value> {
    Json(json!({ "message": "Rate Limiter API", "status": "ok" }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn api_test() -> Json<Value> {
    Json(json!({
        "message": "Test endpoint",
        "timestamp": Local::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }))
}
