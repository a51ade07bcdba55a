use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gatekeeper::config::{GatekeeperConfig, StoreBackend};
use gatekeeper::http::HttpServer;
use gatekeeper::ratelimit::{AdmissionBackend, AdmissionEngine, LimitTable};
use gatekeeper::store::{CounterStore, MemoryStore};

/// How often the in-memory store drops expired keys.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Distributed request admission control.
#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "GATEKEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Override the counter store backend
    #[arg(long, value_enum)]
    store: Option<StoreBackend>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting Gatekeeper Admission Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GatekeeperConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(store) = args.store {
        config.store.backend = store;
    }

    let limits = LimitTable::from_config(&config.rate_limiting);
    let mut tokens: Vec<_> = limits.tokens.iter().collect();
    tokens.sort_unstable();
    info!(
        listen_addr = %config.server.listen_addr,
        ip_limit = limits.ip_limit,
        block_duration_secs = limits.block_duration.as_secs(),
        request_timeout_secs = config.server.request_timeout_secs,
        shutdown_timeout_secs = config.server.shutdown_timeout_secs,
        store = %config.store.backend,
        registered_tokens = ?tokens,
        "Configuration loaded"
    );

    let timeout = config.rate_limiting.store_timeout();
    let backend: Arc<dyn AdmissionBackend> = match config.store.backend {
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            spawn_sweeper(Arc::clone(&store));
            engine(store, limits, timeout)
        }
        StoreBackend::Redis => redis_backend(&config, limits, timeout).await?,
    };
    info!("Admission engine initialized");

    HttpServer::new(config.server.listen_addr, backend)
        .with_request_timeout(config.server.request_timeout())
        .with_shutdown_timeout(config.server.shutdown_timeout())
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Gatekeeper Admission Service stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

fn engine<S: CounterStore + 'static>(
    store: Arc<S>,
    limits: LimitTable,
    timeout: Duration,
) -> Arc<dyn AdmissionBackend> {
    Arc::new(AdmissionEngine::new(store, limits).with_store_timeout(timeout))
}

#[cfg(feature = "redis")]
async fn redis_backend(
    config: &GatekeeperConfig,
    limits: LimitTable,
    timeout: Duration,
) -> anyhow::Result<Arc<dyn AdmissionBackend>> {
    let store = gatekeeper::store::RedisStore::connect(&config.store.redis).await?;
    Ok(engine(Arc::new(store), limits, timeout))
}

#[cfg(not(feature = "redis"))]
async fn redis_backend(
    _config: &GatekeeperConfig,
    _limits: LimitTable,
    _timeout: Duration,
) -> anyhow::Result<Arc<dyn AdmissionBackend>> {
    anyhow::bail!("built without the `redis` feature; use --store memory")
}

/// Periodically reclaim expired keys from the in-memory store.
fn spawn_sweeper(store: Arc<MemoryStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            store.sweep();
        }
    });
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
