//! Redis-backed counter store shared by all replicas.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{
    AsyncCommands, ConnectionAddr, ConnectionInfo, ErrorKind, RedisConnectionInfo, RedisError,
};
use std::time::Duration;
use tracing::{info, trace};

use super::{block_key, CounterStore, StoreError};
use crate::config::RedisConfig;

/// How long the startup connectivity check may take.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            return StoreError::Unavailable(err.to_string());
        }
        match err.kind() {
            ErrorKind::TypeError | ErrorKind::ResponseError => {
                StoreError::Protocol(err.to_string())
            }
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

/// Counter store backed by a Redis server.
///
/// The connection manager reconnects on its own after transient failures,
/// so a single instance is cloned into every request.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis and verify the server answers `PING`.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        info!(
            host = %config.host,
            port = config.port,
            db = config.db,
            "Connecting to Redis"
        );

        let client = redis::Client::open(connection_info(config))?;
        let mut conn = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(CONNECT_TIMEOUT))??;

        let _: () = tokio::time::timeout(CONNECT_TIMEOUT, redis::cmd("PING").query_async(&mut conn))
            .await
            .map_err(|_| StoreError::Timeout(CONNECT_TIMEOUT))??;

        info!("Connected to Redis");
        Ok(Self { conn })
    }
}

/// Connection parameters passed as structured fields, so credentials are
/// never spliced into a URL.
fn connection_info(config: &RedisConfig) -> ConnectionInfo {
    ConnectionInfo {
        addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
        redis: RedisConnectionInfo {
            db: config.db,
            password: config.password.clone().filter(|p| !p.is_empty()),
            ..Default::default()
        },
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PEXPIRE rejects zero; clamp to the smallest representable TTL.
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment_and_expire(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();

        // MULTI/EXEC keeps INCR and the conditional expiry in one unit.
        let (count, _): (i64, i64) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .arg("NX")
            .query_async(&mut conn)
            .await?;

        trace!(key, count, "Incremented counter");
        u64::try_from(count)
            .map_err(|_| StoreError::Protocol(format!("negative counter {} at {}", count, key)))
    }

    async fn get_value(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value.map(|v| v.max(0) as u64).unwrap_or(0))
    }

    async fn set_block(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(block_key(key))
            .arg("1")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn is_blocked(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(block_key(key)).await?;
        Ok(value.as_deref() == Some("1"))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
