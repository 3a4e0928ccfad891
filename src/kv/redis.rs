//! Redis-protocol client (Redis, Kvrocks)
//!
//! Wraps one multiplexed connection. The first connection is established in
//! the background and retried at a fixed interval until it succeeds; a
//! connection that drops later is re-established with exponential backoff
//! until the [`ReconnectPolicy`](crate::kv::ReconnectPolicy) gives up, after
//! which the client stays unusable until the process restarts.

use crate::core::error::{Result, VodError};
use crate::kv::connection::ConnectionOptions;
use crate::kv::KvClient;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::FromRedisValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

struct Inner {
    label: String,
    client: redis::Client,
    options: ConnectionOptions,
    runtime: Handle,
    conn: RwLock<Option<MultiplexedConnection>>,
    open: AtomicBool,
    reconnecting: AtomicBool,
    exhausted: AtomicBool,
}

impl Inner {
    /// Single connection attempt bounded by the connect timeout
    async fn establish(&self) -> Result<()> {
        debug!(backend = %self.label, "Connecting");

        let conn = tokio::time::timeout(
            self.options.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| {
            VodError::connection(
                &self.label,
                format!(
                    "Connection timed out after {}ms",
                    self.options.connect_timeout.as_millis()
                ),
            )
        })??;

        *self.conn.write().await = Some(conn);
        self.open.store(true, Ordering::SeqCst);
        info!(backend = %self.label, "Connected and ready");
        Ok(())
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        if self.exhausted.load(Ordering::SeqCst) {
            return Err(VodError::ConnectionExhausted { backend: self.label.clone() });
        }

        if self.open.load(Ordering::SeqCst) {
            if let Some(conn) = self.conn.read().await.as_ref() {
                return Ok(conn.clone());
            }
        }

        Err(VodError::connection(&self.label, "Connection is closed"))
    }
}

/// Client for a Redis-protocol server
pub struct RedisClient {
    inner: Arc<Inner>,
}

impl RedisClient {
    /// Create the client and start connecting in the background
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(label: &str, url: &str, options: ConnectionOptions) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            VodError::TaskError(format!("{} client requires a running tokio runtime", label))
        })?;
        let client = redis::Client::open(url)?;

        let inner = Arc::new(Inner {
            label: label.to_string(),
            client,
            options,
            runtime,
            conn: RwLock::new(None),
            open: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
        });

        spawn_initial_connect(&inner);
        spawn_keepalive(&inner);

        Ok(Self { inner })
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        let mut conn = self.inner.connection().await?;
        match cmd.query_async(&mut conn).await {
            Ok(value) => Ok(value),
            Err(e) => {
                handle_failure(&self.inner, &e);
                Err(e.into())
            }
        }
    }

    async fn query_pipeline<T: FromRedisValue>(&self, pipe: &redis::Pipeline) -> Result<T> {
        let mut conn = self.inner.connection().await?;
        match pipe.query_async(&mut conn).await {
            Ok(value) => Ok(value),
            Err(e) => {
                handle_failure(&self.inner, &e);
                Err(e.into())
            }
        }
    }
}

fn is_connection_fault(e: &redis::RedisError) -> bool {
    e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() || e.is_timeout()
}

/// Mark the connection closed and start the reconnect loop if none is running
fn handle_failure(inner: &Arc<Inner>, e: &redis::RedisError) {
    if !is_connection_fault(e) {
        return;
    }

    error!(backend = %inner.label, error = %e, "Connection error");
    inner.open.store(false, Ordering::SeqCst);

    if inner.exhausted.load(Ordering::SeqCst) || inner.reconnecting.swap(true, Ordering::SeqCst) {
        return;
    }

    let weak = Arc::downgrade(inner);
    inner.runtime.spawn(async move {
        reconnect_loop(weak).await;
    });
}

async fn reconnect_loop(weak: Weak<Inner>) {
    let mut attempt = 0u32;

    loop {
        let Some(inner) = weak.upgrade() else { return };

        if inner.open.load(Ordering::SeqCst) {
            inner.reconnecting.store(false, Ordering::SeqCst);
            return;
        }

        let Some(delay) = inner.options.reconnect.delay(attempt) else {
            error!(
                backend = %inner.label,
                attempts = attempt,
                "Giving up on reconnecting; restart required"
            );
            inner.exhausted.store(true, Ordering::SeqCst);
            inner.reconnecting.store(false, Ordering::SeqCst);
            return;
        };

        warn!(
            backend = %inner.label,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );
        drop(inner);
        tokio::time::sleep(delay).await;

        let Some(inner) = weak.upgrade() else { return };
        match inner.establish().await {
            Ok(()) => {
                inner.reconnecting.store(false, Ordering::SeqCst);
                return;
            }
            Err(e) => {
                error!(backend = %inner.label, attempt = attempt + 1, error = %e, "Reconnect failed");
            }
        }
        attempt += 1;
    }
}

fn spawn_initial_connect(inner: &Arc<Inner>) {
    let weak = Arc::downgrade(inner);
    inner.runtime.spawn(async move {
        loop {
            let Some(inner) = weak.upgrade() else { return };
            if inner.open.load(Ordering::SeqCst) {
                return;
            }

            let interval = inner.options.initial_retry_interval;
            match inner.establish().await {
                Ok(()) => return,
                Err(e) => {
                    error!(
                        backend = %inner.label,
                        retry_in_ms = interval.as_millis() as u64,
                        error = %e,
                        "Initial connection failed"
                    );
                }
            }
            drop(inner);
            tokio::time::sleep(interval).await;
        }
    });
}

fn spawn_keepalive(inner: &Arc<Inner>) {
    let weak = Arc::downgrade(inner);
    let period = inner.options.keepalive_interval;

    inner.runtime.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else { return };
            if !inner.open.load(Ordering::SeqCst) {
                continue;
            }

            let Ok(mut conn) = inner.connection().await else { continue };
            let ping: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
            if let Err(e) = ping {
                handle_failure(&inner, &e);
            }
        }
    });
}

#[async_trait]
impl KvClient for RedisClient {
    fn label(&self) -> &str {
        &self.inner.label
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst) && !self.inner.exhausted.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        if self.inner.exhausted.load(Ordering::SeqCst) {
            return Err(VodError::ConnectionExhausted { backend: self.inner.label.clone() });
        }
        if self.inner.open.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.establish().await
    }

    async fn ping(&self) -> Result<()> {
        let _: String = self.query(&redis::cmd("PING")).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.query(redis::cmd("SET").arg(key).arg(value)).await
    }

    async fn set_ex(&self, key: &str, seconds: u64, value: &str) -> Result<()> {
        self.query(redis::cmd("SETEX").arg(key).arg(seconds).arg(value)).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query(redis::cmd("DEL").arg(keys)).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.query(redis::cmd("EXISTS").arg(key)).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.query(redis::cmd("KEYS").arg(pattern)).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.query(redis::cmd("MGET").arg(keys)).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.query(redis::cmd("LRANGE").arg(key).arg(start).arg(stop)).await
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64> {
        self.query(redis::cmd("LREM").arg(key).arg(count).arg(value)).await
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64> {
        self.query(redis::cmd("LPUSH").arg(key).arg(value)).await
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.query(redis::cmd("LTRIM").arg(key).arg(start).arg(stop)).await
    }

    async fn push_capped(&self, key: &str, value: &str, max_len: usize) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("LREM")
            .arg(key)
            .arg(0)
            .arg(value)
            .ignore()
            .cmd("LPUSH")
            .arg(key)
            .arg(value)
            .ignore()
            .cmd("LTRIM")
            .arg(key)
            .arg(0)
            .arg(max_len as i64 - 1)
            .ignore();
        self.query_pipeline(&pipe).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{RetryPolicy, RetryWrapper};

    // Nothing listens on port 1, so every attempt is refused
    const DEAD_URL: &str = "redis://127.0.0.1:1";

    #[test]
    fn test_requires_runtime() {
        let err = RedisClient::new("Redis", DEAD_URL, ConnectionOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, VodError::TaskError(_)));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let result = RedisClient::new("Redis", "not-a-url", ConnectionOptions::default());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_commands_fail_transiently_while_closed() {
        let client = RedisClient::new("Kvrocks", DEAD_URL, ConnectionOptions::default()).unwrap();
        assert!(!client.is_open());
        assert_eq!(client.label(), "Kvrocks");

        let err = client.get("k").await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("Kvrocks"));

        let err = client.connect().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_client_fails_without_retrying() {
        let client = Arc::new(RedisClient::new("Redis", DEAD_URL, ConnectionOptions::default()).unwrap());
        client.inner.exhausted.store(true, Ordering::SeqCst);

        let err = client.get("k").await.unwrap_err();
        assert!(matches!(err, VodError::ConnectionExhausted { .. }));
        assert!(!err.is_transient());
        assert!(matches!(client.connect().await, Err(VodError::ConnectionExhausted { .. })));

        let retry = RetryWrapper::new(client.clone(), RetryPolicy::default());
        let started = tokio::time::Instant::now();
        assert!(retry.run(|| client.get("k")).await.is_err());
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }
}
