//! Connection management
//!
//! One long-lived client per backend per process. The [`ConnectionRegistry`]
//! is owned by the application and handed to whatever builds storage, so
//! tests can construct their own registry (or skip it and inject a client).

use crate::core::config::{BackendKind, Config, ConnectionConfig};
use crate::core::error::{Result, VodError};
use crate::kv::memory::MemoryClient;
use crate::kv::redis::RedisClient;
use crate::kv::upstash::UpstashClient;
use crate::kv::KvClient;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Backoff for re-establishing a connection that dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (0-indexed), or `None` once
    /// the attempt budget is spent
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 10,
        }
    }
}

/// Timing parameters shared by the network clients
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
    pub initial_retry_interval: Duration,
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl From<&ConnectionConfig> for ConnectionOptions {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            keepalive_interval: config.keepalive_interval(),
            initial_retry_interval: config.initial_retry_interval(),
            request_timeout: config.request_timeout(),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
                max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
                max_attempts: config.reconnect_max_attempts,
            },
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(10_000),
            keepalive_interval: Duration::from_millis(30_000),
            initial_retry_interval: Duration::from_millis(5_000),
            request_timeout: Duration::from_millis(10_000),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Application-owned container of backend clients
#[derive(Default)]
pub struct ConnectionRegistry {
    clients: Mutex<HashMap<BackendKind, Arc<dyn KvClient>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the client for the configured backend, creating it on first use
    ///
    /// Fails immediately when a server backend has no connection URL.
    pub fn get_or_create(&self, config: &Config) -> Result<Arc<dyn KvClient>> {
        let kind = config.storage.backend;
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| VodError::TaskError("connection registry lock poisoned".to_string()))?;

        if let Some(client) = clients.get(&kind) {
            return Ok(Arc::clone(client));
        }

        let client = create_client(kind, config)?;
        tracing::info!(backend = kind.label(), "Created backend client");
        clients.insert(kind, Arc::clone(&client));
        Ok(client)
    }

    /// Number of live client handles
    pub fn len(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn create_client(kind: BackendKind, config: &Config) -> Result<Arc<dyn KvClient>> {
    let options = ConnectionOptions::from(&config.connection);

    match kind {
        BackendKind::LocalStorage => Err(VodError::StorageUnavailable(kind.as_str().to_string())),
        BackendKind::Memory => Ok(Arc::new(MemoryClient::new())),
        BackendKind::Redis | BackendKind::Kvrocks => {
            let url = required_url(kind, config)?;
            Ok(Arc::new(RedisClient::new(kind.label(), url, options)?))
        }
        BackendKind::Upstash => {
            let url = required_url(kind, config)?;
            let token = config.storage.token.as_deref().unwrap_or_default();
            Ok(Arc::new(UpstashClient::new(url, token, options)?))
        }
    }
}

fn required_url(kind: BackendKind, config: &Config) -> Result<&str> {
    config.storage.url().ok_or_else(|| {
        VodError::ConfigError(format!(
            "{} env variable not set",
            kind.url_env_var().unwrap_or("STORAGE_URL")
        ))
    })
}
