//! Backend command surface
//!
//! Every storage adapter talks to its backend through [`KvClient`], a small
//! Redis-shaped command set (strings, lists, key scans). Three families
//! implement it:
//! - [`redis::RedisClient`] for Redis-protocol servers (Redis, Kvrocks)
//! - [`upstash::UpstashClient`] for REST-based Redis
//! - [`memory::MemoryClient`] for a single-node in-process store

pub mod connection;
pub mod memory;
pub mod redis;
pub mod retry;
pub mod upstash;

pub use connection::{ConnectionOptions, ConnectionRegistry, ReconnectPolicy};
pub use memory::MemoryClient;
pub use retry::{RetryPolicy, RetryWrapper};

use crate::core::error::Result;
use async_trait::async_trait;

/// Primitive key-value commands shared by every backend family
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Human-readable backend label ("Redis", "Kvrocks", ...)
    fn label(&self) -> &str;

    /// Whether the client currently holds a usable connection
    fn is_open(&self) -> bool;

    /// Try to (re-)establish the connection
    async fn connect(&self) -> Result<()>;

    async fn ping(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Set with an expiry in seconds
    async fn set_ex(&self, key: &str, seconds: u64, value: &str) -> Result<()>;

    /// Delete keys, returning how many existed
    async fn del(&self, keys: &[String]) -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Keys matching a Redis glob pattern
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Remove occurrences of `value` (all of them when `count` is 0)
    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64>;

    async fn lpush(&self, key: &str, value: &str) -> Result<u64>;

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()>;

    /// Move `value` to the head of the list at `key`, keeping at most `max_len` entries
    ///
    /// The default issues three independent commands. Backends with a native
    /// transaction primitive override it. Running it twice leaves the same
    /// list as running it once.
    async fn push_capped(&self, key: &str, value: &str, max_len: usize) -> Result<()> {
        self.lrem(key, 0, value).await?;
        self.lpush(key, value).await?;
        self.ltrim(key, 0, max_len as i64 - 1).await?;
        Ok(())
    }
}
