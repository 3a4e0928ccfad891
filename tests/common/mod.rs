//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use vodhub::core::{BackendKind, Result, VodError};
use vodhub::db::{DbManager, KvStorage, PlayRecord};
use vodhub::kv::{KvClient, MemoryClient, RetryPolicy};

/// In-memory client that can be told to fail its next commands
pub struct FlakyClient {
    inner: MemoryClient,
    failures: AtomicU32,
    permanent: AtomicBool,
    open: AtomicBool,
    calls: AtomicU32,
    connects: AtomicU32,
}

impl FlakyClient {
    pub fn new() -> Self {
        Self {
            inner: MemoryClient::with_label("Flaky"),
            failures: AtomicU32::new(0),
            permanent: AtomicBool::new(false),
            open: AtomicBool::new(true),
            calls: AtomicU32::new(0),
            connects: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` commands with a dropped connection
    pub fn fail_transient(&self, n: u32) {
        self.permanent.store(false, Ordering::SeqCst);
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` commands with a server-side command error
    pub fn fail_permanent(&self, n: u32) {
        self.permanent.store(true, Ordering::SeqCst);
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.failures.load(Ordering::SeqCst);
        if pending == 0 {
            return Ok(());
        }
        self.failures.store(pending - 1, Ordering::SeqCst);

        if self.permanent.load(Ordering::SeqCst) {
            Err(VodError::BackendError("ERR syntax error".to_string()))
        } else {
            Err(VodError::connection("Flaky", "connection dropped"))
        }
    }
}

#[async_trait]
impl KvClient for FlakyClient {
    fn label(&self) -> &str {
        "Flaky"
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn set_ex(&self, key: &str, seconds: u64, value: &str) -> Result<()> {
        self.check()?;
        self.inner.set_ex(key, seconds, value).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.check()?;
        self.inner.del(keys).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check()?;
        self.inner.exists(key).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check()?;
        self.inner.keys(pattern).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        self.check()?;
        self.inner.mget(keys).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.check()?;
        self.inner.lrange(key, start, stop).await
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64> {
        self.check()?;
        self.inner.lrem(key, count, value).await
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64> {
        self.check()?;
        self.inner.lpush(key, value).await
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()> {
        self.check()?;
        self.inner.ltrim(key, start, stop).await
    }
}

/// Manager over a bare in-memory client
pub fn memory_manager() -> (Arc<MemoryClient>, DbManager) {
    let kv = Arc::new(MemoryClient::new());
    let storage = Arc::new(KvStorage::new(kv.clone()));
    (kv, DbManager::with_storage(BackendKind::Memory, storage, 1800))
}

/// Manager over a fault-injecting client with the default retry policy
pub fn flaky_manager() -> (Arc<FlakyClient>, DbManager) {
    let kv = Arc::new(FlakyClient::new());
    let storage = Arc::new(KvStorage::new(kv.clone()).with_retry(RetryPolicy::default()));
    (kv, DbManager::with_storage(BackendKind::Redis, storage, 1800))
}

pub fn play_record(title: &str, source_name: &str, play_time: u64, total_time: u64, save_time: i64) -> PlayRecord {
    PlayRecord {
        title: title.to_string(),
        source_name: source_name.to_string(),
        cover: format!("https://img.example.com/{}.jpg", title),
        year: "2023".to_string(),
        index: 1,
        total_episodes: 24,
        play_time,
        total_time,
        save_time,
        search_title: title.to_string(),
    }
}
