//! Storage manager
//!
//! [`DbManager`] is the single entry point the application talks to:
//! - Selects the storage adapter from configuration
//! - Builds composite keys from `(source, id)` pairs
//! - Resolves optional capabilities once, at construction
//! - Owns the cache layer and the statistics aggregator
//!
//! The `localstorage` backend keeps data on the client, so the manager is
//! built over an [`UnavailableStorage`] and every persistence call fails with
//! [`VodError::StorageUnavailable`].

use crate::cache::CacheLayer;
use crate::core::config::{BackendKind, Config};
use crate::core::error::{Result, VodError};
use crate::db::keys::storage_key;
use crate::db::models::{
    AdminConfig, ContentStat, Favorite, PlayRecord, PlayStatsResult, SkipConfig, UserPlayStat,
};
use crate::db::repository::{BulkClear, KvStorage, Storage, UnavailableStorage};
use crate::kv::ConnectionRegistry;
use crate::stats::StatsAggregator;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub struct DbManager {
    backend: BackendKind,
    storage: Arc<dyn Storage>,
    bulk_clear: Option<Arc<dyn BulkClear>>,
    cache: CacheLayer,
    stats: StatsAggregator,
}

impl DbManager {
    /// Create the manager for the configured backend
    ///
    /// Clients come from `registry`, so managers built for the same backend
    /// share one connection.
    pub fn new(config: &Config, registry: &ConnectionRegistry) -> Result<Self> {
        let backend = config.storage.backend;
        if backend == BackendKind::LocalStorage {
            info!("Using client-side storage, server persistence disabled");
            return Ok(Self::disabled(backend));
        }

        let client = registry.get_or_create(config)?;
        let storage = KvStorage::from_config(client, config)?;
        info!(backend = backend.as_str(), "Storage manager ready");

        Ok(Self::with_storage(backend, Arc::new(storage), config.cache.stats_ttl))
    }

    /// Manager over an already constructed adapter
    pub fn with_storage(backend: BackendKind, storage: Arc<dyn Storage>, stats_ttl: u64) -> Self {
        let bulk_clear = Arc::clone(&storage).bulk_clear();
        Self {
            backend,
            cache: CacheLayer::new(Arc::clone(&storage)),
            stats: StatsAggregator::new(Arc::clone(&storage), stats_ttl),
            bulk_clear,
            storage,
        }
    }

    /// Manager without server-side persistence
    pub fn disabled(backend: BackendKind) -> Self {
        let storage: Arc<dyn Storage> = Arc::new(UnavailableStorage::new(backend.as_str()));
        Self::with_storage(backend, storage, 0)
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn backend_label(&self) -> &str {
        self.storage.backend_label()
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    /// Whether statistics are computed server-side
    pub fn is_stats_supported(&self) -> bool {
        self.backend != BackendKind::LocalStorage
    }

    pub fn supports_bulk_clear(&self) -> bool {
        self.bulk_clear.is_some()
    }

    pub async fn ping(&self) -> Result<()> {
        self.storage.ping().await
    }

    // Play records

    pub async fn get_play_record(&self, user: &str, source: &str, id: &str) -> Result<Option<PlayRecord>> {
        self.storage.get_play_record(user, &storage_key(source, id)).await
    }

    pub async fn save_play_record(&self, user: &str, source: &str, id: &str, record: &PlayRecord) -> Result<()> {
        self.storage.set_play_record(user, &storage_key(source, id), record).await
    }

    pub async fn get_all_play_records(&self, user: &str) -> Result<BTreeMap<String, PlayRecord>> {
        self.storage.get_all_play_records(user).await
    }

    pub async fn delete_play_record(&self, user: &str, source: &str, id: &str) -> Result<()> {
        self.storage.delete_play_record(user, &storage_key(source, id)).await
    }

    // Favorites

    pub async fn get_favorite(&self, user: &str, source: &str, id: &str) -> Result<Option<Favorite>> {
        self.storage.get_favorite(user, &storage_key(source, id)).await
    }

    pub async fn save_favorite(&self, user: &str, source: &str, id: &str, favorite: &Favorite) -> Result<()> {
        self.storage.set_favorite(user, &storage_key(source, id), favorite).await
    }

    pub async fn get_all_favorites(&self, user: &str) -> Result<BTreeMap<String, Favorite>> {
        self.storage.get_all_favorites(user).await
    }

    pub async fn delete_favorite(&self, user: &str, source: &str, id: &str) -> Result<()> {
        self.storage.delete_favorite(user, &storage_key(source, id)).await
    }

    pub async fn is_favorited(&self, user: &str, source: &str, id: &str) -> Result<bool> {
        self.storage.is_favorited(user, &storage_key(source, id)).await
    }

    // Users

    pub async fn register_user(&self, user: &str, password: &str) -> Result<()> {
        self.storage.register_user(user, password).await
    }

    pub async fn verify_user(&self, user: &str, password: &str) -> Result<bool> {
        self.storage.verify_user(user, password).await
    }

    pub async fn check_user_exist(&self, user: &str) -> Result<bool> {
        self.storage.check_user_exist(user).await
    }

    pub async fn change_password(&self, user: &str, new_password: &str) -> Result<()> {
        self.storage.change_password(user, new_password).await
    }

    pub async fn delete_user(&self, user: &str) -> Result<()> {
        self.storage.delete_user(user).await
    }

    pub async fn get_all_users(&self) -> Result<Vec<String>> {
        self.storage.get_all_users().await
    }

    // Search history

    pub async fn get_search_history(&self, user: &str) -> Result<Vec<String>> {
        self.storage.get_search_history(user).await
    }

    pub async fn add_search_history(&self, user: &str, keyword: &str) -> Result<()> {
        self.storage.add_search_history(user, keyword).await
    }

    pub async fn delete_search_history(&self, user: &str, keyword: Option<&str>) -> Result<()> {
        self.storage.delete_search_history(user, keyword).await
    }

    // Admin config

    pub async fn get_admin_config(&self) -> Result<Option<AdminConfig>> {
        self.storage.get_admin_config().await
    }

    pub async fn save_admin_config(&self, config: &AdminConfig) -> Result<()> {
        self.storage.set_admin_config(config).await
    }

    // Skip config

    pub async fn get_skip_config(&self, user: &str, source: &str, id: &str) -> Result<Option<SkipConfig>> {
        self.storage.get_skip_config(user, source, id).await
    }

    pub async fn set_skip_config(&self, user: &str, source: &str, id: &str, config: &SkipConfig) -> Result<()> {
        self.storage.set_skip_config(user, source, id, config).await
    }

    pub async fn delete_skip_config(&self, user: &str, source: &str, id: &str) -> Result<()> {
        self.storage.delete_skip_config(user, source, id).await
    }

    pub async fn get_all_skip_configs(&self, user: &str) -> Result<BTreeMap<String, SkipConfig>> {
        self.storage.get_all_skip_configs(user).await
    }

    /// Wipe every user and the admin config
    pub async fn clear_all_data(&self) -> Result<()> {
        let capability = self.bulk_clear.as_ref().ok_or_else(|| {
            VodError::Unsupported(format!("{} does not support clearing all data", self.backend_label()))
        })?;
        capability.clear_all_data().await?;
        self.invalidate_stats().await;
        Ok(())
    }

    // Cache

    /// Cached value; read failures are reported as a miss
    pub async fn get_cache(&self, key: &str) -> Option<Value> {
        self.cache.get(key).await
    }

    pub async fn set_cache(&self, key: &str, value: &Value, ttl_secs: Option<u64>) -> Result<()> {
        self.cache.set(key, value, ttl_secs).await
    }

    pub async fn delete_cache(&self, key: &str) -> Result<()> {
        self.cache.delete(key).await
    }

    pub async fn clear_expired_cache(&self, prefix: Option<&str>) -> Result<u64> {
        self.cache.clear_expired(prefix).await
    }

    // Statistics

    /// Site-wide summary; zeroed when statistics are unavailable
    pub async fn get_play_stats(&self) -> PlayStatsResult {
        if !self.is_stats_supported() {
            return PlayStatsResult::default();
        }
        self.stats.get_play_stats().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to compute play statistics");
            PlayStatsResult::default()
        })
    }

    pub async fn get_user_play_stat(&self, user: &str) -> UserPlayStat {
        if !self.is_stats_supported() {
            return UserPlayStat::empty(user);
        }
        self.stats.get_user_play_stat(user).await.unwrap_or_else(|e| {
            warn!(user, error = %e, "Failed to compute user statistics");
            UserPlayStat::empty(user)
        })
    }

    pub async fn get_content_stats(&self, limit: usize) -> Vec<ContentStat> {
        if !self.is_stats_supported() {
            return Vec::new();
        }
        self.stats.get_content_stats(limit).await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to compute content statistics");
            Vec::new()
        })
    }

    /// Note a play event
    ///
    /// Statistics are recomputed from play records, so the event only
    /// invalidates the cached summary.
    pub async fn update_play_statistics(&self, user: &str, source: &str, id: &str, watch_time: u64) {
        if !self.is_stats_supported() {
            return;
        }
        tracing::debug!(user, source, id, watch_time, "Play event recorded");
        self.invalidate_stats().await;
    }

    async fn invalidate_stats(&self) {
        if let Err(e) = self.stats.invalidate().await {
            warn!(error = %e, "Failed to invalidate cached play statistics");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvClient, MemoryClient};
    use serde_json::json;

    fn manager() -> (Arc<MemoryClient>, DbManager) {
        let kv = Arc::new(MemoryClient::new());
        let storage = Arc::new(KvStorage::new(kv.clone()));
        (kv, DbManager::with_storage(BackendKind::Memory, storage, 1800))
    }

    fn record(play_time: u64, total_time: u64, save_time: i64) -> PlayRecord {
        PlayRecord {
            title: "Show".into(),
            source_name: "Source One".into(),
            cover: String::new(),
            year: "2024".into(),
            index: 1,
            total_episodes: 12,
            play_time,
            total_time,
            save_time,
            search_title: String::new(),
        }
    }

    #[tokio::test]
    async fn test_composite_keys() {
        let (kv, db) = manager();
        db.save_play_record("alice", "tv1", "42", &record(120, 1800, 1_700_000_000)).await.unwrap();

        assert!(kv.exists("u:alice:pr:tv1+42").await.unwrap());
        let all = db.get_all_play_records("alice").await.unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["tv1+42"]);

        db.delete_play_record("alice", "tv1", "42").await.unwrap();
        assert_eq!(db.get_play_record("alice", "tv1", "42").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_play_statistics_invalidates_summary() {
        let (_, db) = manager();
        db.register_user("alice", "pw").await.unwrap();

        db.get_play_stats().await;
        db.get_play_stats().await;
        assert_eq!(db.stats().recomputations(), 1);

        db.update_play_statistics("alice", "tv1", "42", 60).await;
        db.get_play_stats().await;
        assert_eq!(db.stats().recomputations(), 2);
    }

    #[tokio::test]
    async fn test_clear_all_data() {
        let (kv, db) = manager();
        assert!(db.supports_bulk_clear());
        db.register_user("alice", "pw").await.unwrap();
        db.save_admin_config(&AdminConfig::default()).await.unwrap();
        db.set_cache("keep", &json!(true), None).await.unwrap();

        db.clear_all_data().await.unwrap();
        assert!(db.get_all_users().await.unwrap().is_empty());
        assert_eq!(db.get_admin_config().await.unwrap(), None);
        assert!(kv.exists("cache:keep").await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_manager() {
        let db = DbManager::disabled(BackendKind::LocalStorage);
        assert!(!db.is_stats_supported());
        assert!(!db.supports_bulk_clear());

        let err = db.get_all_users().await.unwrap_err();
        assert!(matches!(err, VodError::StorageUnavailable(_)));
        assert!(matches!(db.clear_all_data().await, Err(VodError::Unsupported(_))));

        assert_eq!(db.get_play_stats().await, PlayStatsResult::default());
        assert_eq!(db.get_user_play_stat("alice").await, UserPlayStat::empty("alice"));
        assert!(db.get_content_stats(10).await.is_empty());
        assert_eq!(db.get_cache("anything").await, None);
    }

    #[tokio::test]
    async fn test_new_from_config() {
        let registry = ConnectionRegistry::new();
        let mut config = Config::default();

        config.storage.backend = BackendKind::LocalStorage;
        let db = DbManager::new(&config, &registry).unwrap();
        assert_eq!(db.backend(), BackendKind::LocalStorage);
        assert!(registry.is_empty());

        config.storage.backend = BackendKind::Memory;
        let db = DbManager::new(&config, &registry).unwrap();
        db.ping().await.unwrap();
        assert_eq!(registry.len(), 1);
    }
}
