//! Storage contract and the key-value adapter
//!
//! [`Storage`] is the uniform contract every adapter implements. Optional
//! capabilities are separate traits handed out once through methods such as
//! [`Storage::bulk_clear`], so callers resolve them at construction instead
//! of probing per call.
//!
//! [`KvStorage`] implements the contract on top of any [`KvClient`]. Every
//! backend call goes through the [`RetryWrapper`].

use crate::auth::password::{CredentialPolicy, PlaintextCredentials};
use crate::core::config::Config;
use crate::core::error::{Result, VodError};
use crate::db::keys::{self, Namespace, ADMIN_CONFIG_KEY, PASSWORD_PATTERN};
use crate::db::models::{AdminConfig, Favorite, PlayRecord, SkipConfig};
use crate::kv::{KvClient, RetryPolicy, RetryWrapper};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_SEARCH_HISTORY_LIMIT: usize = 20;

/// Uniform storage contract shared by all backend families
#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend label for logs and error messages
    fn backend_label(&self) -> &str;

    /// Round-trip to the backend
    async fn ping(&self) -> Result<()>;

    // Play records
    async fn get_play_record(&self, user: &str, key: &str) -> Result<Option<PlayRecord>>;
    async fn set_play_record(&self, user: &str, key: &str, record: &PlayRecord) -> Result<()>;
    /// All records of a user keyed by composite id
    async fn get_all_play_records(&self, user: &str) -> Result<BTreeMap<String, PlayRecord>>;
    async fn delete_play_record(&self, user: &str, key: &str) -> Result<()>;

    // Favorites
    async fn get_favorite(&self, user: &str, key: &str) -> Result<Option<Favorite>>;
    async fn set_favorite(&self, user: &str, key: &str, favorite: &Favorite) -> Result<()>;
    async fn get_all_favorites(&self, user: &str) -> Result<BTreeMap<String, Favorite>>;
    async fn delete_favorite(&self, user: &str, key: &str) -> Result<()>;
    async fn is_favorited(&self, user: &str, key: &str) -> Result<bool>;

    // Users
    async fn register_user(&self, user: &str, password: &str) -> Result<()>;
    async fn verify_user(&self, user: &str, password: &str) -> Result<bool>;
    async fn check_user_exist(&self, user: &str) -> Result<bool>;
    async fn change_password(&self, user: &str, new_password: &str) -> Result<()>;
    /// Remove the user and everything stored under their namespace
    async fn delete_user(&self, user: &str) -> Result<()>;
    async fn get_all_users(&self) -> Result<Vec<String>>;

    // Search history
    async fn get_search_history(&self, user: &str) -> Result<Vec<String>>;
    async fn add_search_history(&self, user: &str, keyword: &str) -> Result<()>;
    /// Remove one keyword, or the whole history when `keyword` is `None`
    async fn delete_search_history(&self, user: &str, keyword: Option<&str>) -> Result<()>;

    // Admin config
    async fn get_admin_config(&self) -> Result<Option<AdminConfig>>;
    async fn set_admin_config(&self, config: &AdminConfig) -> Result<()>;

    // Skip config
    async fn get_skip_config(&self, user: &str, source: &str, id: &str) -> Result<Option<SkipConfig>>;
    async fn set_skip_config(&self, user: &str, source: &str, id: &str, config: &SkipConfig) -> Result<()>;
    async fn delete_skip_config(&self, user: &str, source: &str, id: &str) -> Result<()>;
    async fn get_all_skip_configs(&self, user: &str) -> Result<BTreeMap<String, SkipConfig>>;

    // Generic cache
    async fn get_cache(&self, key: &str) -> Result<Option<Value>>;
    /// Store `value`; `ttl_secs` of `None` or `0` means no expiry
    async fn set_cache(&self, key: &str, value: &Value, ttl_secs: Option<u64>) -> Result<()>;
    async fn delete_cache(&self, key: &str) -> Result<()>;
    /// Delete cache entries whose key starts with `prefix` (all when `None`)
    async fn clear_expired_cache(&self, prefix: Option<&str>) -> Result<u64>;

    /// Bulk data clearing, when the adapter supports it
    fn bulk_clear(self: Arc<Self>) -> Option<Arc<dyn BulkClear>> {
        None
    }
}

/// Capability: wipe every user and the admin config
#[async_trait]
pub trait BulkClear: Send + Sync {
    async fn clear_all_data(&self) -> Result<()>;
}

/// [`Storage`] over a key-value backend
pub struct KvStorage {
    retry: RetryWrapper,
    credentials: Arc<dyn CredentialPolicy>,
    history_limit: usize,
}

impl KvStorage {
    /// Adapter with default retry policy, plaintext credentials and a
    /// 20-entry search history
    pub fn new(client: Arc<dyn KvClient>) -> Self {
        Self {
            retry: RetryWrapper::new(client, RetryPolicy::default()),
            credentials: Arc::new(PlaintextCredentials),
            history_limit: DEFAULT_SEARCH_HISTORY_LIMIT,
        }
    }

    pub fn from_config(client: Arc<dyn KvClient>, config: &Config) -> Result<Self> {
        Ok(Self::new(client)
            .with_retry(RetryPolicy::from(&config.retry))
            .with_credentials(crate::auth::password::from_config(&config.security)?)
            .with_history_limit(config.cache.search_history_limit))
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryWrapper::new(Arc::clone(self.retry.client()), policy);
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialPolicy>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    fn client(&self) -> &Arc<dyn KvClient> {
        self.retry.client()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.retry.run(|| self.client().get(key)).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.retry.run(|| self.client().set(key, value)).await
    }

    async fn set_ex(&self, key: &str, seconds: u64, value: &str) -> Result<()> {
        self.retry.run(|| self.client().set_ex(key, seconds, value)).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.retry.run(|| self.client().del(keys)).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.retry.run(|| self.client().exists(key)).await
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        self.retry.run(|| self.client().keys(pattern)).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.retry.run(|| self.client().mget(keys)).await
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(raw) => decode(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let raw = encode(value)?;
        self.set(key, &raw).await
    }

    /// Fetch every value in a user namespace, keyed by composite id
    async fn get_namespace<T: DeserializeOwned>(
        &self,
        ns: Namespace,
        user: &str,
    ) -> Result<BTreeMap<String, T>> {
        let keys = self.scan(&ns.pattern(user)).await?;
        let values = self.mget(&keys).await?;

        let mut out = BTreeMap::new();
        for (key, value) in keys.iter().zip(values) {
            // Deleted between the scan and the fetch
            let Some(raw) = value else { continue };
            let Some(composite) = ns.strip(user, key) else { continue };
            out.insert(composite.to_string(), decode(key, &raw)?);
        }
        Ok(out)
    }

    async fn delete_namespace(&self, ns: Namespace, user: &str) -> Result<u64> {
        let keys = self.scan(&ns.pattern(user)).await?;
        self.del(&keys).await
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| VodError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| VodError::DeserializationError(format!("{}: {}", key, e)))
}

/// Whether a cached payload is an HTML error page rather than data
fn looks_like_html(raw: &str) -> bool {
    let head: String = raw.trim_start().chars().take(9).collect();
    let head = head.to_ascii_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
}

fn require_username(user: &str) -> Result<()> {
    if user.is_empty() {
        return Err(VodError::ValidationError("username must not be empty".to_string()));
    }
    Ok(())
}

#[async_trait]
impl Storage for KvStorage {
    fn backend_label(&self) -> &str {
        self.client().label()
    }

    async fn ping(&self) -> Result<()> {
        self.retry.run(|| self.client().ping()).await
    }

    async fn get_play_record(&self, user: &str, key: &str) -> Result<Option<PlayRecord>> {
        self.get_json(&keys::play_record_key(user, key)).await
    }

    async fn set_play_record(&self, user: &str, key: &str, record: &PlayRecord) -> Result<()> {
        record.validate()?;
        self.set_json(&keys::play_record_key(user, key), record).await
    }

    async fn get_all_play_records(&self, user: &str) -> Result<BTreeMap<String, PlayRecord>> {
        self.get_namespace(Namespace::PlayRecord, user).await
    }

    async fn delete_play_record(&self, user: &str, key: &str) -> Result<()> {
        self.del(&[keys::play_record_key(user, key)]).await.map(|_| ())
    }

    async fn get_favorite(&self, user: &str, key: &str) -> Result<Option<Favorite>> {
        self.get_json(&keys::favorite_key(user, key)).await
    }

    async fn set_favorite(&self, user: &str, key: &str, favorite: &Favorite) -> Result<()> {
        self.set_json(&keys::favorite_key(user, key), favorite).await
    }

    async fn get_all_favorites(&self, user: &str) -> Result<BTreeMap<String, Favorite>> {
        self.get_namespace(Namespace::Favorite, user).await
    }

    async fn delete_favorite(&self, user: &str, key: &str) -> Result<()> {
        self.del(&[keys::favorite_key(user, key)]).await.map(|_| ())
    }

    async fn is_favorited(&self, user: &str, key: &str) -> Result<bool> {
        self.exists(&keys::favorite_key(user, key)).await
    }

    async fn register_user(&self, user: &str, password: &str) -> Result<()> {
        require_username(user)?;
        let sealed = self.credentials.seal(password)?;
        self.set(&keys::password_key(user), &sealed).await?;
        info!(user, "Registered user");
        Ok(())
    }

    async fn verify_user(&self, user: &str, password: &str) -> Result<bool> {
        match self.get(&keys::password_key(user)).await? {
            Some(stored) => self.credentials.verify(password, &stored),
            None => Ok(false),
        }
    }

    async fn check_user_exist(&self, user: &str) -> Result<bool> {
        self.exists(&keys::password_key(user)).await
    }

    async fn change_password(&self, user: &str, new_password: &str) -> Result<()> {
        let sealed = self.credentials.seal(new_password)?;
        self.set(&keys::password_key(user), &sealed).await
    }

    async fn delete_user(&self, user: &str) -> Result<()> {
        self.del(&[keys::search_history_key(user)]).await?;

        let mut removed = 0;
        for ns in [Namespace::PlayRecord, Namespace::Favorite, Namespace::SkipConfig] {
            removed += self.delete_namespace(ns, user).await?;
        }

        // Last, so an interrupted deletion still lists the user and can be re-run
        self.del(&[keys::password_key(user)]).await?;

        info!(user, keys_removed = removed, "Deleted user");
        Ok(())
    }

    async fn get_all_users(&self) -> Result<Vec<String>> {
        let keys = self.scan(PASSWORD_PATTERN).await?;
        let mut users: Vec<String> = keys
            .iter()
            .filter_map(|k| keys::parse_username(k))
            .map(str::to_string)
            .collect();
        users.sort();
        Ok(users)
    }

    async fn get_search_history(&self, user: &str) -> Result<Vec<String>> {
        let key = keys::search_history_key(user);
        self.retry.run(|| self.client().lrange(&key, 0, -1)).await
    }

    async fn add_search_history(&self, user: &str, keyword: &str) -> Result<()> {
        let key = keys::search_history_key(user);
        let limit = self.history_limit;
        self.retry
            .run(|| self.client().push_capped(&key, keyword, limit))
            .await
    }

    async fn delete_search_history(&self, user: &str, keyword: Option<&str>) -> Result<()> {
        let key = keys::search_history_key(user);
        match keyword {
            Some(keyword) => self
                .retry
                .run(|| self.client().lrem(&key, 0, keyword))
                .await
                .map(|_| ()),
            None => self.del(&[key.clone()]).await.map(|_| ()),
        }
    }

    async fn get_admin_config(&self) -> Result<Option<AdminConfig>> {
        self.get_json(ADMIN_CONFIG_KEY).await
    }

    async fn set_admin_config(&self, config: &AdminConfig) -> Result<()> {
        self.set_json(ADMIN_CONFIG_KEY, config).await
    }

    async fn get_skip_config(&self, user: &str, source: &str, id: &str) -> Result<Option<SkipConfig>> {
        self.get_json(&keys::skip_config_key(user, source, id)).await
    }

    async fn set_skip_config(&self, user: &str, source: &str, id: &str, config: &SkipConfig) -> Result<()> {
        if config.is_default() {
            debug!(user, source, id, "Skip config reset to defaults, removing");
            return self.delete_skip_config(user, source, id).await;
        }

        config.validate()?;
        self.set_json(&keys::skip_config_key(user, source, id), config).await
    }

    async fn delete_skip_config(&self, user: &str, source: &str, id: &str) -> Result<()> {
        self.del(&[keys::skip_config_key(user, source, id)]).await.map(|_| ())
    }

    async fn get_all_skip_configs(&self, user: &str) -> Result<BTreeMap<String, SkipConfig>> {
        self.get_namespace(Namespace::SkipConfig, user).await
    }

    async fn get_cache(&self, key: &str) -> Result<Option<Value>> {
        let Some(raw) = self.get(&keys::cache_key(key)).await? else {
            return Ok(None);
        };

        if looks_like_html(&raw) {
            warn!(key, "Cached value is an HTML page, treating as a miss");
            return Ok(None);
        }

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                debug!(key, error = %e, "Cached value is not JSON, returning raw string");
                Ok(Some(Value::String(raw)))
            }
        }
    }

    async fn set_cache(&self, key: &str, value: &Value, ttl_secs: Option<u64>) -> Result<()> {
        let raw = encode(value)?;
        let full_key = keys::cache_key(key);
        match ttl_secs {
            Some(ttl) if ttl > 0 => self.set_ex(&full_key, ttl, &raw).await,
            _ => self.set(&full_key, &raw).await,
        }
    }

    async fn delete_cache(&self, key: &str) -> Result<()> {
        self.del(&[keys::cache_key(key)]).await.map(|_| ())
    }

    async fn clear_expired_cache(&self, prefix: Option<&str>) -> Result<u64> {
        let keys = self.scan(&keys::cache_pattern(prefix)).await?;
        let removed = self.del(&keys).await?;
        info!(prefix = prefix.unwrap_or(""), removed, "Cleared cache entries");
        Ok(removed)
    }

    fn bulk_clear(self: Arc<Self>) -> Option<Arc<dyn BulkClear>> {
        Some(self)
    }
}

#[async_trait]
impl BulkClear for KvStorage {
    async fn clear_all_data(&self) -> Result<()> {
        let users = self.get_all_users().await?;
        for user in &users {
            self.delete_user(user).await?;
        }
        self.del(&[ADMIN_CONFIG_KEY.to_string()]).await?;

        info!(backend = self.backend_label(), users = users.len(), "Cleared all data");
        Ok(())
    }
}

/// Stand-in for backends without server-side persistence
///
/// Record, user and config operations fail with
/// [`VodError::StorageUnavailable`]; cache operations succeed and hold nothing.
pub struct UnavailableStorage {
    backend: String,
}

impl UnavailableStorage {
    pub fn new(backend: impl Into<String>) -> Self {
        Self { backend: backend.into() }
    }

    fn unavailable<T>(&self) -> Result<T> {
        Err(VodError::StorageUnavailable(self.backend.clone()))
    }
}

#[async_trait]
impl Storage for UnavailableStorage {
    fn backend_label(&self) -> &str {
        &self.backend
    }

    async fn ping(&self) -> Result<()> {
        self.unavailable()
    }

    async fn get_play_record(&self, _user: &str, _key: &str) -> Result<Option<PlayRecord>> {
        self.unavailable()
    }

    async fn set_play_record(&self, _user: &str, _key: &str, _record: &PlayRecord) -> Result<()> {
        self.unavailable()
    }

    async fn get_all_play_records(&self, _user: &str) -> Result<BTreeMap<String, PlayRecord>> {
        self.unavailable()
    }

    async fn delete_play_record(&self, _user: &str, _key: &str) -> Result<()> {
        self.unavailable()
    }

    async fn get_favorite(&self, _user: &str, _key: &str) -> Result<Option<Favorite>> {
        self.unavailable()
    }

    async fn set_favorite(&self, _user: &str, _key: &str, _favorite: &Favorite) -> Result<()> {
        self.unavailable()
    }

    async fn get_all_favorites(&self, _user: &str) -> Result<BTreeMap<String, Favorite>> {
        self.unavailable()
    }

    async fn delete_favorite(&self, _user: &str, _key: &str) -> Result<()> {
        self.unavailable()
    }

    async fn is_favorited(&self, _user: &str, _key: &str) -> Result<bool> {
        self.unavailable()
    }

    async fn register_user(&self, _user: &str, _password: &str) -> Result<()> {
        self.unavailable()
    }

    async fn verify_user(&self, _user: &str, _password: &str) -> Result<bool> {
        self.unavailable()
    }

    async fn check_user_exist(&self, _user: &str) -> Result<bool> {
        self.unavailable()
    }

    async fn change_password(&self, _user: &str, _new_password: &str) -> Result<()> {
        self.unavailable()
    }

    async fn delete_user(&self, _user: &str) -> Result<()> {
        self.unavailable()
    }

    async fn get_all_users(&self) -> Result<Vec<String>> {
        self.unavailable()
    }

    async fn get_search_history(&self, _user: &str) -> Result<Vec<String>> {
        self.unavailable()
    }

    async fn add_search_history(&self, _user: &str, _keyword: &str) -> Result<()> {
        self.unavailable()
    }

    async fn delete_search_history(&self, _user: &str, _keyword: Option<&str>) -> Result<()> {
        self.unavailable()
    }

    async fn get_admin_config(&self) -> Result<Option<AdminConfig>> {
        self.unavailable()
    }

    async fn set_admin_config(&self, _config: &AdminConfig) -> Result<()> {
        self.unavailable()
    }

    async fn get_skip_config(&self, _user: &str, _source: &str, _id: &str) -> Result<Option<SkipConfig>> {
        self.unavailable()
    }

    async fn set_skip_config(&self, _user: &str, _source: &str, _id: &str, _config: &SkipConfig) -> Result<()> {
        self.unavailable()
    }

    async fn delete_skip_config(&self, _user: &str, _source: &str, _id: &str) -> Result<()> {
        self.unavailable()
    }

    async fn get_all_skip_configs(&self, _user: &str) -> Result<BTreeMap<String, SkipConfig>> {
        self.unavailable()
    }

    async fn get_cache(&self, _key: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn set_cache(&self, _key: &str, _value: &Value, _ttl_secs: Option<u64>) -> Result<()> {
        Ok(())
    }

    async fn delete_cache(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn clear_expired_cache(&self, _prefix: Option<&str>) -> Result<u64> {
        Ok(0)
    }
}
