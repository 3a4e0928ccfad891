//! Configuration management

use clap::{Parser, Subcommand};
use config::builder::{ConfigBuilder as Builder, DefaultState};
use config::{Config as ConfigBuilder, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Legacy deployment variables honoured above the prefixed ones
const LEGACY_STORAGE_TYPE_VAR: &str = "NEXT_PUBLIC_STORAGE_TYPE";
const LEGACY_UPSTASH_TOKEN_VAR: &str = "UPSTASH_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid storage configuration: {0}")]
    InvalidStorage(String),

    #[error("Invalid connection configuration: {0}")]
    InvalidConnection(String),

    #[error("Invalid retry configuration: {0}")]
    InvalidRetry(String),

    #[error("Invalid cache configuration: {0}")]
    InvalidCache(String),

    #[error("Invalid security configuration: {0}")]
    InvalidSecurity(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

impl From<ConfigError> for crate::core::error::VodError {
    fn from(err: ConfigError) -> Self {
        crate::core::error::VodError::ConfigError(err.to_string())
    }
}

/// Storage backend families selectable at process start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// No server-side persistence; clients keep data locally
    LocalStorage,
    Redis,
    Kvrocks,
    Upstash,
    /// Single-node in-process KV
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::LocalStorage => "localstorage",
            BackendKind::Redis => "redis",
            BackendKind::Kvrocks => "kvrocks",
            BackendKind::Upstash => "upstash",
            BackendKind::Memory => "memory",
        }
    }

    /// Human-readable label used in logs and error messages
    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::LocalStorage => "LocalStorage",
            BackendKind::Redis => "Redis",
            BackendKind::Kvrocks => "Kvrocks",
            BackendKind::Upstash => "Upstash",
            BackendKind::Memory => "Memory",
        }
    }

    /// Environment variable carrying the connection URL in legacy deployments
    pub fn url_env_var(&self) -> Option<&'static str> {
        match self {
            BackendKind::Redis => Some("REDIS_URL"),
            BackendKind::Kvrocks => Some("KVROCKS_URL"),
            BackendKind::Upstash => Some("UPSTASH_URL"),
            BackendKind::LocalStorage | BackendKind::Memory => None,
        }
    }

    /// Whether the backend needs a connection URL
    pub fn requires_url(&self) -> bool {
        self.url_env_var().is_some()
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "localstorage" => Some(BackendKind::LocalStorage),
            "redis" => Some(BackendKind::Redis),
            "kvrocks" => Some(BackendKind::Kvrocks),
            "upstash" => Some(BackendKind::Upstash),
            "memory" => Some(BackendKind::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub connection: ConnectionConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        Self::load_with(&cli_args)
    }

    /// Load configuration using already-parsed command-line arguments
    pub fn load_with(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        // 1. Start with defaults (lowest priority)
        let mut builder = with_defaults(ConfigBuilder::builder())?;

        // 2. Load from config file if specified (medium priority)
        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(
                    config_path.display().to_string()
                ));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // 3. Override with environment variables (higher priority)
        // Environment variables are prefixed with VODHUB_ and use __ for nesting
        // Example: VODHUB_STORAGE__BACKEND=redis
        builder = builder.add_source(
            Environment::with_prefix("VODHUB")
                .separator("__")
                .try_parsing(true)
        );
        builder = with_legacy_env(builder, cli_args.backend.as_deref())?;

        // 4. Override with CLI arguments (highest priority)
        if let Some(backend) = &cli_args.backend {
            builder = builder.set_override("storage.backend", backend.clone())?;
        }
        if let Some(url) = &cli_args.url {
            builder = builder.set_override("storage.url", url.clone())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = with_defaults(ConfigBuilder::builder())?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        let builder = with_defaults(ConfigBuilder::builder())?.add_source(
            Environment::with_prefix("VODHUB")
                .separator("__")
                .try_parsing(true)
        );

        let config: Config = with_legacy_env(builder, None)?
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.validate()?;
        self.connection.validate()?;
        self.retry.validate()?;
        self.cache.validate()?;
        self.security.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                backend: BackendKind::LocalStorage,
                url: None,
                token: None,
            },
            connection: ConnectionConfig {
                connect_timeout_ms: 10_000,
                keepalive_interval_ms: 30_000,
                initial_retry_interval_ms: 5_000,
                reconnect_base_delay_ms: 1_000,
                reconnect_max_delay_ms: 30_000,
                reconnect_max_attempts: 10,
                request_timeout_ms: 10_000,
            },
            retry: RetryConfig {
                max_retries: 3,
                base_delay_ms: 1_000,
            },
            cache: CacheConfig {
                stats_ttl: 1800,
                search_history_limit: 20,
            },
            security: SecurityConfig {
                password_hashing: "plaintext".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
                output: "stdout".to_string(),
                log_file: None,
                rotation: "daily".to_string(),
            },
        }
    }
}

fn with_defaults(builder: Builder<DefaultState>) -> Result<Builder<DefaultState>, ConfigError> {
    Ok(builder
        .set_default("storage.backend", "localstorage")?
        .set_default("connection.connect_timeout_ms", 10_000)?
        .set_default("connection.keepalive_interval_ms", 30_000)?
        .set_default("connection.initial_retry_interval_ms", 5_000)?
        .set_default("connection.reconnect_base_delay_ms", 1_000)?
        .set_default("connection.reconnect_max_delay_ms", 30_000)?
        .set_default("connection.reconnect_max_attempts", 10)?
        .set_default("connection.request_timeout_ms", 10_000)?
        .set_default("retry.max_retries", 3)?
        .set_default("retry.base_delay_ms", 1_000)?
        .set_default("cache.stats_ttl", 1800)?
        .set_default("cache.search_history_limit", 20)?
        .set_default("security.password_hashing", "plaintext")?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stdout")?
        .set_default("logging.rotation", "daily")?)
}

/// Apply the un-prefixed variables older deployments were configured with
fn with_legacy_env(
    mut builder: Builder<DefaultState>,
    cli_backend: Option<&str>,
) -> Result<Builder<DefaultState>, ConfigError> {
    if let Ok(backend) = std::env::var(LEGACY_STORAGE_TYPE_VAR) {
        builder = builder.set_override("storage.backend", backend)?;
    }

    // The URL variable depends on which backend ends up selected, which may
    // come from any layer added so far
    let selected = match cli_backend {
        Some(backend) => Some(backend.to_string()),
        None => builder.build_cloned()?.get_string("storage.backend").ok(),
    }
    .and_then(|b| BackendKind::parse(&b));

    if let Some(var) = selected.and_then(|kind| kind.url_env_var()) {
        if let Ok(url) = std::env::var(var) {
            builder = builder.set_override("storage.url", url)?;
        }
    }
    if let Ok(token) = std::env::var(LEGACY_UPSTASH_TOKEN_VAR) {
        builder = builder.set_override("storage.token", token)?;
    }

    Ok(builder)
}

/// Command-line arguments for configuration override
#[derive(Debug, Parser)]
#[command(name = "vodhub")]
#[command(about = "Play-record, favorites and cache storage maintenance tool", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Storage backend (localstorage, redis, kvrocks, upstash, memory)
    #[arg(short, long, value_name = "BACKEND")]
    pub backend: Option<String>,

    /// Backend connection URL
    #[arg(short, long, value_name = "URL")]
    pub url: Option<String>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Maintenance commands
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Build the storage façade and report backend capabilities
    Ping,
    /// List all registered usernames
    Users,
    /// Print site-wide play statistics as JSON
    Stats,
    /// Print the most played content as JSON
    ContentStats {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Delete cache entries, optionally restricted to a key prefix
    ClearCache {
        #[arg(short, long)]
        prefix: Option<String>,
    },
    /// Delete every user, their data and the admin config
    ClearAll {
        /// Confirm the destructive operation
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: BackendKind,
    pub url: Option<String>,
    /// Bearer token for the REST backend
    pub token: Option<String>,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            url::Url::parse(url).map_err(|e| {
                ConfigError::InvalidStorage(format!("url is not a valid URL: {}", e))
            })?;
        }

        if self.backend == BackendKind::Upstash
            && self.token.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::InvalidStorage(
                "token must be provided for the upstash backend".to_string()
            ));
        }

        Ok(())
    }

    /// Connection URL, treating an empty string as absent
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref().filter(|u| !u.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub connect_timeout_ms: u64,
    pub keepalive_interval_ms: u64,
    /// Interval between attempts while the first connection is being established
    pub initial_retry_interval_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub reconnect_max_attempts: u32,
    pub request_timeout_ms: u64,
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidConnection("connect_timeout_ms must be greater than 0".to_string()));
        }

        if self.keepalive_interval_ms == 0 {
            return Err(ConfigError::InvalidConnection("keepalive_interval_ms must be greater than 0".to_string()));
        }

        if self.reconnect_base_delay_ms > self.reconnect_max_delay_ms {
            return Err(ConfigError::InvalidConnection(
                "reconnect_base_delay_ms must not exceed reconnect_max_delay_ms".to_string()
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidConnection("request_timeout_ms must be greater than 0".to_string()));
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn initial_retry_interval(&self) -> Duration {
        Duration::from_millis(self.initial_retry_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidRetry("max_retries must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// TTL of the site-wide statistics summary (seconds)
    pub stats_ttl: u64,
    pub search_history_limit: usize,
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stats_ttl == 0 {
            return Err(ConfigError::InvalidCache("stats_ttl must be greater than 0".to_string()));
        }

        if self.search_history_limit == 0 {
            return Err(ConfigError::InvalidCache("search_history_limit must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// How stored credentials are sealed: "plaintext" or "bcrypt"
    pub password_hashing: String,
}

impl SecurityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid = ["plaintext", "bcrypt"];
        if !valid.contains(&self.password_hashing.as_str()) {
            return Err(ConfigError::InvalidSecurity(
                format!("password_hashing must be one of: {:?}", valid)
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
    pub rotation: String,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("level must be one of: {:?}", valid_levels)
            ));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("format must be one of: {:?}", valid_formats)
            ));
        }

        let valid_outputs = ["stdout", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("output must be one of: {:?}", valid_outputs)
            ));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string()
            ));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&self.rotation.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("rotation must be one of: {:?}", valid_rotations)
            ));
        }

        Ok(())
    }
}
