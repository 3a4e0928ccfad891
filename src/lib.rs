//! vodhub storage library
//!
//! Per-user persistence for a multi-source video aggregator: play records,
//! favorites, search history, skip settings and accounts, plus a generic TTL
//! cache and play statistics, over interchangeable key-value backends.

pub mod auth;
pub mod cache;
pub mod core;
pub mod db;
pub mod kv;
pub mod stats;

// Re-export commonly used types
pub use crate::core::{BackendKind, Config, VodError};
pub use cache::{CacheLayer, CacheTtl};
pub use db::{DbManager, Storage};
pub use kv::{ConnectionRegistry, KvClient};
pub use stats::StatsAggregator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
