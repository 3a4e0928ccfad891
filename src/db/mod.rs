//! Storage module
//!
//! This module provides the persistence layer including:
//! - Key layout for per-user namespaces
//! - Data models and statistics shapes
//! - The storage contract and its key-value adapter
//! - The manager façade used by the application

pub mod keys;
pub mod manager;
pub mod models;
pub mod repository;

pub use manager::DbManager;
pub use models::{
    AdminConfig, ContentStat, DailyStat, Favorite, FavoriteOrigin, PlayRecord, PlayStatsResult,
    SkipConfig, SourceCount, UserPlayStat,
};
pub use repository::{BulkClear, KvStorage, Storage, UnavailableStorage};
