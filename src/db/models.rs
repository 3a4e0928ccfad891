//! Storage models
//!
//! Entities persisted per user plus the derived statistics shapes. Field
//! names follow the JSON already stored by existing deployments.

use crate::core::error::{Result, VodError};
use serde::{Deserialize, Serialize};

/// Allowed overshoot of `play_time` past `total_time` (seconds)
pub const PLAY_TIME_TOLERANCE_SECS: u64 = 5;

/// Playback progress for one (source, id) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayRecord {
    pub title: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub year: String,
    /// 1-based episode index
    pub index: u32,
    pub total_episodes: u32,
    /// Seconds elapsed
    pub play_time: u64,
    /// Seconds duration
    pub total_time: u64,
    /// Milliseconds since the Unix epoch
    pub save_time: i64,
    #[serde(default)]
    pub search_title: String,
}

impl PlayRecord {
    pub fn validate(&self) -> Result<()> {
        if self.index < 1 || self.index > self.total_episodes {
            return Err(VodError::ValidationError(format!(
                "episode index {} outside 1..={}",
                self.index, self.total_episodes
            )));
        }

        if self.play_time > self.total_time + PLAY_TIME_TOLERANCE_SECS {
            return Err(VodError::ValidationError(format!(
                "play_time {}s exceeds total_time {}s",
                self.play_time, self.total_time
            )));
        }

        Ok(())
    }

    /// Whether a playback position is worth persisting: at least one second
    /// in and with a known duration
    pub fn is_checkpoint(elapsed_secs: f64, duration_secs: f64) -> bool {
        elapsed_secs >= 1.0 && duration_secs.is_finite() && duration_secs > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FavoriteOrigin {
    Vod,
    Live,
    ShortDrama,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    #[serde(default)]
    pub source_name: String,
    pub total_episodes: u32,
    pub title: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub cover: String,
    pub save_time: i64,
    #[serde(default)]
    pub search_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<FavoriteOrigin>,
}

/// Intro/outro skipping for one title
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SkipConfig {
    pub enable: bool,
    /// Skip until this many seconds in
    pub intro_time: f64,
    /// Offset from the end (zero or negative) at which to skip ahead
    pub outro_time: f64,
}

impl SkipConfig {
    /// All fields at their defaults; such a config is deleted, never stored
    pub fn is_default(&self) -> bool {
        !self.enable && self.intro_time == 0.0 && self.outro_time == 0.0
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.intro_time >= 0.0) {
            return Err(VodError::ValidationError(format!(
                "intro_time must be >= 0, got {}",
                self.intro_time
            )));
        }
        if !(self.outro_time <= 0.0) {
            return Err(VodError::ValidationError(format!(
                "outro_time must be <= 0, got {}",
                self.outro_time
            )));
        }
        Ok(())
    }
}

/// Site-wide admin configuration, opaque to the storage layer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdminConfig(pub serde_json::Map<String, serde_json::Value>);

impl AdminConfig {
    pub fn get(&self, section: &str) -> Option<&serde_json::Value> {
        self.0.get(section)
    }

    pub fn set(&mut self, section: impl Into<String>, value: serde_json::Value) {
        self.0.insert(section.into(), value);
    }
}

/// Aggregated statistics for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPlayStat {
    pub username: String,
    pub total_watch_time: u64,
    pub total_plays: u64,
    pub last_play_time: i64,
    pub recent_records: Vec<PlayRecord>,
    pub avg_watch_time: f64,
    pub most_watched_source: String,
}

impl UserPlayStat {
    pub fn empty(username: &str) -> Self {
        Self {
            username: username.to_string(),
            total_watch_time: 0,
            total_plays: 0,
            last_play_time: 0,
            recent_records: Vec::new(),
            avg_watch_time: 0.0,
            most_watched_source: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCount {
    pub source: String,
    pub count: u64,
}

/// One day of the synthetic weekly breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStat {
    /// `YYYY-MM-DD`
    pub date: String,
    pub watch_time: u64,
    pub plays: u64,
}

/// Site-wide statistics summary
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayStatsResult {
    pub total_users: u64,
    pub total_watch_time: u64,
    pub total_plays: u64,
    pub avg_watch_time_per_user: f64,
    pub avg_plays_per_user: f64,
    pub user_stats: Vec<UserPlayStat>,
    pub top_sources: Vec<SourceCount>,
    /// Evenly divided current totals, not a historical series
    pub daily_stats: Vec<DailyStat>,
}

/// Popularity of one (source, id) pair across users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStat {
    pub source: String,
    pub id: String,
    pub title: String,
    #[serde(rename = "source_name")]
    pub source_name: String,
    pub cover: String,
    pub year: String,
    pub play_count: u64,
    pub total_watch_time: u64,
    pub average_watch_time: f64,
    pub last_played: i64,
    pub unique_users: u64,
}
