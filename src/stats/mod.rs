//! Play statistics
//!
//! Statistics are derived from play records on demand. The site-wide summary
//! is cached under [`PLAY_STATS_CACHE_KEY`] and only invalidated on writes;
//! the next read recomputes it from scratch.

use crate::cache::CacheLayer;
use crate::core::error::Result;
use crate::db::keys::split_storage_key;
use crate::db::models::{ContentStat, DailyStat, PlayRecord, PlayStatsResult, SourceCount, UserPlayStat};
use crate::db::repository::Storage;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const PLAY_STATS_CACHE_KEY: &str = "play_stats_summary";

const RECENT_RECORDS: usize = 10;
const TOP_SOURCES: usize = 5;
const DAILY_WINDOW: i64 = 7;
const UNKNOWN_SOURCE: &str = "unknown";

pub struct StatsAggregator {
    storage: Arc<dyn Storage>,
    cache: CacheLayer,
    ttl_secs: u64,
    recomputations: AtomicU64,
}

impl StatsAggregator {
    pub fn new(storage: Arc<dyn Storage>, ttl_secs: u64) -> Self {
        Self {
            cache: CacheLayer::new(Arc::clone(&storage)),
            storage,
            ttl_secs,
            recomputations: AtomicU64::new(0),
        }
    }

    /// How many times the site-wide summary has been computed
    pub fn recomputations(&self) -> u64 {
        self.recomputations.load(Ordering::SeqCst)
    }

    pub async fn get_user_play_stat(&self, user: &str) -> Result<UserPlayStat> {
        let records = self.storage.get_all_play_records(user).await?;
        Ok(user_play_stat(user, records.into_values().collect()))
    }

    /// Site-wide summary, served from cache while it is fresh
    pub async fn get_play_stats(&self) -> Result<PlayStatsResult> {
        if let Some(cached) = self.cache.get_json::<PlayStatsResult>(PLAY_STATS_CACHE_KEY).await {
            debug!("Serving cached play statistics");
            return Ok(cached);
        }

        let users = self.storage.get_all_users().await?;
        let mut user_stats = Vec::with_capacity(users.len());
        for user in &users {
            let stat = match self.get_user_play_stat(user).await {
                Ok(stat) => stat,
                Err(e) => {
                    warn!(user = %user, error = %e, "Failed to aggregate user, counting as empty");
                    UserPlayStat::empty(user)
                }
            };
            user_stats.push(stat);
        }

        let result = summarize(user_stats, Utc::now().date_naive());
        self.recomputations.fetch_add(1, Ordering::SeqCst);
        info!(
            users = result.total_users,
            plays = result.total_plays,
            "Recomputed play statistics"
        );

        if let Err(e) = self.cache.set(PLAY_STATS_CACHE_KEY, &result, Some(self.ttl_secs)).await {
            warn!(error = %e, "Failed to cache play statistics");
        }
        Ok(result)
    }

    /// Most played titles across all users
    pub async fn get_content_stats(&self, limit: usize) -> Result<Vec<ContentStat>> {
        let users = self.storage.get_all_users().await?;
        let mut per_user = Vec::with_capacity(users.len());
        for user in users {
            let records = self.storage.get_all_play_records(&user).await?;
            per_user.push((user, records));
        }
        Ok(rank_content(per_user, limit))
    }

    /// Drop the cached site-wide summary
    pub async fn invalidate(&self) -> Result<()> {
        self.cache.delete(PLAY_STATS_CACHE_KEY).await
    }
}

fn source_label(record: &PlayRecord) -> &str {
    if record.source_name.is_empty() {
        UNKNOWN_SOURCE
    } else {
        &record.source_name
    }
}

/// Count occurrences, keeping first-seen order
fn count_in_order<'a>(names: impl Iterator<Item = &'a str>) -> Vec<(&'a str, u64)> {
    let mut counts: Vec<(&str, u64)> = Vec::new();
    for name in names {
        match counts.iter_mut().find(|(n, _)| *n == name) {
            Some((_, count)) => *count += 1,
            None => counts.push((name, 1)),
        }
    }
    counts
}

/// Aggregate one user's records
pub fn user_play_stat(user: &str, mut records: Vec<PlayRecord>) -> UserPlayStat {
    if records.is_empty() {
        return UserPlayStat::empty(user);
    }

    let total_watch_time: u64 = records.iter().map(|r| r.play_time).sum();
    let total_plays = records.len() as u64;
    let last_play_time = records.iter().map(|r| r.save_time).max().unwrap_or(0);

    // First encountered maximum wins ties
    let mut most_watched: Option<(&str, u64)> = None;
    for (name, count) in count_in_order(records.iter().map(source_label)) {
        if most_watched.map_or(true, |(_, best)| count > best) {
            most_watched = Some((name, count));
        }
    }
    let most_watched_source = most_watched.map(|(n, _)| n.to_string()).unwrap_or_default();

    records.sort_by(|a, b| b.save_time.cmp(&a.save_time));
    records.truncate(RECENT_RECORDS);

    UserPlayStat {
        username: user.to_string(),
        total_watch_time,
        total_plays,
        last_play_time,
        recent_records: records,
        avg_watch_time: total_watch_time as f64 / total_plays as f64,
        most_watched_source,
    }
}

/// Combine per-user statistics into the site-wide summary
///
/// Top sources only look at each user's recent records and count the raw
/// source name. The daily breakdown spreads the current totals evenly over
/// the last seven days.
pub fn summarize(mut user_stats: Vec<UserPlayStat>, today: NaiveDate) -> PlayStatsResult {
    let total_users = user_stats.len() as u64;
    let total_watch_time: u64 = user_stats.iter().map(|s| s.total_watch_time).sum();
    let total_plays: u64 = user_stats.iter().map(|s| s.total_plays).sum();

    let (avg_watch_time_per_user, avg_plays_per_user) = if total_users > 0 {
        (
            total_watch_time as f64 / total_users as f64,
            total_plays as f64 / total_users as f64,
        )
    } else {
        (0.0, 0.0)
    };

    let mut top_sources: Vec<SourceCount> = count_in_order(
        user_stats
            .iter()
            .flat_map(|s| s.recent_records.iter())
            .map(|r| r.source_name.as_str()),
    )
    .into_iter()
    .map(|(source, count)| SourceCount { source: source.to_string(), count })
    .collect();
    top_sources.sort_by(|a, b| b.count.cmp(&a.count));
    top_sources.truncate(TOP_SOURCES);

    let daily_stats = (0..DAILY_WINDOW)
        .rev()
        .map(|days_ago| DailyStat {
            date: (today - ChronoDuration::days(days_ago)).format("%Y-%m-%d").to_string(),
            watch_time: total_watch_time / DAILY_WINDOW as u64,
            plays: total_plays / DAILY_WINDOW as u64,
        })
        .collect();

    user_stats.sort_by(|a, b| b.total_watch_time.cmp(&a.total_watch_time));

    PlayStatsResult {
        total_users,
        total_watch_time,
        total_plays,
        avg_watch_time_per_user,
        avg_plays_per_user,
        user_stats,
        top_sources,
        daily_stats,
    }
}

struct ContentAccumulator {
    stat: ContentStat,
    users: BTreeSet<String>,
}

/// Group every user's records by composite key and rank by play count
pub fn rank_content(
    per_user: Vec<(String, BTreeMap<String, PlayRecord>)>,
    limit: usize,
) -> Vec<ContentStat> {
    let mut order: Vec<ContentAccumulator> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (user, records) in per_user {
        for (composite, record) in records {
            let slot = match index.get(&composite) {
                Some(&slot) => slot,
                None => {
                    let (source, id) = split_storage_key(&composite).unwrap_or((composite.as_str(), ""));
                    order.push(ContentAccumulator {
                        stat: ContentStat {
                            source: source.to_string(),
                            id: id.to_string(),
                            title: record.title.clone(),
                            source_name: record.source_name.clone(),
                            cover: record.cover.clone(),
                            year: record.year.clone(),
                            play_count: 0,
                            total_watch_time: 0,
                            average_watch_time: 0.0,
                            last_played: record.save_time,
                            unique_users: 0,
                        },
                        users: BTreeSet::new(),
                    });
                    index.insert(composite.clone(), order.len() - 1);
                    order.len() - 1
                }
            };

            let acc = &mut order[slot];
            acc.stat.play_count += 1;
            acc.stat.total_watch_time += record.play_time;
            acc.stat.last_played = acc.stat.last_played.max(record.save_time);
            acc.users.insert(user.clone());
        }
    }

    let mut stats: Vec<ContentStat> = order
        .into_iter()
        .map(|acc| {
            let mut stat = acc.stat;
            stat.average_watch_time = stat.total_watch_time as f64 / stat.play_count as f64;
            stat.unique_users = acc.users.len() as u64;
            stat
        })
        .collect();

    stats.sort_by(|a, b| b.play_count.cmp(&a.play_count));
    stats.truncate(limit);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source_name: &str, play_time: u64, save_time: i64) -> PlayRecord {
        PlayRecord {
            title: "Show".to_string(),
            source_name: source_name.to_string(),
            cover: String::new(),
            year: "2024".to_string(),
            index: 1,
            total_episodes: 10,
            play_time,
            total_time: 3600,
            save_time,
            search_title: String::new(),
        }
    }

    #[test]
    fn test_empty_user_stat() {
        let stat = user_play_stat("alice", Vec::new());
        assert_eq!(stat, UserPlayStat::empty("alice"));
    }

    #[test]
    fn test_user_stat_aggregates() {
        let records = (0..12).map(|i| record("A", 10, i)).collect();
        let stat = user_play_stat("alice", records);

        assert_eq!(stat.total_watch_time, 120);
        assert_eq!(stat.total_plays, 12);
        assert_eq!(stat.last_play_time, 11);
        assert_eq!(stat.avg_watch_time, 10.0);
        assert_eq!(stat.recent_records.len(), 10);
        assert_eq!(stat.recent_records[0].save_time, 11);
        assert_eq!(stat.recent_records[9].save_time, 2);
    }

    #[test]
    fn test_most_watched_first_max_wins() {
        let records = vec![record("B", 1, 1), record("A", 1, 2), record("A", 1, 3), record("B", 1, 4)];
        assert_eq!(user_play_stat("u", records).most_watched_source, "B");

        let records = vec![record("B", 1, 1), record("A", 1, 2), record("A", 1, 3)];
        assert_eq!(user_play_stat("u", records).most_watched_source, "A");

        let records = vec![record("", 1, 1)];
        assert_eq!(user_play_stat("u", records).most_watched_source, "unknown");
    }

    #[test]
    fn test_summary_of_nobody() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let summary = summarize(Vec::new(), today);
        assert_eq!(summary.total_users, 0);
        assert_eq!(summary.avg_watch_time_per_user, 0.0);
        assert_eq!(summary.avg_plays_per_user, 0.0);
        assert!(summary.top_sources.is_empty());
        assert_eq!(summary.daily_stats.len(), 7);
    }

    #[test]
    fn test_summary_daily_and_sources() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let alice = user_play_stat(
            "alice",
            vec![record("A", 700, 1), record("B", 50, 2), record("A", 0, 3)],
        );
        let bob = user_play_stat("bob", vec![record("C", 1000, 4)]);

        let summary = summarize(vec![alice, bob], today);
        assert_eq!(summary.total_users, 2);
        assert_eq!(summary.total_watch_time, 1750);
        assert_eq!(summary.total_plays, 4);
        assert_eq!(summary.avg_watch_time_per_user, 875.0);
        assert_eq!(summary.avg_plays_per_user, 2.0);

        assert_eq!(summary.user_stats[0].username, "bob");
        assert_eq!(summary.top_sources[0], SourceCount { source: "A".into(), count: 2 });
        assert_eq!(summary.top_sources.len(), 3);

        let dates: Vec<&str> = summary.daily_stats.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(
            dates,
            vec!["2024-02-24", "2024-02-25", "2024-02-26", "2024-02-27", "2024-02-28", "2024-02-29", "2024-03-01"]
        );
        assert!(summary.daily_stats.iter().all(|d| d.watch_time == 250 && d.plays == 0));
    }

    #[test]
    fn test_top_sources_capped_at_five() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let records = ["a", "b", "c", "d", "e", "f"]
            .iter()
            .enumerate()
            .map(|(i, s)| record(s, 1, i as i64))
            .collect();
        let summary = summarize(vec![user_play_stat("u", records)], today);
        assert_eq!(summary.top_sources.len(), 5);
    }

    #[test]
    fn test_top_sources_keep_raw_names() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let stat = user_play_stat("u", vec![record("", 1, 1), record("", 1, 2), record("A", 1, 3)]);
        assert_eq!(stat.most_watched_source, "unknown");

        let summary = summarize(vec![stat], today);
        assert_eq!(summary.top_sources[0], SourceCount { source: String::new(), count: 2 });
    }

    #[test]
    fn test_rank_content() {
        let mut alice = BTreeMap::new();
        alice.insert("tv1+42".to_string(), record("S1", 90, 100));
        let mut bob = BTreeMap::new();
        bob.insert("tv1+42".to_string(), record("S1", 200, 300));
        bob.insert("tv2+7".to_string(), record("S2", 50, 200));

        let ranked = rank_content(
            vec![("alice".to_string(), alice.clone()), ("bob".to_string(), bob.clone())],
            10,
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].source, "tv1");
        assert_eq!(ranked[0].id, "42");
        assert_eq!(ranked[0].play_count, 2);
        assert_eq!(ranked[0].total_watch_time, 290);
        assert_eq!(ranked[0].average_watch_time, 145.0);
        assert_eq!(ranked[0].unique_users, 2);
        assert_eq!(ranked[0].last_played, 300);

        let top = rank_content(vec![("alice".to_string(), alice), ("bob".to_string(), bob)], 1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].id, "42");
    }
}
