// Storage façade integration tests
//
// Exercise the manager end to end over the in-memory backend.

mod common;

use common::{memory_manager, play_record};
use serde_json::json;
use std::time::Duration;
use vodhub::core::{BackendKind, Config, VodError};
use vodhub::db::{AdminConfig, DbManager, Favorite, FavoriteOrigin, PlayStatsResult, SkipConfig};
use vodhub::kv::KvClient;
use vodhub::ConnectionRegistry;

fn favorite(title: &str) -> Favorite {
    Favorite {
        source_name: "Source One".to_string(),
        total_episodes: 24,
        title: title.to_string(),
        year: "2023".to_string(),
        cover: String::new(),
        save_time: 1_700_000_000,
        search_title: title.to_string(),
        origin: Some(FavoriteOrigin::Vod),
    }
}

#[tokio::test]
async fn test_play_record_roundtrip() {
    let (_, db) = memory_manager();
    let record = play_record("Show", "Source One", 120, 1800, 1_700_000_000);

    db.save_play_record("alice", "tv1", "42", &record).await.unwrap();
    assert_eq!(db.get_play_record("alice", "tv1", "42").await.unwrap(), Some(record));
    assert_eq!(db.get_play_record("bob", "tv1", "42").await.unwrap(), None);
}

#[tokio::test]
async fn test_play_record_rejects_overshoot() {
    let (_, db) = memory_manager();
    let record = play_record("Show", "Source One", 1900, 1800, 1_700_000_000);

    let err = db.save_play_record("alice", "tv1", "42", &record).await.unwrap_err();
    assert!(matches!(err, VodError::ValidationError(_)));
}

#[tokio::test]
async fn test_favorite_lifecycle() {
    let (kv, db) = memory_manager();

    db.save_favorite("alice", "tv1", "42", &favorite("Show")).await.unwrap();
    assert!(kv.exists("u:alice:fav:tv1+42").await.unwrap());
    assert!(db.is_favorited("alice", "tv1", "42").await.unwrap());

    let all = db.get_all_favorites("alice").await.unwrap();
    assert_eq!(all.get("tv1+42"), Some(&favorite("Show")));

    db.delete_favorite("alice", "tv1", "42").await.unwrap();
    assert!(!db.is_favorited("alice", "tv1", "42").await.unwrap());
    assert_eq!(db.get_favorite("alice", "tv1", "42").await.unwrap(), None);
}

#[tokio::test]
async fn test_search_history_dedupes_and_caps() {
    let (_, db) = memory_manager();

    db.add_search_history("alice", "a").await.unwrap();
    db.add_search_history("alice", "b").await.unwrap();
    db.add_search_history("alice", "a").await.unwrap();
    assert_eq!(db.get_search_history("alice").await.unwrap(), vec!["a", "b"]);

    for i in 0..25 {
        db.add_search_history("alice", &format!("kw{}", i)).await.unwrap();
    }
    let history = db.get_search_history("alice").await.unwrap();
    assert_eq!(history.len(), 20);
    assert_eq!(history[0], "kw24");
    assert_eq!(history[19], "kw5");

    db.delete_search_history("alice", Some("kw24")).await.unwrap();
    assert_eq!(db.get_search_history("alice").await.unwrap()[0], "kw23");

    db.delete_search_history("alice", None).await.unwrap();
    assert!(db.get_search_history("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_default_skip_config_removes_key() {
    let (kv, db) = memory_manager();
    let custom = SkipConfig {
        enable: true,
        intro_time: 85.0,
        outro_time: -120.0,
    };

    db.set_skip_config("alice", "tv1", "42", &custom).await.unwrap();
    assert!(kv.exists("u:alice:skip:tv1+42").await.unwrap());
    assert_eq!(db.get_skip_config("alice", "tv1", "42").await.unwrap(), Some(custom));

    db.set_skip_config("alice", "tv1", "42", &SkipConfig::default()).await.unwrap();
    assert!(!kv.exists("u:alice:skip:tv1+42").await.unwrap());
    assert!(db.get_all_skip_configs("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_skip_config_floats_roundtrip_exactly() {
    let (_, db) = memory_manager();
    let values = [
        (957.2461179748201, -957.2461179748201),
        (0.1 + 0.2, -(1.0 / 3.0)),
        (115.33333333333333, -115.33333333333331),
        (f64::MIN_POSITIVE, -2.0_f64.sqrt() * 100.0),
    ];

    for (i, (intro_time, outro_time)) in values.into_iter().enumerate() {
        let config = SkipConfig { enable: true, intro_time, outro_time };
        let id = i.to_string();
        db.set_skip_config("alice", "tv1", &id, &config).await.unwrap();
        let loaded = db.get_skip_config("alice", "tv1", &id).await.unwrap().unwrap();
        assert_eq!(loaded.intro_time.to_bits(), intro_time.to_bits());
        assert_eq!(loaded.outro_time.to_bits(), outro_time.to_bits());
    }
}

#[tokio::test]
async fn test_delete_user_cascades() {
    let (kv, db) = memory_manager();
    db.register_user("alice", "pw").await.unwrap();
    db.register_user("bob", "pw").await.unwrap();
    db.save_play_record("alice", "tv1", "42", &play_record("Show", "S", 10, 100, 1)).await.unwrap();
    db.save_favorite("alice", "tv1", "42", &favorite("Show")).await.unwrap();
    db.add_search_history("alice", "show").await.unwrap();
    db.set_skip_config("alice", "tv1", "42", &SkipConfig { enable: true, intro_time: 5.0, outro_time: 0.0 })
        .await
        .unwrap();

    db.delete_user("alice").await.unwrap();

    assert!(kv.keys("u:alice:*").await.unwrap().is_empty());
    assert_eq!(db.get_all_users().await.unwrap(), vec!["bob"]);
    assert!(!db.check_user_exist("alice").await.unwrap());
    assert!(db.get_all_play_records("alice").await.unwrap().is_empty());
    assert!(db.get_all_favorites("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_admin_config_roundtrip() {
    let (_, db) = memory_manager();
    assert_eq!(db.get_admin_config().await.unwrap(), None);

    let mut config = AdminConfig::default();
    config.set("SiteConfig", json!({"SiteName": "vodhub"}));
    db.save_admin_config(&config).await.unwrap();

    let loaded = db.get_admin_config().await.unwrap().unwrap();
    assert_eq!(loaded.get("SiteConfig"), Some(&json!({"SiteName": "vodhub"})));
}

#[tokio::test(start_paused = true)]
async fn test_cache_entry_expires() {
    let (_, db) = memory_manager();
    db.set_cache("douban:123", &json!({"rate": 8.1}), Some(60)).await.unwrap();
    db.set_cache("pinned", &json!("forever"), None).await.unwrap();

    tokio::time::advance(Duration::from_secs(59)).await;
    assert_eq!(db.get_cache("douban:123").await, Some(json!({"rate": 8.1})));

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(db.get_cache("douban:123").await, None);
    assert_eq!(db.get_cache("pinned").await, Some(json!("forever")));
}

#[tokio::test]
async fn test_clear_cache_by_prefix() {
    let (_, db) = memory_manager();
    db.set_cache("douban:1", &json!(1), None).await.unwrap();
    db.set_cache("douban:2", &json!(2), None).await.unwrap();
    db.set_cache("bangumi:1", &json!(3), None).await.unwrap();

    assert_eq!(db.clear_expired_cache(Some("douban:")).await.unwrap(), 2);
    assert_eq!(db.get_cache("bangumi:1").await, Some(json!(3)));
    assert_eq!(db.clear_expired_cache(None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_localstorage_is_disabled() {
    let registry = ConnectionRegistry::new();
    let config = Config::default();
    assert_eq!(config.storage.backend, BackendKind::LocalStorage);

    let db = DbManager::new(&config, &registry).unwrap();
    let record = play_record("Show", "S", 10, 100, 1);

    let err = db.save_play_record("alice", "tv1", "42", &record).await.unwrap_err();
    assert!(matches!(err, VodError::StorageUnavailable(_)));
    assert!(matches!(db.register_user("alice", "pw").await, Err(VodError::StorageUnavailable(_))));
    assert!(matches!(db.clear_all_data().await, Err(VodError::Unsupported(_))));

    assert_eq!(db.get_play_stats().await, PlayStatsResult::default());
    assert!(!db.is_stats_supported());
}
