use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use skyfeed_core::{ChangeOp, Item};
use skyfeed_storage::{snapshot, ChangeFeed, ItemStore, LogFeed, MemoryStore, TimeRange, UpsertOutcome};

fn tle(norad: &str, minutes_ago: i64) -> Item {
    let epoch = Utc::now() - Duration::minutes(minutes_ago);
    Item::new("space", norad, "tle", epoch, json!({ "NORAD_CAT_ID": norad }))
        .with_expiry((Utc::now() + Duration::days(14)).timestamp())
}

// ── Idempotency ─────────────────────────────────────────────

#[tokio::test]
async fn replaying_a_run_is_a_no_op() {
    let store = MemoryStore::new(Arc::new(LogFeed::new()));
    let batch = vec![tle("25544", 30), tle("48274", 20), tle("53239", 10)];

    for item in batch.clone() {
        assert_eq!(store.upsert(item).await.unwrap(), UpsertOutcome::Inserted);
    }
    for item in batch {
        assert_eq!(store.upsert(item).await.unwrap(), UpsertOutcome::SkippedStale);
    }

    let feed = store.feed();
    let events = feed.read("space", 0, 100).await;
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.op == ChangeOp::Insert));
}

#[tokio::test]
async fn out_of_order_writes_converge_on_newest() {
    let store = MemoryStore::new(Arc::new(LogFeed::new()));
    let newer = tle("25544", 1);
    let older = tle("25544", 60);

    store.upsert(newer.clone()).await.unwrap();
    assert_eq!(store.upsert(older).await.unwrap(), UpsertOutcome::SkippedStale);
    assert_eq!(store.get("space", "25544").await.unwrap().unwrap().timestamp, newer.timestamp);
}

// ── Queries and TTL ─────────────────────────────────────────

#[tokio::test]
async fn query_returns_ingested_tle_items_in_time_order() {
    let store = MemoryStore::new(Arc::new(LogFeed::new()));
    store.upsert(tle("53239", 10)).await.unwrap();
    store.upsert(tle("25544", 30)).await.unwrap();
    store.upsert(tle("48274", 20)).await.unwrap();

    let keys: Vec<String> = store
        .query("tle", TimeRange::all())
        .await
        .unwrap()
        .into_iter()
        .map(|i| i.sort_key)
        .collect();
    assert_eq!(keys, vec!["25544", "48274", "53239"]);
}

#[tokio::test]
async fn expired_items_are_invisible_before_reclaim() {
    let store = MemoryStore::new(Arc::new(LogFeed::new()));
    let expired = Item::new("space", "old", "tle", Utc::now() - Duration::days(20), json!({}))
        .with_expiry((Utc::now() - Duration::days(6)).timestamp());
    store.upsert(expired).await.unwrap();

    assert!(store.get("space", "old").await.unwrap().is_none());
    assert!(store.query("tle", TimeRange::all()).await.unwrap().is_empty());
    assert_eq!(store.stats().await.item_count, 1);

    assert_eq!(store.reclaim_expired(Utc::now()).await.unwrap(), 1);
    assert_eq!(store.stats().await.item_count, 0);
}

// ── Snapshot ────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_restores_without_new_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("items.jsonl");

    let iss = tle("25544", 5);
    let store = MemoryStore::new(Arc::new(LogFeed::new()));
    store.upsert(iss.clone()).await.unwrap();
    store.upsert(tle("48274", 5)).await.unwrap();
    snapshot::save(&path, &store.live_items(Utc::now()).await).unwrap();

    let restored = MemoryStore::with_items(Arc::new(LogFeed::new()), snapshot::load(&path).unwrap());
    assert_eq!(restored.stats().await.item_count, 2);
    assert_eq!(restored.feed().backlog().await, 0);

    // Replaying the same data after restart is still idempotent.
    assert_eq!(restored.upsert(iss).await.unwrap(), UpsertOutcome::SkippedStale);
}
