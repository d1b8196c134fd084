//! Integration tests for the vector store.

use std::collections::HashSet;

use lifequery_core::VectorRecord;
use lifequery_vector::{Collection, QueryFilter, VectorStore};

fn record(chunk_id: &str, chat_id: &str, start: i64, embedding: Vec<f32>) -> VectorRecord {
    VectorRecord {
        chunk_id: chunk_id.to_string(),
        chat_id: chat_id.to_string(),
        chat_name: Some(format!("Chat {chat_id}")),
        participants: vec!["Alice".to_string(), "Bob".to_string()],
        timestamp_start: start,
        timestamp_end: start + 60,
        message_count: 2,
        content: format!("content of {chunk_id}"),
        content_hash: format!("hash-{chunk_id}"),
        embedding_version: "test-model".to_string(),
        embedding,
    }
}

fn mask(chat_ids: &[&str]) -> QueryFilter {
    QueryFilter {
        chat_ids: Some(chat_ids.iter().map(|s| s.to_string()).collect()),
        ..Default::default()
    }
}

#[tokio::test]
async fn query_returns_nearest_first() {
    let store = VectorStore::open_memory().await.unwrap();
    store
        .upsert(
            &[
                record("c1", "a", 0, vec![1.0, 0.0, 0.0]),
                record("c2", "a", 100, vec![0.0, 1.0, 0.0]),
                record("c3", "a", 200, vec![0.9, 0.1, 0.0]),
            ],
            Collection::Live,
        )
        .await
        .unwrap();

    let hits = store
        .query(&[1.0, 0.0, 0.0], 2, &QueryFilter::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].chunk_id, "c1");
    assert_eq!(hits[1].chunk_id, "c3");
    assert!(hits[0].distance < hits[1].distance);
}

#[tokio::test]
async fn query_respects_chat_mask() {
    let store = VectorStore::open_memory().await.unwrap();
    store
        .upsert(
            &[
                record("c1", "a", 0, vec![1.0, 0.0]),
                record("c2", "b", 0, vec![1.0, 0.0]),
            ],
            Collection::Live,
        )
        .await
        .unwrap();

    // Even though b's record is an exact match, only a's is returned.
    let hits = store.query(&[1.0, 0.0], 10, &mask(&["a"])).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chat_id, "a");

    // An empty mask matches nothing.
    let none = store.query(&[1.0, 0.0], 10, &mask(&[])).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn query_respects_date_predicate() {
    let store = VectorStore::open_memory().await.unwrap();
    store
        .upsert(
            &[
                record("old", "a", 1_000, vec![1.0, 0.0]),
                record("new", "a", 2_000, vec![1.0, 0.0]),
            ],
            Collection::Live,
        )
        .await
        .unwrap();

    let filter = QueryFilter {
        chat_ids: None,
        start_ts: Some(1_500),
        end_ts: Some(3_000),
    };
    let hits = store.query(&[1.0, 0.0], 10, &filter).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "new");
}

#[tokio::test]
async fn upsert_replaces_by_chunk_id() {
    let store = VectorStore::open_memory().await.unwrap();
    store
        .upsert(&[record("c1", "a", 0, vec![1.0, 0.0])], Collection::Live)
        .await
        .unwrap();
    store
        .upsert(&[record("c1", "a", 0, vec![0.0, 1.0])], Collection::Live)
        .await
        .unwrap();

    assert_eq!(store.count(Collection::Live).await.unwrap(), 1);
    let hits = store
        .query(&[0.0, 1.0], 1, &QueryFilter::default())
        .await
        .unwrap();
    assert!(hits[0].distance < 1e-6);
}

#[tokio::test]
async fn delete_evicts_records() {
    let store = VectorStore::open_memory().await.unwrap();
    store
        .upsert(
            &[
                record("c1", "a", 0, vec![1.0, 0.0]),
                record("c2", "a", 0, vec![0.0, 1.0]),
            ],
            Collection::Live,
        )
        .await
        .unwrap();

    store.delete(&["c1".to_string()]).await.unwrap();
    let ids = store.chunk_ids().await.unwrap();
    assert_eq!(ids, HashSet::from(["c2".to_string()]));
}

#[tokio::test]
async fn swap_promotes_temp_collection() {
    let store = VectorStore::open_memory().await.unwrap();
    store
        .upsert(&[record("old", "a", 0, vec![1.0, 0.0])], Collection::Live)
        .await
        .unwrap();

    store.create_temp().await.unwrap();
    store
        .upsert(
            &[
                record("new1", "a", 0, vec![1.0, 0.0]),
                record("new2", "a", 100, vec![0.0, 1.0]),
            ],
            Collection::Temp,
        )
        .await
        .unwrap();

    // Before the swap, queries still see the old collection.
    let before = store
        .query(&[1.0, 0.0], 10, &QueryFilter::default())
        .await
        .unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].chunk_id, "old");

    store.swap_from_temp().await.unwrap();

    let after = store
        .query(&[1.0, 0.0], 10, &QueryFilter::default())
        .await
        .unwrap();
    assert_eq!(after.len(), 2);
    assert!(after.iter().all(|hit| hit.chunk_id.starts_with("new")));
    assert_eq!(store.count(Collection::Live).await.unwrap(), 2);
}

#[tokio::test]
async fn swap_without_temp_fails_and_preserves_live() {
    let store = VectorStore::open_memory().await.unwrap();
    store
        .upsert(&[record("c1", "a", 0, vec![1.0, 0.0])], Collection::Live)
        .await
        .unwrap();

    assert!(store.swap_from_temp().await.is_err());
    assert_eq!(store.count(Collection::Live).await.unwrap(), 1);
}

#[tokio::test]
async fn drop_temp_leaves_live_untouched() {
    let store = VectorStore::open_memory().await.unwrap();
    store
        .upsert(&[record("c1", "a", 0, vec![1.0, 0.0])], Collection::Live)
        .await
        .unwrap();
    store.create_temp().await.unwrap();
    store
        .upsert(&[record("t1", "a", 0, vec![1.0, 0.0])], Collection::Temp)
        .await
        .unwrap();

    store.drop_temp().await.unwrap();
    assert_eq!(store.count(Collection::Live).await.unwrap(), 1);
}

#[tokio::test]
async fn stale_temp_collection_removed_on_open() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = VectorStore::open(dir.path()).await.unwrap();
        store.create_temp().await.unwrap();
        store
            .upsert(&[record("t1", "a", 0, vec![1.0, 0.0])], Collection::Temp)
            .await
            .unwrap();
        // Simulated crash: the store goes away mid-reindex.
    }

    let reopened = VectorStore::open(dir.path()).await.unwrap();
    // The stale temp is gone; creating a fresh one succeeds.
    reopened.create_temp().await.unwrap();
    assert_eq!(reopened.count(Collection::Temp).await.unwrap(), 0);
}

#[tokio::test]
async fn stored_fingerprints_report_hash_and_version() {
    let store = VectorStore::open_memory().await.unwrap();
    store
        .upsert(&[record("c1", "a", 0, vec![1.0, 0.0])], Collection::Live)
        .await
        .unwrap();

    let fingerprints = store.stored_fingerprints().await.unwrap();
    let (hash, version) = fingerprints.get("c1").unwrap();
    assert_eq!(hash, "hash-c1");
    assert_eq!(version, "test-model");
}

#[tokio::test]
async fn mixed_dimension_upsert_is_rejected() {
    let store = VectorStore::open_memory().await.unwrap();
    let err = store
        .upsert(
            &[
                record("c1", "a", 0, vec![1.0, 0.0]),
                record("c2", "a", 0, vec![1.0, 0.0, 0.0]),
            ],
            Collection::Live,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("dimension"));
}
