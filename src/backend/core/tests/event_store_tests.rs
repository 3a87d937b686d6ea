//! Event store behavior through the public trait.
//!
//! Covers:
//! - Version and global sequence assignment
//! - Optimistic concurrency on stale appends
//! - All-or-nothing batches
//! - Concurrent writers racing on one stream

use std::sync::Arc;

use chrono::Utc;
use pdfgen_core::error::ErrorCode;
use pdfgen_core::events::{EventStore, InMemoryEventStore, NewEvent};
use serde_json::json;
use uuid::Uuid;

fn new_event(kind: &str) -> NewEvent {
    NewEvent {
        aggregate_type: "template".to_string(),
        kind: kind.to_string(),
        payload: json!({"n": kind}),
        occurred_at: Utc::now(),
    }
}

// ============================================================================
// Append & Load
// ============================================================================

#[tokio::test]
async fn test_streams_interleave_in_global_order() {
    let store = InMemoryEventStore::new();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    store.append(a, 0, vec![new_event("a1")]).await.unwrap();
    store.append(b, 0, vec![new_event("b1")]).await.unwrap();
    store.append(a, 1, vec![new_event("a2")]).await.unwrap();

    let all = store.load_since(0, 100).await.unwrap();
    let kinds: Vec<&str> = all.iter().map(|e| e.kind.as_str()).collect();
    assert_eq!(kinds, vec!["a1", "b1", "a2"]);
    let sequences: Vec<u64> = all.iter().map(|e| e.global_sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);

    let stream_a = store.load(a).await.unwrap();
    let versions: Vec<u64> = stream_a.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![1, 2]);
}

#[tokio::test]
async fn test_load_since_after_last_position_is_empty() {
    let store = InMemoryEventStore::new();
    let id = Uuid::new_v4();
    store
        .append(id, 0, vec![new_event("one"), new_event("two")])
        .await
        .unwrap();

    assert!(store.load_since(2, 10).await.unwrap().is_empty());
    assert_eq!(store.load_since(1, 10).await.unwrap()[0].kind, "two");
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_stale_batch_writes_nothing() {
    let store = InMemoryEventStore::new();
    let id = Uuid::new_v4();
    store.append(id, 0, vec![new_event("created")]).await.unwrap();

    let err = store
        .append(id, 0, vec![new_event("x"), new_event("y")])
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::ConcurrencyConflict);
    assert_eq!(store.current_version(id).await.unwrap(), 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_ahead_of_stream_is_conflict() {
    let store = InMemoryEventStore::new();
    let err = store
        .append(Uuid::new_v4(), 3, vec![new_event("x")])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConcurrencyConflict);
    assert!(store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_writers_exactly_one_wins() {
    let store = InMemoryEventStore::shared();
    let id = Uuid::new_v4();
    store.append(id, 0, vec![new_event("created")]).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.append(id, 1, vec![new_event(&format!("w{}", i))]).await })
        })
        .collect();

    let mut wins = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(version) => {
                assert_eq!(version, 2);
                wins += 1;
            }
            Err(e) => {
                assert_eq!(e.code(), ErrorCode::ConcurrencyConflict);
                conflicts += 1;
            }
        }
    }

    assert_eq!(wins, 1);
    assert_eq!(conflicts, 15);
    assert_eq!(store.load(id).await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_streams_keep_sequences_gap_free() {
    let store = InMemoryEventStore::shared();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let id = Uuid::new_v4();
                for version in 0..10 {
                    store.append(id, version, vec![new_event("e")]).await.unwrap();
                }
            })
        })
        .collect();
    futures::future::join_all(handles).await;

    let all = store.load_since(0, 1_000).await.unwrap();
    assert_eq!(all.len(), 80);
    for (i, event) in all.iter().enumerate() {
        assert_eq!(event.global_sequence, i as u64 + 1);
    }
}
