//! Template aggregate commands and replay against stored history.

use pdfgen_core::error::ErrorCode;
use pdfgen_core::events::{
    Aggregate, EventStore, InMemoryEventStore, StoredEvent, TemplateAggregate, TemplateContent,
    TemplateGrid,
};
use serde_json::json;
use uuid::Uuid;

fn content(texts: &[&str]) -> TemplateContent {
    TemplateContent {
        grid: TemplateGrid { columns: 12, gap: 8 },
        components: texts
            .iter()
            .enumerate()
            .map(|(i, t)| json!({"id": format!("c{}", i), "type": "text", "props": {"text": t}}))
            .collect(),
        variables: vec![json!({"name": "CustomerName"})],
    }
}

async fn persist(store: &InMemoryEventStore, aggregate: &mut TemplateAggregate) -> u64 {
    let events = aggregate.uncommitted_new_events().unwrap();
    let version = store
        .append(aggregate.id(), aggregate.expected_version(), events)
        .await
        .unwrap();
    aggregate.clear();
    version
}

#[tokio::test]
async fn test_replay_rebuilds_latest_content() {
    let store = InMemoryEventStore::new();
    let id = Uuid::new_v4();

    let mut aggregate = TemplateAggregate::create(id, "Invoice", "Monthly", content(&["a"])).unwrap();
    persist(&store, &mut aggregate).await;

    for texts in [&["a", "b"][..], &["b"][..], &["b", "c", "d"][..]] {
        let mut loaded = TemplateAggregate::replay(id, &store.load(id).await.unwrap()).unwrap();
        loaded.update("Invoice", "Monthly", &content(texts)).unwrap();
        persist(&store, &mut loaded).await;
    }

    let rebuilt = TemplateAggregate::replay(id, &store.load(id).await.unwrap()).unwrap();
    assert_eq!(rebuilt.version(), 4);
    assert_eq!(rebuilt.content(), &content(&["b", "c", "d"]));
    assert!(!rebuilt.is_archived());
}

#[tokio::test]
async fn test_point_in_time_replay() {
    let store = InMemoryEventStore::new();
    let id = Uuid::new_v4();

    let mut aggregate = TemplateAggregate::create(id, "v1", "", content(&["one"])).unwrap();
    aggregate.update("v2", "", &content(&["two"])).unwrap();
    aggregate.archive().unwrap();
    persist(&store, &mut aggregate).await;

    let history = store.load(id).await.unwrap();
    let at_two = TemplateAggregate::replay_until(id, &history, 2).unwrap();
    assert_eq!(at_two.name(), "v2");
    assert_eq!(at_two.content(), &content(&["two"]));
    assert!(!at_two.is_archived());

    let at_one = TemplateAggregate::replay_until(id, &history, 1).unwrap();
    assert_eq!(at_one.name(), "v1");
}

#[test]
fn test_empty_name_is_rejected() {
    let err = TemplateAggregate::create(Uuid::new_v4(), "   ", "", TemplateContent::default()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}

#[test]
fn test_tampered_patch_fails_replay() {
    tokio_test::block_on(async {
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();
        let mut aggregate = TemplateAggregate::create(id, "T", "", content(&["a"])).unwrap();
        aggregate.update("T", "", &content(&["b"])).unwrap();
        persist(&store, &mut aggregate).await;

        let mut history: Vec<StoredEvent> = store.load(id).await.unwrap();
        history[1].payload["content_patch"] = json!("--- original\n+++ modified\n@@ -1 +1 @@\n-nothing like this\n+x\n");

        let err = TemplateAggregate::replay(id, &history).unwrap_err();
        assert!(err.is_integrity_violation());
    });
}

#[test]
fn test_out_of_order_history_is_corrupted() {
    tokio_test::block_on(async {
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();
        let mut aggregate = TemplateAggregate::create(id, "T", "", content(&["a"])).unwrap();
        aggregate.update("T", "", &content(&["b"])).unwrap();
        persist(&store, &mut aggregate).await;

        let mut history = store.load(id).await.unwrap();
        history.swap(0, 1);

        let err = TemplateAggregate::replay(id, &history).unwrap_err();
        assert_eq!(err.code(), ErrorCode::EventStreamCorrupted);
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_updates_from_same_version() {
    let store = std::sync::Arc::new(InMemoryEventStore::new());
    let id = Uuid::new_v4();
    let mut aggregate = TemplateAggregate::create(id, "T", "", content(&["a"])).unwrap();
    persist(&store, &mut aggregate).await;

    let history = store.load(id).await.unwrap();
    let mut left = TemplateAggregate::replay(id, &history).unwrap();
    let mut right = TemplateAggregate::replay(id, &history).unwrap();
    left.update("left", "", &content(&["l"])).unwrap();
    right.update("right", "", &content(&["r"])).unwrap();

    let tasks = [left, right].map(|aggregate| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .append(id, aggregate.expected_version(), aggregate.uncommitted_new_events().unwrap())
                .await
        })
    });

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.into_iter().find_map(|r| r.err()).unwrap();
    assert_eq!(loser.code(), ErrorCode::ConcurrencyConflict);
    assert_eq!(store.current_version(id).await.unwrap(), 2);
}
