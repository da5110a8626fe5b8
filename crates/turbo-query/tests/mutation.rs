mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{items, settle, Harness};
use serde_json::json;
use turbo_query::{
    EngineConfig, EntryStatus, FailureKind, KeyPattern, MutationRequest, NotificationKind,
    TransportError,
};

#[tokio::test(start_paused = true)]
async fn test_create_item_scenario() {
    let h = Harness::new(EngineConfig::default());
    h.transport.reply("GET /items", Ok(json!([{"id": 1}])));
    h.transport
        .reply("GET /items", Ok(json!([{"id": 1}, {"id": 2}])));
    h.transport.always("POST /items", Ok(json!({"id": 2})));

    let entry = h.client.query(&items(1)).settled().await.unwrap();
    assert_eq!(entry.status, EntryStatus::Fresh);
    assert_eq!(entry.data.as_deref(), Some(&json!([{"id": 1}])));

    assert!(h.client.query(&items(1)).is_cached());
    assert_eq!(h.transport.calls("GET /items"), 1);

    let created = h
        .client
        .mutate(
            MutationRequest::post("create-item", "/items")
                .payload(json!({"name": "lamp"}))
                .invalidates("items"),
        )
        .await
        .unwrap();
    assert_eq!(created, json!({"id": 2}));

    let handle = h.client.query(&items(1));
    assert!(!handle.is_cached());
    let entry = handle.settled().await.unwrap();
    assert_eq!(entry.data.as_deref(), Some(&json!([{"id": 1}, {"id": 2}])));
    assert_eq!(h.transport.calls("GET /items"), 2);
    assert_eq!(h.transport.calls("POST /items"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_mutation_invalidates_nothing() {
    let mut h = Harness::new(EngineConfig::default().with_max_retries(3));
    h.transport.always("GET /items", Ok(json!([])));
    h.transport
        .always("POST /items", Err(TransportError::server(500, "boom")));

    h.client.query(&items(1)).settled().await.unwrap();

    let settled = Arc::new(Mutex::new(None));
    let sink = settled.clone();
    let err = h
        .client
        .mutate(
            MutationRequest::post("create-item", "/items")
                .invalidates("items")
                .success_message("Item created")
                .on_settled(move |result| {
                    *sink.lock().unwrap() = Some(result.is_ok());
                }),
        )
        .await
        .unwrap_err();

    assert_eq!(err.failure_kind(), Some(FailureKind::ServerError));
    // Writes are never retried.
    assert_eq!(h.transport.calls("POST /items"), 1);
    assert_eq!(*settled.lock().unwrap(), Some(false));
    assert!(h.client.peek(&items(1)).unwrap().is_fresh());

    let notifications = h.drain_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationKind::Error);
    assert_eq!(notifications[0].title, "create-item");
}

#[tokio::test(start_paused = true)]
async fn test_on_settled_runs_after_invalidation() {
    let mut h = Harness::new(EngineConfig::default());
    h.transport.always("GET /items", Ok(json!([])));
    h.transport.always("DELETE /items/1", Ok(serde_json::Value::Null));

    h.client.query(&items(1)).settled().await.unwrap();

    let observed = Arc::new(Mutex::new(None));
    let sink = observed.clone();
    let client = h.client.clone();
    h.client
        .mutate(
            MutationRequest::delete("delete-item", "/items/1")
                .invalidates("items")
                .success_message("Item deleted")
                .on_settled(move |_| {
                    let status = client.peek(&items(1)).map(|e| e.status);
                    *sink.lock().unwrap() = status;
                }),
        )
        .await
        .unwrap();

    assert_eq!(*observed.lock().unwrap(), Some(EntryStatus::Stale));

    let notifications = h.drain_notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationKind::Success);
    assert_eq!(notifications[0].message, "Item deleted");
}

#[tokio::test(start_paused = true)]
async fn test_mutation_settling_during_read_leaves_entry_stale() {
    let h = Harness::new(EngineConfig::default());
    h.transport
        .reply_after("GET /items", Duration::from_millis(100), Ok(json!(["before"])));
    h.transport.reply("GET /items", Ok(json!(["after"])));
    h.transport.always("POST /items", Ok(json!({})));

    let read = h.client.query(&items(1));
    h.client
        .mutate(MutationRequest::post("create-item", "/items").invalidates("items"))
        .await
        .unwrap();

    let entry = read.settled().await.unwrap();
    assert_eq!(entry.status, EntryStatus::Stale);
    assert_eq!(entry.data.as_deref(), Some(&json!(["before"])));

    let entry = h.client.query(&items(1)).settled().await.unwrap();
    assert_eq!(entry.status, EntryStatus::Fresh);
    assert_eq!(entry.data.as_deref(), Some(&json!(["after"])));
    assert_eq!(h.transport.calls("GET /items"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_subscribed_readers_revalidate_after_mutation() {
    let h = Harness::new(EngineConfig::default());
    h.transport.reply("GET /items", Ok(json!(["v1"])));
    h.transport.reply("GET /items", Ok(json!(["v2"])));
    h.transport.always("PUT /items/1", Ok(json!({})));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _subscription = h.client.subscribe(&items(1), move |entry| {
        sink.lock().unwrap().push(entry.data.as_deref().cloned());
    });
    settle().await;

    h.client
        .mutate(
            MutationRequest::put("rename-item", "/items/1")
                .payload(json!({"name": "desk"}))
                .invalidates(KeyPattern::resource("items")),
        )
        .await
        .unwrap();
    settle().await;

    assert_eq!(h.transport.calls("GET /items"), 2);
    assert_eq!(seen.lock().unwrap().last(), Some(&Some(json!(["v2"]))));
}

#[tokio::test(start_paused = true)]
async fn test_exact_invalidation_leaves_siblings_fresh() {
    let h = Harness::new(EngineConfig::default());
    h.transport.always("GET /items", Ok(json!([])));
    h.transport.always("POST /items", Ok(json!({})));

    h.client.query(&items(1)).settled().await.unwrap();
    h.client.query(&items(2)).settled().await.unwrap();

    let page_one = h.client.key_for(&items(1));
    h.client
        .mutate(MutationRequest::post("touch", "/items").invalidates(page_one))
        .await
        .unwrap();

    assert_eq!(h.client.peek(&items(1)).unwrap().status, EntryStatus::Stale);
    assert_eq!(h.client.peek(&items(2)).unwrap().status, EntryStatus::Fresh);
}

#[tokio::test(start_paused = true)]
async fn test_client_error_is_surfaced_verbatim() {
    let mut h = Harness::new(EngineConfig::default());
    h.transport.always(
        "POST /items",
        Err(TransportError::client(422, "name is required")),
    );

    let err = h
        .client
        .mutate(MutationRequest::post("create-item", "/items"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "client-error (422): name is required");
    assert_eq!(h.count_notifications(NotificationKind::Error), 1);
    assert_eq!(h.redirects(), 0);
}
