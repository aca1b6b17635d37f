//! Background runs reporting into shared state, fenced by request id.

mod common;

use common::*;
use mortar::control_flow::RUN_ASYNC;
use mortar::prelude::*;
use mortar::{AsyncCompletion, AsyncStateSync, AsyncTaskState, MemoryStateStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn slow_echo(ms: u64, value: &str) -> Pipeline {
    Pipeline::default().then(node(SLEEP_ECHO).config("ms", ms).config("value", value))
}

async fn read_state(store: &Arc<MemoryStateStore>, key: &str) -> AsyncTaskState {
    AsyncStateSync::new(store.clone(), "test-component")
        .read(key)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_older_request_cannot_overwrite_newer() {
    let harness = Harness::empty();
    let store = Arc::new(MemoryStateStore::new());
    let reducer = harness.reducer().with_state_store(store.clone());

    let pipeline = Pipeline::default()
        .then(
            node(RUN_ASYNC)
                .config("body", pipeline(slow_echo(80, "A")))
                .config("stateKey", "search")
                .output_key("first"),
        )
        .then(
            node(RUN_ASYNC)
                .config("body", pipeline(slow_echo(10, "B")))
                .config("stateKey", "search")
                .output_key("second"),
        )
        .then(node(IDENTITY).config("value", json!([var("@first.requestId"), var("@second.requestId")])));

    let ids = reducer
        .run(&pipeline, ExecutionContext::new(), &options())
        .await
        .unwrap();
    let second_id = ids[1].as_str().unwrap().to_string();
    assert_ne!(ids[0], ids[1]);

    let pending = read_state(&store, "search").await;
    assert!(pending.is_fetching);
    assert_eq!(pending.request_id.unwrap().to_string(), second_id);

    tokio::time::sleep(Duration::from_millis(150)).await;

    // Both bodies ran to completion, B first.
    assert_eq!(harness.finished(), vec![json!("B"), json!("A")]);

    let state = read_state(&store, "search").await;
    assert_eq!(state.request_id.unwrap().to_string(), second_id);
    assert_eq!(state.data, Some(json!("B")));
    assert!(state.is_success && !state.is_fetching && !state.is_loading);
}

#[tokio::test]
async fn test_dispatch_returns_immediately() {
    let harness = Harness::empty();
    let store = Arc::new(MemoryStateStore::new());
    let reducer = harness.reducer().with_state_store(store.clone());

    let dispatch = reducer
        .dispatch_async(slow_echo(30, "done"), "job", ExecutionContext::new(), &options())
        .await
        .unwrap();

    let pending = read_state(&store, "job").await;
    assert!(pending.is_loading && pending.is_fetching);
    assert!(pending.data.is_none());
    assert!(harness.finished().is_empty());

    assert_eq!(dispatch.completed().await.unwrap(), AsyncCompletion::Applied);
    let state = read_state(&store, "job").await;
    assert_eq!(state.current_data, Some(json!("done")));
    assert_eq!(state.data, Some(json!("done")));
}

#[tokio::test]
async fn test_refetch_keeps_previous_data_until_done() {
    let harness = Harness::empty();
    let store = Arc::new(MemoryStateStore::new());
    let reducer = harness.reducer().with_state_store(store.clone());

    let first = reducer
        .dispatch_async(slow_echo(0, "one"), "feed", ExecutionContext::new(), &options())
        .await
        .unwrap();
    first.completed().await.unwrap();

    let second = reducer
        .dispatch_async(slow_echo(20, "two"), "feed", ExecutionContext::new(), &options())
        .await
        .unwrap();
    let refetching = read_state(&store, "feed").await;
    assert!(refetching.is_fetching && !refetching.is_loading);
    assert!(refetching.is_success);
    assert_eq!(refetching.data, Some(json!("one")));
    assert_eq!(refetching.current_data, None);

    second.completed().await.unwrap();
    assert_eq!(read_state(&store, "feed").await.data, Some(json!("two")));
}

#[tokio::test]
async fn test_background_failure_lands_in_state() {
    let harness = Harness::empty();
    let store = Arc::new(MemoryStateStore::new());
    let reducer = harness.reducer().with_state_store(store.clone());

    let body = Pipeline::default().then(node(FAIL).config("message", "API key revoked"));
    let dispatch = reducer
        .dispatch_async(body, "sync", ExecutionContext::new(), &options())
        .await
        .unwrap();
    assert_eq!(dispatch.completed().await.unwrap(), AsyncCompletion::Applied);

    let state = read_state(&store, "sync").await;
    assert!(state.is_error && !state.is_success);
    let error = state.error.unwrap();
    assert_eq!(error["name"], json!("BusinessError"));
    assert_eq!(error["message"], json!("API key revoked"));
}

#[tokio::test]
async fn test_state_is_namespaced_by_component() {
    let harness = Harness::empty();
    let store = Arc::new(MemoryStateStore::new());
    let reducer = harness.reducer().with_state_store(store.clone());

    let other = RunOptions::new(RunMetadata::new("other-component"));
    reducer
        .dispatch_async(slow_echo(0, "x"), "shared", ExecutionContext::new(), &other)
        .await
        .unwrap()
        .completed()
        .await
        .unwrap();

    assert!(store.snapshot("test-component").await.is_empty());
    assert!(store.snapshot("other-component").await.contains_key("shared"));
}
