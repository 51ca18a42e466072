/// Matchmaking search lifecycle against a counting backend and a scripted
/// push stream.
mod common;

use common::{wait_until, FakeApi, ScriptedStream};
use sparklink_core::auth::CredentialStore;
use sparklink_core::kv::MemoryStore;
use sparklink_core::sse::SseEvent;
use sparklink_core::types::SearchStatus;
use sparklink_core::{Config, MatchCache, SearchController, SearchPhase, SparkError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn test_config() -> Config {
    Config {
        heartbeat_interval: Duration::from_millis(20),
        ..Config::default()
    }
}

struct Harness {
    controller: Arc<SearchController>,
    api: Arc<FakeApi>,
    stream: Arc<ScriptedStream>,
    events: mpsc::Sender<SseEvent>,
    credentials: CredentialStore,
    matches: MatchCache,
}

fn harness(config: Config, signed_in: bool) -> Harness {
    let api = Arc::new(FakeApi::default());
    let (stream, events) = ScriptedStream::new();
    let credentials = CredentialStore::new(Arc::new(MemoryStore::default())).unwrap();
    if signed_in {
        credentials.sign_in("tok-1").unwrap();
    }
    let matches = MatchCache::new(Arc::new(MemoryStore::default()));
    let controller = Arc::new(SearchController::new(
        api.clone(),
        stream.clone(),
        credentials.clone(),
        matches.clone(),
        &config,
    ));
    Harness {
        controller,
        api,
        stream,
        events,
        credentials,
        matches,
    }
}

fn event(name: &str, data: &str) -> SseEvent {
    SseEvent {
        event: name.to_string(),
        data: data.to_string(),
    }
}

#[tokio::test]
async fn test_concurrent_start_joins_queue_once() {
    let harness = harness(test_config(), true);
    *harness.api.join_delay.lock().unwrap() = Duration::from_millis(50);

    let first = harness.controller.clone();
    let second = harness.controller.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.start().await }),
        tokio::spawn(async move { second.start().await }),
    );
    assert!(a.unwrap().is_ok());
    assert!(b.unwrap().is_ok());

    assert_eq!(harness.api.joins.load(Ordering::SeqCst), 1);
    assert!(harness.controller.is_searching());
}

#[tokio::test]
async fn test_match_found_ends_search_without_leaving() {
    let harness = harness(test_config(), true);
    harness.controller.start().await.unwrap();

    harness
        .events
        .send(event(
            "match_found",
            r#"{"matchId":"mt1","conversationId":"c9","partnerId":"u2"}"#,
        ))
        .await
        .unwrap();

    let controller = harness.controller.clone();
    wait_until("match phase", move || {
        controller.snapshot().phase == SearchPhase::Matched
    })
    .await;
    assert!(!harness.controller.is_searching());
    assert_eq!(harness.api.leaves.load(Ordering::SeqCst), 0);

    let found = harness.matches.latest().unwrap().expect("match persisted");
    assert_eq!(found.match_id, "mt1");
    assert_eq!(found.conversation_id.as_deref(), Some("c9"));

    // Cancelling after a match must not leave a queue we are no longer in
    harness.controller.cancel().await;
    assert_eq!(harness.api.leaves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_leaves_queue_exactly_once() {
    let harness = harness(test_config(), true);
    harness.controller.start().await.unwrap();
    assert!(harness.controller.is_searching());

    harness.controller.cancel().await;
    assert!(!harness.controller.is_searching());
    assert_eq!(harness.controller.snapshot().phase, SearchPhase::Idle);
    assert_eq!(harness.api.leaves.load(Ordering::SeqCst), 1);
    assert!(harness.stream.cancels.lock().unwrap()[0].is_cancelled());

    harness.controller.cancel().await;
    assert_eq!(harness.api.leaves.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dropping_active_search_attempts_leave() {
    let harness = harness(test_config(), true);
    harness.controller.start().await.unwrap();
    assert_eq!(harness.api.joins.load(Ordering::SeqCst), 1);

    drop(harness.controller);
    let api = harness.api.clone();
    wait_until("best-effort leave on teardown", move || {
        api.leaves.load(Ordering::SeqCst) == 1
    })
    .await;
    assert!(harness.stream.cancels.lock().unwrap()[0].is_cancelled());
}

#[tokio::test]
async fn test_idle_state_clears_search_without_leaving() {
    let harness = harness(test_config(), true);
    harness.controller.start().await.unwrap();

    harness
        .events
        .send(event("search_state", r#"{"status":"idle"}"#))
        .await
        .unwrap();

    let controller = harness.controller.clone();
    wait_until("search idle", move || !controller.is_searching()).await;
    let snapshot = harness.controller.snapshot();
    assert_eq!(snapshot.phase, SearchPhase::Idle);
    assert_eq!(snapshot.status, SearchStatus::Idle);

    // The server already emptied the queue; cancel only tears down locally
    harness.controller.cancel().await;
    assert_eq!(harness.api.leaves.load(Ordering::SeqCst), 0);
    assert!(harness.stream.cancels.lock().unwrap()[0].is_cancelled());
}

#[tokio::test]
async fn test_heartbeat_failure_keeps_search_alive() {
    let harness = harness(test_config(), true);
    harness.api.heartbeat_fails.store(true, Ordering::SeqCst);
    harness.controller.start().await.unwrap();

    let api = harness.api.clone();
    wait_until("repeated heartbeats", move || api.heartbeat_count() >= 3).await;
    assert!(harness.controller.is_searching());
    let snapshot = harness.controller.snapshot();
    assert_eq!(snapshot.phase, SearchPhase::Searching);
    assert!(!snapshot.online);
}

#[tokio::test]
async fn test_malformed_stream_event_is_dropped() {
    let harness = harness(test_config(), true);
    harness.controller.start().await.unwrap();

    harness
        .events
        .send(event("search_state", "not json at all"))
        .await
        .unwrap();
    harness
        .events
        .send(event("search_state", r#"{"status":"paused"}"#))
        .await
        .unwrap();

    let controller = harness.controller.clone();
    wait_until("status update", move || {
        controller.snapshot().status == SearchStatus::Paused
    })
    .await;
    assert!(harness.controller.is_searching());
}

#[tokio::test]
async fn test_start_without_credential_rolls_back() {
    let harness = harness(test_config(), false);

    let result = harness.controller.start().await;
    assert!(matches!(result, Err(SparkError::Auth(_))));
    assert!(!harness.controller.is_searching());
    assert_eq!(harness.api.joins.load(Ordering::SeqCst), 0);

    // The failed attempt must not wedge the controller
    harness.credentials.sign_in("tok-1").unwrap();
    harness.controller.start().await.unwrap();
    assert_eq!(harness.api.joins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stream_open_failure_leaves_queue_and_resets() {
    let harness = harness(test_config(), true);
    harness.stream.fail_open.store(true, Ordering::SeqCst);

    let result = harness.controller.start().await;
    assert!(result.is_err());
    assert!(!harness.controller.is_searching());
    assert_eq!(harness.api.joins.load(Ordering::SeqCst), 1);
    assert_eq!(harness.api.leaves.load(Ordering::SeqCst), 1);

    harness.stream.fail_open.store(false, Ordering::SeqCst);
    harness.controller.start().await.unwrap();
    assert!(harness.controller.is_searching());
    assert_eq!(harness.api.joins.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_stream_end_resets_search() {
    let harness = harness(test_config(), true);
    harness.controller.start().await.unwrap();

    drop(harness.events);
    let controller = harness.controller.clone();
    wait_until("search reset", move || !controller.is_searching()).await;
    assert_eq!(harness.controller.snapshot().phase, SearchPhase::Idle);
}
