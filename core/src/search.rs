/// Matchmaking search controller.
///
/// Drives the daily-match lifecycle: join the queue over REST, keep it warm
/// with heartbeats, and watch the server push stream for state changes and
/// the match itself. Starting is idempotent and cancelling leaves the queue
/// exactly once; a found match tears the search down without leaving, since
/// the server already removed us.
use crate::auth::CredentialStore;
use crate::config::Config;
use crate::error::{Result, SparkError};
use crate::http::Api;
use crate::match_cache::MatchCache;
use crate::sse::{SearchStream, SseEvent};
use crate::types::{HeartbeatPayload, MatchPayload, SearchStatePayload, SearchStatus};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Event names carried by the matchmaking stream
pub mod stream_events {
    pub const SEARCH_STATE: &str = "search_state";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const MATCH_FOUND: &str = "match_found";
}

/// Coarse lifecycle phase of the search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Idle,
    Starting,
    Searching,
    Matched,
}

/// Observable search state
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSnapshot {
    pub phase: SearchPhase,
    pub status: SearchStatus,
    pub queued_at: Option<DateTime<Utc>>,
    /// Liveness derived from the most recent heartbeat outcome
    pub online: bool,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

impl Default for SearchSnapshot {
    fn default() -> Self {
        Self {
            phase: SearchPhase::Idle,
            status: SearchStatus::Idle,
            queued_at: None,
            online: false,
            last_heartbeat_at: None,
        }
    }
}

pub struct SearchController {
    inner: Arc<SearchInner>,
}

struct SearchInner {
    api: Arc<dyn Api>,
    stream: Arc<dyn SearchStream>,
    credentials: CredentialStore,
    matches: MatchCache,
    heartbeat_interval: Duration,
    searching: AtomicBool,
    state_tx: watch::Sender<SearchSnapshot>,
    active: Mutex<Option<ActiveSearch>>,
}

struct ActiveSearch {
    cancel: CancellationToken,
}

impl SearchController {
    pub fn new(
        api: Arc<dyn Api>,
        stream: Arc<dyn SearchStream>,
        credentials: CredentialStore,
        matches: MatchCache,
        config: &Config,
    ) -> Self {
        let (state_tx, _) = watch::channel(SearchSnapshot::default());
        Self {
            inner: Arc::new(SearchInner {
                api,
                stream,
                credentials,
                matches,
                heartbeat_interval: config.heartbeat_interval,
                searching: AtomicBool::new(false),
                state_tx,
                active: Mutex::new(None),
            }),
        }
    }

    /// Begin searching. Idempotent: a second call while a search is live is
    /// a no-op, so the queue is joined at most once.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.searching.swap(true, Ordering::SeqCst) {
            debug!("search already in progress");
            return Ok(());
        }

        let token = match inner.credentials.token() {
            Some(token) => token,
            None => {
                inner.searching.store(false, Ordering::SeqCst);
                return Err(SparkError::Auth("sign in before searching".to_string()));
            }
        };
        inner.state_tx.send_modify(|s| s.phase = SearchPhase::Starting);

        if let Err(e) = inner.api.join_queue().await {
            inner.reset();
            return Err(e);
        }

        // First liveness signal right away; heartbeat failures never abort
        // a search, they only risk the server timing us out
        inner.record_heartbeat(inner.api.heartbeat().await);

        let cancel = CancellationToken::new();
        let events = match inner.stream.open(&token, cancel.child_token()).await {
            Ok(events) => events,
            Err(e) => {
                cancel.cancel();
                if let Err(leave_err) = inner.api.leave_queue().await {
                    warn!("failed to leave queue after stream error: {}", leave_err);
                }
                inner.reset();
                return Err(e);
            }
        };

        inner.state_tx.send_modify(|s| {
            s.phase = SearchPhase::Searching;
            s.status = SearchStatus::Queued;
            s.queued_at = Some(Utc::now());
        });

        // Install the active slot before the tasks run, so an instant
        // match_found can consume it
        *inner.active.lock().await = Some(ActiveSearch {
            cancel: cancel.clone(),
        });
        spawn_heartbeat(inner.clone(), cancel.clone());
        spawn_listener(inner.clone(), events, cancel);
        info!("matchmaking search started");
        Ok(())
    }

    /// Abandon an active search. Stops the heartbeat and stream, then leaves
    /// the queue once. No-op when nothing is active (including after a match),
    /// and the leave is skipped when the server already dequeued us.
    pub async fn cancel(&self) {
        let active = self.inner.active.lock().await.take();
        let Some(active) = active else {
            debug!("no active search to cancel");
            return;
        };
        active.cancel.cancel();
        let was_queued = self.inner.searching.swap(false, Ordering::SeqCst);
        self.inner.state_tx.send_replace(SearchSnapshot::default());
        if was_queued {
            if let Err(e) = self.inner.api.leave_queue().await {
                warn!("failed to leave matchmaking queue: {}", e);
            }
        }
        info!("matchmaking search cancelled");
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchSnapshot> {
        self.inner.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> SearchSnapshot {
        self.inner.state_tx.borrow().clone()
    }

    pub fn is_searching(&self) -> bool {
        self.inner.searching.load(Ordering::SeqCst)
    }
}

impl Drop for SearchController {
    fn drop(&mut self) {
        if let Ok(mut active) = self.inner.active.try_lock() {
            if let Some(active) = active.take() {
                active.cancel.cancel();
                // Best-effort leave so the server does not keep a ghost
                // queue entry until its own timeout
                if self.inner.searching.swap(false, Ordering::SeqCst) {
                    if let Ok(handle) = tokio::runtime::Handle::try_current() {
                        let api = self.inner.api.clone();
                        handle.spawn(async move {
                            if let Err(e) = api.leave_queue().await {
                                debug!("leave queue on teardown failed: {}", e);
                            }
                        });
                    }
                }
            }
        }
    }
}

impl SearchInner {
    fn reset(&self) {
        self.searching.store(false, Ordering::SeqCst);
        self.state_tx.send_replace(SearchSnapshot::default());
    }

    fn record_heartbeat(&self, outcome: Result<()>) {
        match outcome {
            Ok(()) => self.state_tx.send_modify(|s| s.online = true),
            Err(e) => {
                warn!("matchmaking heartbeat failed: {}", e);
                self.state_tx.send_modify(|s| s.online = false);
            }
        }
    }
}

fn spawn_heartbeat(inner: Arc<SearchInner>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = interval(inner.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The interval fires immediately; the first beat already went out
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    inner.record_heartbeat(inner.api.heartbeat().await);
                }
            }
        }
    });
}

fn spawn_listener(
    inner: Arc<SearchInner>,
    mut events: mpsc::Receiver<SseEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        if inner.searching.swap(false, Ordering::SeqCst) {
                            warn!("search stream ended unexpectedly");
                            inner.state_tx.send_replace(SearchSnapshot::default());
                        }
                        inner.active.lock().await.take();
                        cancel.cancel();
                        break;
                    }
                },
            };
            if handle_event(&inner, &cancel, event).await {
                break;
            }
        }
    });
}

/// Handle one stream event; returns true when the search is over.
/// Malformed payloads are logged and dropped, the stream keeps going.
async fn handle_event(inner: &Arc<SearchInner>, cancel: &CancellationToken, event: SseEvent) -> bool {
    match event.event.as_str() {
        stream_events::SEARCH_STATE => {
            match serde_json::from_str::<SearchStatePayload>(&event.data) {
                Ok(payload) => {
                    debug!("search state: {:?}", payload.status);
                    // An idle status means the server dequeued us; the flag
                    // and phase clear but the stream stays open for what
                    // comes next
                    let queued = payload.status != SearchStatus::Idle;
                    inner.searching.store(queued, Ordering::SeqCst);
                    inner.state_tx.send_modify(|s| {
                        s.status = payload.status.clone();
                        s.phase = if queued {
                            SearchPhase::Searching
                        } else {
                            SearchPhase::Idle
                        };
                        if payload.queued_at.is_some() {
                            s.queued_at = payload.queued_at;
                        } else if !queued {
                            s.queued_at = None;
                        }
                    });
                }
                Err(e) => warn!("dropping malformed search_state payload: {}", e),
            }
            false
        }
        stream_events::HEARTBEAT => {
            match serde_json::from_str::<HeartbeatPayload>(&event.data) {
                Ok(payload) => {
                    let at = payload.timestamp.unwrap_or_else(Utc::now);
                    inner.state_tx.send_modify(|s| s.last_heartbeat_at = Some(at));
                }
                Err(e) => warn!("dropping malformed heartbeat payload: {}", e),
            }
            false
        }
        stream_events::MATCH_FOUND => match serde_json::from_str::<MatchPayload>(&event.data) {
            Ok(payload) => {
                info!("match found: {}", payload.match_id);
                if let Err(e) = inner.matches.publish(&payload) {
                    warn!("failed to persist match: {}", e);
                }
                inner.searching.store(false, Ordering::SeqCst);
                inner.state_tx.send_modify(|s| {
                    s.phase = SearchPhase::Matched;
                    s.status = SearchStatus::Matched;
                });
                // The match already removed us from the queue server-side,
                // so there is no leave_queue here
                inner.active.lock().await.take();
                cancel.cancel();
                true
            }
            Err(e) => {
                warn!("dropping malformed match payload: {}", e);
                false
            }
        },
        other => {
            debug!("ignoring stream event {}", other);
            false
        }
    }
}
