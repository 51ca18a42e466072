#![allow(dead_code)]
//! Shared fakes for the integration tests: an in-memory channel the tests
//! can script both sides of, a counting REST backend, and a scripted push
//! stream.
use async_trait::async_trait;
use chrono::Utc;
use sparklink_core::error::{Result, SparkError};
use sparklink_core::http::Api;
use sparklink_core::realtime::protocol::{ClientFrame, ServerFrame};
use sparklink_core::realtime::{Channel, ChannelPair};
use sparklink_core::sse::{SearchStream, SseEvent};
use sparklink_core::types::{Message, MessageKind, MessageStatus};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// One accepted fake connection, handed to the test for scripting
pub struct FakeLink {
    pub url: String,
    pub token: String,
    pub from_client: mpsc::Receiver<ClientFrame>,
    pub to_client: mpsc::Sender<ServerFrame>,
}

/// Channel whose connections surface as [`FakeLink`]s on a side channel
pub struct FakeChannel {
    links: mpsc::UnboundedSender<FakeLink>,
}

impl FakeChannel {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeLink>) {
        let (links, accepted) = mpsc::unbounded_channel();
        (Arc::new(Self { links }), accepted)
    }
}

#[async_trait]
impl Channel for FakeChannel {
    async fn open(&self, url: &str, token: &str) -> Result<ChannelPair> {
        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        self.links
            .send(FakeLink {
                url: url.to_string(),
                token: token.to_string(),
                from_client: out_rx,
                to_client: in_tx,
            })
            .map_err(|_| SparkError::Channel("test harness gone".to_string()))?;
        Ok(ChannelPair {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Counting REST backend
#[derive(Default)]
pub struct FakeApi {
    pub joins: AtomicUsize,
    pub leaves: AtomicUsize,
    pub heartbeats: AtomicUsize,
    pub delivered: Mutex<Vec<String>>,
    pub history: Mutex<Vec<Message>>,
    pub history_delay: Mutex<Duration>,
    pub join_delay: Mutex<Duration>,
    pub heartbeat_fails: AtomicBool,
    pub deliver_fails: AtomicBool,
}

impl FakeApi {
    pub fn heartbeat_count(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Api for FakeApi {
    async fn recent_messages(&self, _conversation_id: &str, _limit: usize) -> Result<Vec<Message>> {
        let delay = *self.history_delay.lock().unwrap();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        Ok(self.history.lock().unwrap().clone())
    }

    async fn join_queue(&self) -> Result<()> {
        let delay = *self.join_delay.lock().unwrap();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        self.joins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn leave_queue(&self) -> Result<()> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn heartbeat(&self) -> Result<()> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        if self.heartbeat_fails.load(Ordering::SeqCst) {
            return Err(SparkError::Api {
                status: 503,
                message: "heartbeat unavailable".to_string(),
            });
        }
        Ok(())
    }

    async fn acknowledge_delivery(&self, message_id: &str) -> Result<()> {
        if self.deliver_fails.load(Ordering::SeqCst) {
            return Err(SparkError::Api {
                status: 503,
                message: "delivery endpoint unavailable".to_string(),
            });
        }
        self.delivered.lock().unwrap().push(message_id.to_string());
        Ok(())
    }
}

/// Push stream that hands out a prepared receiver and records the
/// cancellation token of every open
#[derive(Default)]
pub struct ScriptedStream {
    prepared: Mutex<Option<mpsc::Receiver<SseEvent>>>,
    pub cancels: Mutex<Vec<CancellationToken>>,
    pub fail_open: AtomicBool,
}

impl ScriptedStream {
    pub fn new() -> (Arc<Self>, mpsc::Sender<SseEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let stream = Arc::new(Self {
            prepared: Mutex::new(Some(rx)),
            cancels: Mutex::new(Vec::new()),
            fail_open: AtomicBool::new(false),
        });
        (stream, tx)
    }
}

#[async_trait]
impl SearchStream for ScriptedStream {
    async fn open(&self, _token: &str, cancel: CancellationToken) -> Result<mpsc::Receiver<SseEvent>> {
        self.cancels.lock().unwrap().push(cancel);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(SparkError::Channel("stream refused".to_string()));
        }
        self.prepared
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SparkError::Channel("stream already open".to_string()))
    }
}

pub fn sample_message(id: &str, conversation_id: &str, author_id: &str) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        author_id: author_id.to_string(),
        content: format!("body-{}", id),
        kind: MessageKind::Text,
        status: MessageStatus::Sent,
        created_at: Utc::now(),
        edited_at: None,
        deleted_at: None,
    }
}

/// Poll until `predicate` holds, panicking after a second
pub async fn wait_until<F: FnMut() -> bool>(what: &str, mut predicate: F) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}
