/// Realtime transport session.
///
/// Owns the single authenticated connection to the chat namespace: opened
/// when a credential appears, torn down on sign-out, reconnected with a
/// fixed delay in between. Provides the request/acknowledge pattern for
/// message operations and fans inbound push events out to controllers.
use crate::auth::CredentialStore;
use crate::config::Config;
use crate::error::{Result, SparkError};
use crate::realtime::ack_queue::AckQueue;
use crate::realtime::channel::{Channel, ChannelPair};
use crate::realtime::protocol::{events, AckStatus, ClientFrame, ServerFrame};
use crate::types::{ChatEvent, Message, MessageKind};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_FANOUT_CAPACITY: usize = 256;

/// Connection state observed by consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct RealtimeSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    realtime_url: String,
    ack_timeout: Duration,
    reconnect_delay: Duration,
    channel: Arc<dyn Channel>,
    ack_queue: Arc<AckQueue>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ChatEvent>,
    /// Write side of the open connection; None while disconnected
    outbound: RwLock<Option<mpsc::Sender<ClientFrame>>>,
    /// Requests awaiting their correlated acknowledgement
    pending: Mutex<HashMap<u64, oneshot::Sender<ServerAck>>>,
    next_ack: AtomicU64,
    closed: CancellationToken,
}

struct ServerAck {
    status: AckStatus,
    payload: Option<Value>,
    message: Option<String>,
}

impl RealtimeSession {
    pub fn new(config: &Config, channel: Arc<dyn Channel>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_FANOUT_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                realtime_url: config.realtime_url.clone(),
                ack_timeout: config.ack_timeout,
                reconnect_delay: config.reconnect_delay,
                channel,
                ack_queue: Arc::new(AckQueue::new()),
                state_tx,
                events_tx,
                outbound: RwLock::new(None),
                pending: Mutex::new(HashMap::new()),
                next_ack: AtomicU64::new(1),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Drive the connection lifecycle off the credential store: connect
    /// while a token is present, tear down on sign-out, retry on failure.
    pub fn start(&self, credentials: &CredentialStore) -> JoinHandle<()> {
        let inner = self.inner.clone();
        let mut token_rx = credentials.subscribe();
        tokio::spawn(async move {
            loop {
                if inner.closed.is_cancelled() {
                    break;
                }
                let token = token_rx.borrow_and_update().clone();
                let Some(token) = token else {
                    // Signed out: wait for a credential to reappear
                    tokio::select! {
                        _ = inner.closed.cancelled() => break,
                        changed = token_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                    continue;
                };

                inner.state_tx.send_replace(ConnectionState::Connecting);
                match inner.channel.open(&inner.realtime_url, &token).await {
                    Ok(pair) => inner.run_connection(pair, &mut token_rx, &token).await,
                    Err(e) => {
                        warn!("realtime connect failed: {}", e);
                        inner.state_tx.send_replace(ConnectionState::Disconnected);
                    }
                }

                if inner.closed.is_cancelled() {
                    break;
                }
                // Back off before the next attempt unless the credential changes first
                tokio::select! {
                    _ = inner.closed.cancelled() => break,
                    _ = sleep(inner.reconnect_delay) => {}
                    changed = token_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            inner.state_tx.send_replace(ConnectionState::Disconnected);
        })
    }

    /// Stop the session permanently
    pub fn close(&self) {
        self.inner.closed.cancel();
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.state_tx.borrow() == ConnectionState::Connected
    }

    /// Subscribe to inbound push events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn ack_queue(&self) -> Arc<AckQueue> {
        self.inner.ack_queue.clone()
    }

    /// Send a message; resolves with the server-persisted copy
    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message> {
        let payload = self
            .inner
            .request(
                events::MESSAGE_SEND,
                json!({
                    "conversationId": conversation_id,
                    "content": content,
                    "type": kind,
                }),
            )
            .await?;
        serde_json::from_value(payload).map_err(SparkError::Serialization)
    }

    /// Edit a message's content; resolves with the updated copy
    pub async fn update_message(&self, message_id: &str, content: &str) -> Result<Message> {
        let payload = self
            .inner
            .request(
                events::MESSAGE_UPDATE,
                json!({ "messageId": message_id, "content": content }),
            )
            .await?;
        serde_json::from_value(payload).map_err(SparkError::Serialization)
    }

    /// Soft-delete a message; resolves with the tombstoned copy
    pub async fn delete_message(&self, message_id: &str) -> Result<Message> {
        let payload = self
            .inner
            .request(events::MESSAGE_DELETE, json!({ "messageId": message_id }))
            .await?;
        serde_json::from_value(payload).map_err(SparkError::Serialization)
    }

    /// Mark every message in the conversation as read by the local user
    pub async fn mark_conversation_read(&self, conversation_id: &str) -> Result<()> {
        self.inner
            .request(events::MESSAGE_READ, json!({ "conversationId": conversation_id }))
            .await?;
        Ok(())
    }

    /// Tell the server which conversation room we are viewing (fire-and-forget)
    pub async fn join_conversation(&self, conversation_id: &str) {
        if let Err(e) = self
            .inner
            .emit(events::CONVERSATION_JOIN, json!({ "conversationId": conversation_id }))
            .await
        {
            debug!("conversation join dropped: {}", e);
        }
    }

    pub async fn leave_conversation(&self, conversation_id: &str) {
        if let Err(e) = self
            .inner
            .emit(events::CONVERSATION_LEAVE, json!({ "conversationId": conversation_id }))
            .await
        {
            debug!("conversation leave dropped: {}", e);
        }
    }

    /// Typing state is perishable: silently dropped while disconnected
    pub async fn set_typing(&self, conversation_id: &str, active: bool) {
        let event = if active { events::TYPING_START } else { events::TYPING_STOP };
        if let Err(e) = self
            .inner
            .emit(event, json!({ "conversationId": conversation_id }))
            .await
        {
            debug!("typing indicator dropped: {}", e);
        }
    }

    /// Confirm delivery of an inbound message. The id is queued before the
    /// emit, so a failure here leaves it pending for replay on reconnect.
    pub async fn acknowledge_delivery(&self, message_id: &str) -> Result<()> {
        self.inner.ack_queue.enqueue(message_id).await;
        self.inner
            .emit(events::MESSAGE_DELIVERY_ACK, json!({ "messageId": message_id }))
            .await?;
        self.inner.ack_queue.dequeue(message_id).await;
        Ok(())
    }
}

impl Clone for RealtimeSession {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl SessionInner {
    /// Pump one open connection until it drops, the credential changes,
    /// or the session is closed.
    async fn run_connection(
        self: &Arc<Self>,
        pair: ChannelPair,
        token_rx: &mut watch::Receiver<Option<String>>,
        token: &str,
    ) {
        let ChannelPair {
            outbound,
            mut inbound,
        } = pair;
        *self.outbound.write().await = Some(outbound);
        self.state_tx.send_replace(ConnectionState::Connected);
        info!("realtime session connected");

        // Replay delivery acks captured while disconnected
        let session = self.clone();
        self.ack_queue
            .drain_and_replay(|id| {
                let session = session.clone();
                async move {
                    session
                        .emit(events::MESSAGE_DELIVERY_ACK, json!({ "messageId": id }))
                        .await
                }
            })
            .await;

        loop {
            tokio::select! {
                _ = self.closed.cancelled() => break,
                changed = token_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = token_rx.borrow_and_update().clone();
                    if current.as_deref() != Some(token) {
                        info!("credential changed, closing realtime connection");
                        break;
                    }
                }
                frame = inbound.recv() => {
                    match frame {
                        Some(frame) => self.dispatch(frame).await,
                        None => {
                            debug!("realtime channel closed");
                            break;
                        }
                    }
                }
            }
        }

        *self.outbound.write().await = None;
        self.pending.lock().await.clear();
        self.state_tx.send_replace(ConnectionState::Disconnected);
        info!("realtime session disconnected");
    }

    async fn dispatch(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Ack {
                ack,
                status,
                payload,
                message,
            } => {
                if let Some(reply) = self.pending.lock().await.remove(&ack) {
                    let _ = reply.send(ServerAck {
                        status,
                        payload,
                        message,
                    });
                } else {
                    debug!("unmatched acknowledgement {}", ack);
                }
            }
            ServerFrame::MessageNew { payload } => {
                let _ = self.events_tx.send(ChatEvent::MessageNew(payload));
            }
            ServerFrame::MessageUpdated { payload } => {
                let _ = self.events_tx.send(ChatEvent::MessageUpdated(payload));
            }
            ServerFrame::MessageDeleted { payload } => {
                let _ = self.events_tx.send(ChatEvent::MessageDeleted(payload));
            }
            ServerFrame::ConversationRead { payload } => {
                let _ = self.events_tx.send(ChatEvent::ConversationRead(payload));
            }
            ServerFrame::Typing { payload } => {
                let _ = self.events_tx.send(ChatEvent::Typing(payload));
            }
        }
    }

    /// Fire-and-forget emit; fails fast while disconnected
    async fn emit(&self, event: &'static str, payload: Value) -> Result<()> {
        let outbound = { self.outbound.read().await.clone() }.ok_or(SparkError::NotConnected)?;
        outbound
            .send(ClientFrame {
                event: event.to_string(),
                ack: None,
                payload,
            })
            .await
            .map_err(|_| SparkError::NotConnected)
    }

    /// Emit with a bounded wait for the correlated acknowledgement.
    /// No automatic retry: timeout and server error both reject, and the
    /// caller decides what to do next.
    async fn request(&self, event: &'static str, payload: Value) -> Result<Value> {
        let outbound = { self.outbound.read().await.clone() }.ok_or(SparkError::NotConnected)?;

        let ack = self.next_ack.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(ack, reply_tx);

        let frame = ClientFrame {
            event: event.to_string(),
            ack: Some(ack),
            payload,
        };
        if outbound.send(frame).await.is_err() {
            self.pending.lock().await.remove(&ack);
            return Err(SparkError::NotConnected);
        }

        match timeout(self.ack_timeout, reply_rx).await {
            Ok(Ok(reply)) => match reply.status {
                AckStatus::Ok => Ok(reply.payload.unwrap_or(Value::Null)),
                AckStatus::Error => Err(SparkError::Rejected {
                    event,
                    message: reply
                        .message
                        .unwrap_or_else(|| "unspecified server error".to_string()),
                }),
            },
            // Connection dropped before the ack arrived
            Ok(Err(_)) => Err(SparkError::NotConnected),
            Err(_) => {
                self.pending.lock().await.remove(&ack);
                Err(SparkError::AckTimeout {
                    event,
                    timeout_ms: self.ack_timeout.as_millis() as u64,
                })
            }
        }
    }
}
