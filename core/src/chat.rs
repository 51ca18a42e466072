/// Chat conversation controller.
///
/// Presents one conversation as an ordered, deduplicated message cache,
/// reconciling the initial history fetch, live push events and local sends.
/// Sends go through the ack path only; the server rebroadcast fills the
/// cache, so there is no optimistic local echo.
use crate::config::Config;
use crate::error::{Result, SparkError};
use crate::http::Api;
use crate::realtime::session::RealtimeSession;
use crate::types::{ChatEvent, Message, MessageKind, MessageStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Observable state of the open conversation
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub partner_typing: bool,
}

pub struct ConversationController {
    conversation_id: String,
    session: RealtimeSession,
    state_tx: Arc<watch::Sender<ConversationState>>,
    listener: JoinHandle<()>,
}

impl ConversationController {
    /// Open a conversation: announce the room, start consuming push events,
    /// then seed the cache with the most recent page.
    pub async fn open(
        session: RealtimeSession,
        api: Arc<dyn Api>,
        config: &Config,
        conversation_id: &str,
        local_user_id: &str,
    ) -> Result<Self> {
        if conversation_id.is_empty() {
            return Err(SparkError::InvalidArgument(
                "conversation id must not be empty".to_string(),
            ));
        }

        let (state_tx, _) = watch::channel(ConversationState::default());
        let state_tx = Arc::new(state_tx);

        // Listen before fetching, so messages pushed while the history
        // request is in flight land in the cache; the merge collapses any
        // overlap with the seed page
        session.join_conversation(conversation_id).await;
        let listener = spawn_listener(
            session.clone(),
            api.clone(),
            state_tx.clone(),
            conversation_id.to_string(),
            local_user_id.to_string(),
            config.delivery_ack_delay,
        );

        let seed = match api
            .recent_messages(conversation_id, config.history_page_size)
            .await
        {
            Ok(seed) => seed,
            Err(e) => {
                listener.abort();
                session.leave_conversation(conversation_id).await;
                return Err(e);
            }
        };
        state_tx.send_modify(|state| {
            for message in seed {
                merge_message(&mut state.messages, message);
            }
        });

        Ok(Self {
            conversation_id: conversation_id.to_string(),
            session,
            state_tx,
            listener,
        })
    }

    /// Observe cache and typing updates
    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> ConversationState {
        self.state_tx.borrow().clone()
    }

    /// Send a message through the ack path. The resolved message is the
    /// authoritative copy; the server rebroadcast merges it into the cache.
    pub async fn send_message(&self, content: &str, kind: MessageKind) -> Result<Message> {
        self.session
            .send_message(&self.conversation_id, content, kind)
            .await
    }

    pub async fn update_message(&self, message_id: &str, content: &str) -> Result<Message> {
        self.session.update_message(message_id, content).await
    }

    pub async fn delete_message(&self, message_id: &str) -> Result<Message> {
        self.session.delete_message(message_id).await
    }

    /// Mark the conversation read by the local user
    pub async fn mark_read(&self) -> Result<()> {
        self.session.mark_conversation_read(&self.conversation_id).await
    }

    pub async fn set_typing(&self, active: bool) {
        self.session.set_typing(&self.conversation_id, active).await;
    }

    /// Tear down: stop consuming push events and leave the room
    pub async fn close(self) {
        self.listener.abort();
        self.session.leave_conversation(&self.conversation_id).await;
    }
}

impl Drop for ConversationController {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

fn spawn_listener(
    session: RealtimeSession,
    api: Arc<dyn Api>,
    state_tx: Arc<watch::Sender<ConversationState>>,
    conversation_id: String,
    local_user_id: String,
    ack_delay: Duration,
) -> JoinHandle<()> {
    let mut events = session.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("conversation listener lagged {} events", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match event {
                ChatEvent::MessageNew(message)
                | ChatEvent::MessageUpdated(message)
                | ChatEvent::MessageDeleted(message)
                    if message.conversation_id == conversation_id =>
                {
                    let inbound = message.author_id != local_user_id;
                    let message_id = message.id.clone();
                    let mut inserted = false;
                    state_tx.send_modify(|state| {
                        inserted = merge_message(&mut state.messages, message);
                    });
                    if inserted && inbound {
                        schedule_delivery_ack(session.clone(), api.clone(), message_id, ack_delay);
                    }
                }
                ChatEvent::ConversationRead(receipt)
                    if receipt.conversation_id == conversation_id
                        && receipt.user_id != local_user_id =>
                {
                    state_tx.send_modify(|state| {
                        apply_read_receipt(&mut state.messages, &local_user_id);
                    });
                }
                ChatEvent::Typing(notice)
                    if notice.conversation_id == conversation_id
                        && notice.user_id != local_user_id =>
                {
                    state_tx.send_modify(|state| state.partner_typing = notice.is_typing);
                }
                _ => {}
            }
        }
    })
}

/// Confirm delivery after a short delay so rendering settles first.
/// Failures are swallowed here: the queue guarantees eventual retry.
fn schedule_delivery_ack(
    session: RealtimeSession,
    api: Arc<dyn Api>,
    message_id: String,
    delay: Duration,
) {
    tokio::spawn(async move {
        sleep(delay).await;
        if session.acknowledge_delivery(&message_id).await.is_ok() {
            return;
        }
        // Transport is down: try the HTTP fallback; otherwise the queued id
        // replays on the next reconnect
        match api.acknowledge_delivery(&message_id).await {
            Ok(()) => session.ack_queue().dequeue(&message_id).await,
            Err(e) => debug!("delivery ack for {} deferred: {}", message_id, e),
        }
    });
}

/// Merge one pushed message into the cache: replace in place when present
/// (keeps position, skips the re-sort), append and re-sort when absent.
/// Returns true when the message was newly inserted.
pub(crate) fn merge_message(messages: &mut Vec<Message>, incoming: Message) -> bool {
    if let Some(existing) = messages.iter_mut().find(|m| m.id == incoming.id) {
        *existing = incoming;
        false
    } else {
        messages.push(incoming);
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        true
    }
}

/// The remote participant read the conversation: flip every own-authored
/// message that is not already read. One-directional; never reverts.
pub(crate) fn apply_read_receipt(messages: &mut [Message], local_user_id: &str) {
    for message in messages.iter_mut() {
        if message.author_id == local_user_id
            && matches!(message.status, MessageStatus::Sent | MessageStatus::Delivered)
        {
            message.status = MessageStatus::Read;
        }
    }
}
