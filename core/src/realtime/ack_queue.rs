/// Delivery-acknowledgement queue.
///
/// Every inbound message owes the server a delivery confirmation. Ids wait
/// here until the confirmation goes out; the session replays the queue after
/// each reconnect, so confirmations survive transient disconnects within a
/// running process.
use crate::error::Result;
use std::future::Future;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
pub struct AckQueue {
    pending: Mutex<Vec<String>>,
}

impl AckQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message id if absent (idempotent)
    pub async fn enqueue(&self, message_id: &str) {
        let mut pending = self.pending.lock().await;
        if !pending.iter().any(|id| id == message_id) {
            pending.push(message_id.to_string());
        }
    }

    /// Remove a message id after a successful confirmation
    pub async fn dequeue(&self, message_id: &str) {
        let mut pending = self.pending.lock().await;
        pending.retain(|id| id != message_id);
    }

    /// Snapshot of the pending ids
    pub async fn pending(&self) -> Vec<String> {
        self.pending.lock().await.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    /// Take a snapshot of all pending ids, clear the queue, and invoke
    /// `send_fn` for each. Ids whose send fails are re-enqueued: not lost,
    /// not duplicated beyond one retry cycle per replay pass.
    pub async fn drain_and_replay<F, Fut>(&self, mut send_fn: F)
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let snapshot: Vec<String> = {
            let mut pending = self.pending.lock().await;
            std::mem::take(&mut *pending)
        };

        for id in snapshot {
            if let Err(e) = send_fn(id.clone()).await {
                debug!("delivery ack replay failed for {}: {}", id, e);
                self.enqueue(&id).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SparkError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex as TokioMutex;

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let queue = AckQueue::new();
        queue.enqueue("m1").await;
        queue.enqueue("m1").await;
        queue.enqueue("m2").await;
        assert_eq!(queue.pending().await, vec!["m1".to_string(), "m2".to_string()]);
    }

    #[tokio::test]
    async fn test_dequeue_removes_id() {
        let queue = AckQueue::new();
        queue.enqueue("m1").await;
        queue.dequeue("m1").await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_replay_emits_each_id_once() {
        let queue = AckQueue::new();
        queue.enqueue("m1").await;
        queue.enqueue("m2").await;
        queue.enqueue("m3").await;

        let sent = Arc::new(TokioMutex::new(Vec::new()));
        let sent_clone = sent.clone();
        queue
            .drain_and_replay(|id| {
                let sent = sent_clone.clone();
                async move {
                    sent.lock().await.push(id);
                    Ok(())
                }
            })
            .await;

        assert_eq!(
            *sent.lock().await,
            vec!["m1".to_string(), "m2".to_string(), "m3".to_string()]
        );
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_replay_requeues_only_failed_id() {
        let queue = AckQueue::new();
        queue.enqueue("m1").await;
        queue.enqueue("m2").await;
        queue.enqueue("m3").await;

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        queue
            .drain_and_replay(|id| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if id == "m2" {
                        Err(SparkError::NotConnected)
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.pending().await, vec!["m2".to_string()]);
    }
}
