/// Match cache: persists the latest daily-match payload and fans it out
/// to interested consumers (conversation list, match screen).
use crate::error::Result;
use crate::kv::KvStore;
use crate::types::MatchPayload;
use std::sync::Arc;
use tokio::sync::broadcast;

const LATEST_KEY: &str = "match/latest";
const FANOUT_CAPACITY: usize = 16;

#[derive(Clone)]
pub struct MatchCache {
    store: Arc<dyn KvStore>,
    tx: broadcast::Sender<MatchPayload>,
}

impl MatchCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        let (tx, _) = broadcast::channel(FANOUT_CAPACITY);
        Self { store, tx }
    }

    /// Persist and broadcast a match announced by the search stream
    pub fn publish(&self, payload: &MatchPayload) -> Result<()> {
        let bytes = serde_json::to_vec(payload)?;
        self.store.put(LATEST_KEY, &bytes)?;
        let _ = self.tx.send(payload.clone());
        Ok(())
    }

    /// Most recently persisted match, if any
    pub fn latest(&self) -> Result<Option<MatchPayload>> {
        match self.store.get(LATEST_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MatchPayload> {
        self.tx.subscribe()
    }
}
