/// Credential store: holds the bearer token for the signed-in identity,
/// persists it on every mutation and notifies subscribers on change.
/// The realtime session subscribes to drive its connect/disconnect lifecycle.
use crate::error::{Result, SparkError};
use crate::kv::KvStore;
use std::sync::Arc;
use tokio::sync::watch;

const TOKEN_KEY: &str = "auth/token";

#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn KvStore>,
    token_tx: watch::Sender<Option<String>>,
}

impl CredentialStore {
    /// Create the store, restoring a previously persisted token if present
    pub fn new(store: Arc<dyn KvStore>) -> Result<Self> {
        let initial = match store.get(TOKEN_KEY)? {
            Some(bytes) => Some(
                String::from_utf8(bytes)
                    .map_err(|_| SparkError::Storage("persisted token is not UTF-8".to_string()))?,
            ),
            None => None,
        };
        let (token_tx, _) = watch::channel(initial);
        Ok(Self {
            inner: Arc::new(Inner { store, token_tx }),
        })
    }

    /// Current bearer token, if signed in
    pub fn token(&self) -> Option<String> {
        self.inner.token_tx.borrow().clone()
    }

    /// Observe sign-in / sign-out transitions
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.inner.token_tx.subscribe()
    }

    /// Store a new credential and notify subscribers
    pub fn sign_in(&self, token: &str) -> Result<()> {
        self.inner.store.put(TOKEN_KEY, token.as_bytes())?;
        self.inner.token_tx.send_replace(Some(token.to_string()));
        Ok(())
    }

    /// Drop the credential and notify subscribers
    pub fn sign_out(&self) -> Result<()> {
        self.inner.store.remove(TOKEN_KEY)?;
        self.inner.token_tx.send_replace(None);
        Ok(())
    }
}
