/// REST backend seam: queue join/leave, heartbeats, conversation history
/// and the delivery-acknowledgement fallback.
use crate::auth::CredentialStore;
use crate::config::Config;
use crate::error::{Result, SparkError};
use crate::types::Message;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use url::Url;

#[async_trait]
pub trait Api: Send + Sync {
    /// Most recent page of a conversation's messages
    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>>;

    /// Enter the daily-match queue
    async fn join_queue(&self) -> Result<()>;

    /// Abandon the daily-match queue
    async fn leave_queue(&self) -> Result<()>;

    /// Liveness signal while queued
    async fn heartbeat(&self) -> Result<()>;

    /// HTTP fallback for delivery confirmation while the socket is down
    async fn acknowledge_delivery(&self, message_id: &str) -> Result<()>;
}

/// reqwest-backed implementation of the REST seam
pub struct RestApi {
    client: Client,
    base_url: Url,
    credentials: CredentialStore,
}

impl RestApi {
    pub fn new(config: &Config, credentials: CredentialStore) -> Result<Self> {
        let base_url = Url::parse(&config.api_base_url)?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    /// Execute a request, unwrap the response envelope and map failures to
    /// an API error carrying the status code and server message.
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = self.base_url.join(path)?;
        let mut request = self.client.request(method, url);
        if let Some(token) = self.credentials.token() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        let mut value: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        if !status.is_success() {
            let message = error_message(&value).unwrap_or_else(|| {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            });
            return Err(SparkError::Api {
                status: status.as_u16(),
                message,
            });
        }

        // Responses arrive as {data: ...}; unwrap when present
        if let Some(data) = value.get_mut("data") {
            Ok(data.take())
        } else {
            Ok(value)
        }
    }
}

#[async_trait]
impl Api for RestApi {
    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let path = format!("conversations/{}/messages?limit={}", conversation_id, limit);
        let value = self.request(Method::GET, &path, None).await?;
        match value {
            Value::Null => Ok(Vec::new()),
            value => serde_json::from_value(value).map_err(SparkError::Serialization),
        }
    }

    async fn join_queue(&self) -> Result<()> {
        self.request(Method::POST, "matchmaking/queue", None).await?;
        Ok(())
    }

    async fn leave_queue(&self) -> Result<()> {
        self.request(Method::DELETE, "matchmaking/queue", None).await?;
        Ok(())
    }

    async fn heartbeat(&self) -> Result<()> {
        self.request(Method::POST, "matchmaking/heartbeat", None).await?;
        Ok(())
    }

    async fn acknowledge_delivery(&self, message_id: &str) -> Result<()> {
        let path = format!("messages/{}/delivered", message_id);
        self.request(Method::POST, &path, None).await?;
        Ok(())
    }
}

/// The backend reports errors as `{message: "..."}"` or `{message: [...]}`
fn error_message(body: &Value) -> Option<String> {
    match body.get("message") {
        Some(Value::String(message)) => Some(message.clone()),
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(|item| item.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        ),
        _ => None,
    }
}
