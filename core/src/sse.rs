/// Server-push event stream (one-way, server → client).
///
/// The matchmaking stream arrives as `text/event-stream`: `event:` names the
/// kind, `data:` lines carry the JSON payload, a blank line dispatches.
/// Closing is driven by a cancellation token and is idempotent.
use crate::config::Config;
use crate::error::{Result, SparkError};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

const EVENT_CAPACITY: usize = 64;
/// A single line longer than this drops the connection
const MAX_BUFFERED_LINE: usize = 64 * 1024;

/// One decoded stream event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Seam over the push-stream primitive, so controllers can be driven by a
/// scripted stream in tests.
#[async_trait]
pub trait SearchStream: Send + Sync {
    async fn open(&self, token: &str, cancel: CancellationToken) -> Result<mpsc::Receiver<SseEvent>>;
}

/// Production stream over the REST backend's SSE endpoint
pub struct SseSearchStream {
    client: Client,
    url: Url,
}

impl SseSearchStream {
    pub fn new(config: &Config) -> Result<Self> {
        let url = Url::parse(&config.api_base_url)?.join("matchmaking/stream")?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl SearchStream for SseSearchStream {
    async fn open(&self, token: &str, cancel: CancellationToken) -> Result<mpsc::Receiver<SseEvent>> {
        let response = self
            .client
            .get(self.url.clone())
            .bearer_auth(token)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SparkError::Api {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("stream refused").to_string(),
            });
        }

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buffer = String::new();
            let mut parser = SseParser::default();
            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("search stream cancelled");
                        break;
                    }
                    chunk = body.next() => chunk,
                };
                match chunk {
                    Some(Ok(bytes)) => {
                        let mut ready = Vec::new();
                        if !feed_chunk(&mut buffer, &mut parser, &bytes, &mut ready) {
                            warn!("search stream line exceeded {} bytes, closing", MAX_BUFFERED_LINE);
                            break;
                        }
                        for event in ready {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!("search stream read failed: {}", e);
                        break;
                    }
                    None => {
                        debug!("search stream ended by server");
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Append one body chunk, dispatching every complete line into `ready`.
/// Returns false when an unterminated line outgrows the buffer cap.
fn feed_chunk(
    buffer: &mut String,
    parser: &mut SseParser,
    bytes: &[u8],
    ready: &mut Vec<SseEvent>,
) -> bool {
    buffer.push_str(&String::from_utf8_lossy(bytes));
    while let Some(pos) = buffer.find('\n') {
        let line = buffer[..pos].trim_end_matches('\r').to_string();
        buffer.drain(..=pos);
        if let Some(event) = parser.feed_line(&line) {
            ready.push(event);
        }
    }
    buffer.len() <= MAX_BUFFERED_LINE
}

/// Incremental `text/event-stream` field parser
#[derive(Default)]
pub(crate) struct SseParser {
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Feed one line; returns a complete event when a blank line dispatches
    pub(crate) fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.event.is_none() && self.data.is_empty() {
                return None;
            }
            let event = SseEvent {
                event: self.event.take().unwrap_or_else(|| "message".to_string()),
                data: self.data.join("\n"),
            };
            self.data.clear();
            return Some(event);
        }
        if line.starts_with(':') {
            return None; // keepalive comment
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => debug!("ignoring SSE field {}", field),
        }
        None
    }
}
