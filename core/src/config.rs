/// Configuration management
use crate::error::{Result, SparkError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://127.0.0.1:3000/api/";
const DEFAULT_REALTIME_URL: &str = "ws://127.0.0.1:3000/chat";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the REST backend (must end with a slash)
    pub api_base_url: String,

    /// URL of the realtime chat namespace
    pub realtime_url: String,

    /// Bounded wait for a request/ack reply
    pub ack_timeout: Duration,

    /// Interval between matchmaking liveness heartbeats
    pub heartbeat_interval: Duration,

    /// Delay before confirming delivery of an inbound message,
    /// so the UI has a chance to render it first
    pub delivery_ack_delay: Duration,

    /// Page size for the initial conversation history fetch
    pub history_page_size: usize,

    /// Delay between reconnection attempts while a credential is present
    pub reconnect_delay: Duration,

    /// Data directory for persisted client state (defaults to `.sparklink`)
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            ack_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(120),
            delivery_ack_delay: Duration::from_millis(500),
            history_page_size: 50,
            reconnect_delay: Duration::from_secs(3),
            data_dir: PathBuf::from(".sparklink"),
        }
    }
}

impl Config {
    /// Create config from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("SPARKLINK_API_URL") {
            config.api_base_url = if url.ends_with('/') { url } else { format!("{}/", url) };
        }
        if let Ok(url) = std::env::var("SPARKLINK_REALTIME_URL") {
            config.realtime_url = url;
        }
        if let Ok(dir) = std::env::var("SPARKLINK_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(secs) = std::env::var("SPARKLINK_HEARTBEAT_SECS") {
            let secs = secs.parse::<u64>().map_err(|_| {
                SparkError::Config("SPARKLINK_HEARTBEAT_SECS must be a number of seconds".to_string())
            })?;
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Ok(ms) = std::env::var("SPARKLINK_ACK_TIMEOUT_MS") {
            let ms = ms.parse::<u64>().map_err(|_| {
                SparkError::Config("SPARKLINK_ACK_TIMEOUT_MS must be a number of milliseconds".to_string())
            })?;
            config.ack_timeout = Duration::from_millis(ms);
        }

        url::Url::parse(&config.api_base_url)
            .map_err(|_| SparkError::Config(format!("invalid API URL: {}", config.api_base_url)))?;
        url::Url::parse(&config.realtime_url)
            .map_err(|_| SparkError::Config(format!("invalid realtime URL: {}", config.realtime_url)))?;

        Ok(config)
    }
}
