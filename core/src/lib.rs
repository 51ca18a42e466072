/// Sparklink client core
///
/// The shared client engine behind the Sparklink mobile apps: authenticated
/// realtime chat with ack-based delivery and reconnect replay, and the
/// daily-match search lifecycle over the REST backend's push stream.

pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod http;
pub mod kv;
pub mod match_cache;
pub mod realtime;
pub mod search;
pub mod sse;
pub mod types;

pub use auth::CredentialStore;
pub use chat::{ConversationController, ConversationState};
pub use config::Config;
pub use error::{Result, SparkError};
pub use http::{Api, RestApi};
pub use match_cache::MatchCache;
pub use realtime::{ConnectionState, RealtimeSession, WsChannel};
pub use search::{SearchController, SearchPhase, SearchSnapshot};
pub use sse::SseSearchStream;
