/// Bidirectional realtime channel primitive.
///
/// A channel is opened per credential and exposed to the session as a pair
/// of in-memory pumps, keeping the socket machinery out of the session's
/// state machine (and swappable for an in-memory fake in tests).
use crate::error::{Result, SparkError};
use crate::realtime::protocol::{events, ClientFrame, ServerFrame};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use url::Url;

const PUMP_CAPACITY: usize = 64;

/// The two ends of an open channel, handed to the session
pub struct ChannelPair {
    pub outbound: mpsc::Sender<ClientFrame>,
    pub inbound: mpsc::Receiver<ServerFrame>,
}

#[async_trait]
pub trait Channel: Send + Sync {
    /// Open an authenticated connection. Returns once the socket is
    /// established; the pair's pumps stay live until either side closes.
    async fn open(&self, url: &str, token: &str) -> Result<ChannelPair>;
}

/// Production channel over a websocket.
///
/// The token travels through every mechanism the transport exposes (query
/// parameter, `Authorization` header, and an `auth` frame at the protocol
/// handshake) to tolerate proxies that strip one of them.
#[derive(Default)]
pub struct WsChannel;

impl WsChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Channel for WsChannel {
    async fn open(&self, url: &str, token: &str) -> Result<ChannelPair> {
        let mut url = Url::parse(url)?;
        url.query_pairs_mut().append_pair("token", token);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SparkError::Channel(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| SparkError::Channel(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, _response) = connect_async(request)
            .await
            .map_err(|e| SparkError::Channel(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let (out_tx, mut out_rx) = mpsc::channel::<ClientFrame>(PUMP_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<ServerFrame>(PUMP_CAPACITY);

        // Writer pump: auth handshake frame first, then outbound frames
        let auth_token = token.to_string();
        tokio::spawn(async move {
            let auth = ClientFrame {
                event: events::AUTH.to_string(),
                ack: None,
                payload: json!({ "token": auth_token }),
            };
            let frame = match serde_json::to_string(&auth) {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to serialize auth frame: {}", e);
                    return;
                }
            };
            if let Err(e) = sink.send(WsMessage::Text(frame)).await {
                debug!("auth handshake write failed: {}", e);
                return;
            }

            while let Some(frame) = out_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("failed to serialize outbound frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    debug!("websocket write failed: {}", e);
                    break;
                }
            }
        });

        // Reader pump: decode server frames, drop anything malformed
        tokio::spawn(async move {
            while let Some(next) = stream.next().await {
                match next {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => {
                            if in_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("dropping malformed server frame: {}", e),
                    },
                    Ok(WsMessage::Close(_)) => {
                        debug!("websocket closed by server");
                        break;
                    }
                    Ok(_) => {} // ping/pong/binary
                    Err(e) => {
                        debug!("websocket read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(ChannelPair {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
