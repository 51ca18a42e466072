/// Realtime chat transport: wire protocol, delivery-acknowledgement queue,
/// channel primitive and the authenticated session on top of them.
pub mod ack_queue;
pub mod channel;
pub mod protocol;
pub mod session;

pub use ack_queue::AckQueue;
pub use channel::{Channel, ChannelPair, WsChannel};
pub use session::{ConnectionState, RealtimeSession};
