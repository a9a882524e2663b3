//! Realtime push channel for long-running jobs.

mod channel;
mod message;
mod transport;

pub use channel::{ChannelConfig, ChannelEvent, DisconnectReason, RealtimeChannel};
pub use message::{dispatch, LogLevel, MessageHandler, Payload, Progress, RealtimeMessage};
pub use transport::WebSocketTransport;

#[cfg(test)]
pub(crate) use transport::testing;
