//! Socket seam between the core and its host transport.
//!
//! The core never opens or upgrades sockets itself. The host hands it the
//! two halves of an already-upgraded, message-oriented connection: a
//! [`FrameStream`] yielding discrete inbound binary messages and a
//! [`FrameSink`] accepting discrete outbound ones.

use async_trait::async_trait;
use bytes::Bytes;

/// Transport-level failure on the underlying socket.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The peer closed the socket or the transport task went away.
    #[error("connection closed")]
    Closed,
    /// Any other transport failure, carried as text.
    #[error("transport error: {0}")]
    Io(String),
}

/// Receiving half of a message-oriented socket.
#[async_trait]
pub trait FrameStream: Send {
    /// Next inbound binary message. `None` once the stream has ended.
    async fn next(&mut self) -> Option<Result<Bytes, TransportError>>;
}

/// Sending half of a message-oriented socket.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one binary message.
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError>;
}
