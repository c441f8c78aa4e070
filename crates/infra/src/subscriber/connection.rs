use async_trait::async_trait;
use bytes::Bytes;

use pgws_core::RelayResult;

/// What the inbound side of a connection observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Application data or a control frame. Contents are ignored.
    Frame,
    /// The peer closed the connection cleanly.
    Closed,
    /// The read path failed.
    Failed(String),
}

/// Sending half of a downstream connection.
#[async_trait]
pub trait OutboundHalf: Send + 'static {
    /// Write one message. Any error is terminal for the connection.
    async fn write(&mut self, message: Bytes) -> RelayResult<()>;

    /// Release the connection. Best effort; called once during teardown.
    async fn close(&mut self);
}

/// Receiving half of a downstream connection.
#[async_trait]
pub trait InboundHalf: Send + 'static {
    /// Wait for the next frame, or for the connection to end.
    ///
    /// Must be cancel-safe: the read-observer drops it when the session closes
    /// for another reason.
    async fn next_inbound(&mut self) -> Inbound;
}

/// A bidirectional downstream connection (already past its handshake).
pub trait Connection: Send + 'static {
    type Outbound: OutboundHalf;
    type Inbound: InboundHalf;

    fn split(self) -> (Self::Outbound, Self::Inbound);
}
