//! Upstream publish/subscribe boundary (mechanics only).
//!
//! The relay consumes a single sequential stream of raw notifications and
//! asks the transport to join channels on demand. Reconnect policy belongs to
//! the transport; the relay only sees the [`UpstreamEvent::Reconnected`]
//! sentinel it emits afterwards.
//!
//! ```text
//! transport ──next_event()──► listen loop ──► channel manager
//!     ▲                                            │
//!     └──────────────── listen(channel) ───────────┘
//! ```
//!
//! Both halves are traits so the Postgres adapter and the in-memory
//! upstream used in tests are interchangeable.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use pgws_core::RelayResult;

/// One raw notification as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    channel: String,
    payload: String,
}

impl Notification {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

/// Item yielded by a [`NotificationSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// A notification on a channel the transport is listening to.
    Notification(Notification),
    /// The transport lost and re-established its connection. Anything
    /// published in between is gone.
    Reconnected,
}

/// Sequential stream of upstream events.
///
/// Returns `None` once the source is closed for good (process shutdown).
#[async_trait]
pub trait NotificationSource: Send {
    async fn next_event(&mut self) -> Option<UpstreamEvent>;
}

#[async_trait]
impl NotificationSource for mpsc::UnboundedReceiver<UpstreamEvent> {
    async fn next_event(&mut self) -> Option<UpstreamEvent> {
        self.recv().await
    }
}

/// Subscribe-to-channel half of the transport.
///
/// Implementations should be idempotent per channel; the channel manager
/// still guarantees it asks at most once per channel.
#[async_trait]
pub trait ChannelListener: Send + Sync {
    async fn listen(&self, channel: &str) -> RelayResult<()>;
}

#[async_trait]
impl<L> ChannelListener for Arc<L>
where
    L: ChannelListener + ?Sized,
{
    async fn listen(&self, channel: &str) -> RelayResult<()> {
        (**self).listen(channel).await
    }
}
