//! In-memory upstream for tests/dev.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use pgws_core::{RelayError, RelayResult};

use crate::upstream::{ChannelListener, Notification, UpstreamEvent};

/// In-process stand-in for a LISTEN/NOTIFY connection.
///
/// - No IO
/// - Notifications on channels nobody listened to are discarded, like NOTIFY
/// - Channels can be marked as rejected to exercise subscribe failures
#[derive(Debug)]
pub struct InMemoryUpstream {
    listens: Mutex<HashMap<String, usize>>,
    rejected: Mutex<HashSet<String>>,
    tx: mpsc::UnboundedSender<UpstreamEvent>,
}

impl InMemoryUpstream {
    /// Create the upstream and the receiving end the listen loop consumes.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UpstreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let upstream = Self {
            listens: Mutex::new(HashMap::new()),
            rejected: Mutex::new(HashSet::new()),
            tx,
        };
        (upstream, rx)
    }

    /// Publish `payload` on `channel`.
    ///
    /// Returns `false` when the channel is not being listened to (or the
    /// receiving side is gone); the payload is dropped in that case.
    pub fn notify(&self, channel: &str, payload: impl Into<String>) -> bool {
        if !self.is_listening(channel) {
            trace!(channel = channel, "notify on unlistened channel dropped");
            return false;
        }

        self.tx
            .send(UpstreamEvent::Notification(Notification::new(channel, payload)))
            .is_ok()
    }

    /// Emit the reconnect sentinel.
    pub fn signal_reconnect(&self) -> bool {
        self.tx.send(UpstreamEvent::Reconnected).is_ok()
    }

    /// Make every future `listen(channel)` fail.
    pub fn reject(&self, channel: impl Into<String>) {
        if let Ok(mut rejected) = self.rejected.lock() {
            rejected.insert(channel.into());
        }
    }

    pub fn is_listening(&self, channel: &str) -> bool {
        self.listen_count(channel) > 0
    }

    /// How many times `listen(channel)` succeeded.
    pub fn listen_count(&self, channel: &str) -> usize {
        self.listens
            .lock()
            .map(|listens| listens.get(channel).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl ChannelListener for InMemoryUpstream {
    async fn listen(&self, channel: &str) -> RelayResult<()> {
        let rejected = self
            .rejected
            .lock()
            .map_err(|_| RelayError::Poisoned("in-memory upstream"))?
            .contains(channel);
        if rejected {
            return Err(RelayError::subscribe(channel, "rejected by upstream"));
        }

        let mut listens = self
            .listens
            .lock()
            .map_err(|_| RelayError::Poisoned("in-memory upstream"))?;
        *listens.entry(channel.to_string()).or_default() += 1;
        Ok(())
    }
}
