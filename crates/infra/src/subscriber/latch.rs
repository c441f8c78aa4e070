use std::fmt;
use std::sync::OnceLock;

use tokio_util::sync::CancellationToken;

/// Why a subscriber session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// An outbound write failed.
    WriteFailed(String),
    /// The outbound queue was full when a message arrived.
    QueueOverflow,
    /// The peer closed the connection.
    PeerClosed,
    /// The inbound read path failed.
    ReadFailed(String),
    /// The process is shutting down.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteFailed(reason) => write!(f, "write failed: {reason}"),
            Self::QueueOverflow => f.write_str("outbound queue overflow"),
            Self::PeerClosed => f.write_str("peer closed"),
            Self::ReadFailed(reason) => write!(f, "read failed: {reason}"),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Single-fire close signal shared by everything that can end a session.
///
/// The first `fire` records its reason and wakes every waiter; later calls
/// are no-ops and report `false`.
#[derive(Debug, Default)]
pub struct CloseLatch {
    reason: OnceLock<CloseReason>,
    fired: CancellationToken,
}

impl CloseLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call won the race.
    pub fn fire(&self, reason: CloseReason) -> bool {
        let won = self.reason.set(reason).is_ok();
        if won {
            self.fired.cancel();
        }
        won
    }

    pub fn is_fired(&self) -> bool {
        self.reason.get().is_some()
    }

    pub fn reason(&self) -> Option<CloseReason> {
        self.reason.get().cloned()
    }

    /// Resolves once the latch has fired.
    pub async fn fired(&self) {
        self.fired.cancelled().await;
    }
}
