//! In-process connection fakes for lifecycle tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use pgws_core::{RelayError, RelayResult};

use super::connection::{Connection, Inbound, InboundHalf, OutboundHalf};

#[derive(Debug, Default)]
struct Switches {
    fail_writes: AtomicBool,
    stall_writes: AtomicBool,
    write_attempts: AtomicUsize,
    closed: AtomicBool,
}

pub(crate) struct FakeConnection {
    outbound: FakeOutbound,
    inbound: FakeInbound,
}

pub(crate) struct FakeOutbound {
    sent: mpsc::UnboundedSender<Bytes>,
    switches: Arc<Switches>,
}

pub(crate) struct FakeInbound {
    frames: mpsc::UnboundedReceiver<Inbound>,
}

/// The test's end of a [`FakeConnection`].
pub(crate) struct FakePeer {
    received: mpsc::UnboundedReceiver<Bytes>,
    frames: mpsc::UnboundedSender<Inbound>,
    switches: Arc<Switches>,
}

pub(crate) fn fake_connection() -> (FakeConnection, FakePeer) {
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let switches = Arc::new(Switches::default());

    let connection = FakeConnection {
        outbound: FakeOutbound {
            sent: sent_tx,
            switches: Arc::clone(&switches),
        },
        inbound: FakeInbound { frames: frames_rx },
    };
    let peer = FakePeer {
        received: sent_rx,
        frames: frames_tx,
        switches,
    };
    (connection, peer)
}

impl Connection for FakeConnection {
    type Outbound = FakeOutbound;
    type Inbound = FakeInbound;

    fn split(self) -> (FakeOutbound, FakeInbound) {
        (self.outbound, self.inbound)
    }
}

#[async_trait]
impl OutboundHalf for FakeOutbound {
    async fn write(&mut self, message: Bytes) -> RelayResult<()> {
        self.switches.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.switches.fail_writes.load(Ordering::SeqCst) {
            return Err(RelayError::transport("simulated write failure"));
        }
        if self.switches.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.sent
            .send(message)
            .map_err(|_| RelayError::transport("peer gone"))
    }

    async fn close(&mut self) {
        self.switches.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl InboundHalf for FakeInbound {
    async fn next_inbound(&mut self) -> Inbound {
        self.frames.recv().await.unwrap_or(Inbound::Closed)
    }
}

impl FakePeer {
    pub(crate) fn fail_writes(&self) {
        self.switches.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Writes never complete, as with a peer that stopped reading.
    pub(crate) fn stall_writes(&self) {
        self.switches.stall_writes.store(true, Ordering::SeqCst);
    }

    pub(crate) fn send_frame(&self) {
        let _ = self.frames.send(Inbound::Frame);
    }

    pub(crate) fn hang_up(&self) {
        let _ = self.frames.send(Inbound::Closed);
    }

    pub(crate) fn fail_read(&self, reason: &str) {
        let _ = self.frames.send(Inbound::Failed(reason.to_string()));
    }

    /// Next message written to the connection, or `None` after a second.
    pub(crate) async fn next_message(&mut self) -> Option<Bytes> {
        tokio::time::timeout(Duration::from_secs(1), self.received.recv())
            .await
            .ok()
            .flatten()
    }

    pub(crate) fn write_attempts(&self) -> usize {
        self.switches.write_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.switches.closed.load(Ordering::SeqCst)
    }
}
