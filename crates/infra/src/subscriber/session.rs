use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use pgws_core::{RelayError, RelayResult, SubscriberId};

use crate::channel_manager::ChannelManager;
use crate::registry::Poster;

use super::connection::{Connection, Inbound, InboundHalf, OutboundHalf};
use super::latch::{CloseLatch, CloseReason};

/// Messages a connection may have queued before it counts as too slow.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl SubscriberState {
    fn can_become(self, next: SubscriberState) -> bool {
        use SubscriberState::*;
        matches!(
            (self, next),
            (Connecting, Active) | (Connecting, Closed) | (Active, Closing) | (Closing, Closed)
        )
    }
}

/// How a finished session went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: SubscriberId,
    pub reason: CloseReason,
    /// Messages written to the connection.
    pub delivered: u64,
}

/// The registry-facing side of a connection: enqueue only, never blocks.
struct ConnectionPoster {
    id: SubscriberId,
    queue: mpsc::Sender<Bytes>,
    latch: Arc<CloseLatch>,
}

impl Poster for ConnectionPoster {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn post(&self, message: Bytes) -> RelayResult<()> {
        if self.latch.is_fired() {
            return Err(RelayError::delivery("connection closing"));
        }

        match self.queue.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.latch.fire(CloseReason::QueueOverflow);
                Err(RelayError::delivery("outbound queue full"))
            }
            Err(TrySendError::Closed(_)) => {
                self.latch
                    .fire(CloseReason::WriteFailed("outbound queue closed".to_string()));
                Err(RelayError::delivery("outbound queue closed"))
            }
        }
    }
}

/// One downstream connection, from registration to teardown.
pub struct SubscriberSession<C> {
    id: SubscriberId,
    connection: C,
    channels: Vec<String>,
    audiences: Vec<String>,
    queue_capacity: usize,
}

impl<C: Connection> SubscriberSession<C> {
    /// `channels` and `audiences` must already be deduplicated.
    pub fn new(
        connection: C,
        channels: Vec<String>,
        audiences: Vec<String>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            id: SubscriberId::new(),
            connection,
            channels,
            audiences,
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Run the session until the connection closes.
    ///
    /// Fails only when registration fails; the connection is released before
    /// returning in that case.
    pub async fn run(
        self,
        manager: &ChannelManager,
        shutdown: &CancellationToken,
    ) -> RelayResult<SessionSummary> {
        let Self {
            id,
            connection,
            channels,
            audiences,
            queue_capacity,
        } = self;
        let mut state = Lifecycle::new(id);

        let (mut outbound, inbound) = connection.split();
        let latch = Arc::new(CloseLatch::new());
        let (queue_tx, mut queue_rx) = mpsc::channel(queue_capacity);
        let poster = Arc::new(ConnectionPoster {
            id,
            queue: queue_tx,
            latch: Arc::clone(&latch),
        });

        if let Err(err) = manager.add_subscriber(&channels, &audiences, poster).await {
            outbound.close().await;
            state.advance(SubscriberState::Closed);
            return Err(err);
        }
        state.advance(SubscriberState::Active);

        let observer = tokio::spawn(observe_inbound(inbound, Arc::clone(&latch)));
        let delivered = write_until_closed(&mut outbound, &mut queue_rx, &latch, shutdown).await;

        state.advance(SubscriberState::Closing);
        let reason = latch.reason().unwrap_or(CloseReason::Shutdown);

        if let Err(err) = manager.remove_subscriber(&channels, &audiences, id).await {
            warn!(subscriber_id = %id, error = %err, "unregister failed during teardown");
        }
        queue_rx.close();
        outbound.close().await;
        observer.abort();
        state.advance(SubscriberState::Closed);

        debug!(subscriber_id = %id, reason = %reason, delivered, "subscriber closed");

        Ok(SessionSummary {
            id,
            reason,
            delivered,
        })
    }
}

struct Lifecycle {
    id: SubscriberId,
    state: SubscriberState,
}

impl Lifecycle {
    fn new(id: SubscriberId) -> Self {
        Self {
            id,
            state: SubscriberState::Connecting,
        }
    }

    fn advance(&mut self, next: SubscriberState) {
        debug_assert!(
            self.state.can_become(next),
            "invalid subscriber transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(subscriber_id = %self.id, from = ?self.state, to = ?next, "subscriber state");
        self.state = next;
    }
}

/// Drain the queue onto the connection until the latch fires.
///
/// A write in progress is abandoned as soon as the latch fires.
async fn write_until_closed<O: OutboundHalf>(
    outbound: &mut O,
    queue: &mut mpsc::Receiver<Bytes>,
    latch: &CloseLatch,
    shutdown: &CancellationToken,
) -> u64 {
    let mut delivered = 0;

    loop {
        tokio::select! {
            biased;
            _ = latch.fired() => break,
            _ = shutdown.cancelled() => {
                latch.fire(CloseReason::Shutdown);
                break;
            }
            next = queue.recv() => {
                let Some(message) = next else {
                    latch.fire(CloseReason::WriteFailed("outbound queue closed".to_string()));
                    break;
                };
                let written = tokio::select! {
                    biased;
                    _ = latch.fired() => break,
                    _ = shutdown.cancelled() => {
                        latch.fire(CloseReason::Shutdown);
                        break;
                    }
                    written = outbound.write(message) => written,
                };
                match written {
                    Ok(()) => delivered += 1,
                    Err(err) => {
                        latch.fire(CloseReason::WriteFailed(err.to_string()));
                        break;
                    }
                }
            }
        }
    }

    delivered
}

/// Watch the inbound side purely to notice the peer leaving.
async fn observe_inbound<I: InboundHalf>(mut inbound: I, latch: Arc<CloseLatch>) {
    loop {
        tokio::select! {
            biased;
            _ = latch.fired() => return,
            next = inbound.next_inbound() => match next {
                Inbound::Frame => continue,
                Inbound::Closed => {
                    latch.fire(CloseReason::PeerClosed);
                    return;
                }
                Inbound::Failed(reason) => {
                    latch.fire(CloseReason::ReadFailed(reason));
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pgws_events::{EnvelopeCodec, InMemoryUpstream};

    use crate::subscriber::testing::fake_connection;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn manager() -> (Arc<ChannelManager>, Arc<InMemoryUpstream>) {
        let (upstream, _rx) = InMemoryUpstream::new();
        let upstream = Arc::new(upstream);
        (Arc::new(ChannelManager::new(upstream.clone())), upstream)
    }

    async fn dispatch(manager: &ChannelManager, raw: &str) {
        let message = EnvelopeCodec::default().decode("events", raw).unwrap();
        manager.dispatch(&message).await.unwrap();
    }

    async fn wait_registered(manager: &ChannelManager, count: usize) {
        for _ in 0..200 {
            let registered: usize = manager.stats().await.iter().map(|s| s.registrations).sum();
            if registered == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} registrations");
    }

    #[test]
    fn lifecycle_only_moves_forward() {
        use SubscriberState::*;
        assert!(Connecting.can_become(Active));
        assert!(Active.can_become(Closing));
        assert!(Closing.can_become(Closed));
        assert!(!Closed.can_become(Active));
        assert!(!Active.can_become(Connecting));
    }

    #[tokio::test]
    async fn delivers_until_peer_closes_then_unregisters() {
        let (manager, _upstream) = manager();
        let (connection, mut peer) = fake_connection();
        let session = SubscriberSession::new(connection, names(&["events"]), names(&["A"]), 8);
        let shutdown = CancellationToken::new();

        let task = {
            let manager = Arc::clone(&manager);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { session.run(&manager, &shutdown).await })
        };
        wait_registered(&manager, 1).await;

        dispatch(&manager, r#"A,{"n":1}"#).await;
        let received = peer.next_message().await.unwrap();
        assert!(String::from_utf8_lossy(&received).contains(r#""n":1"#));

        peer.send_frame();
        peer.hang_up();
        let summary = task.await.unwrap().unwrap();

        assert_eq!(summary.reason, CloseReason::PeerClosed);
        assert_eq!(summary.delivered, 1);
        assert!(peer.is_closed());
        wait_registered(&manager, 0).await;
    }

    #[tokio::test]
    async fn failing_write_closes_after_one_attempt() {
        let (manager, _upstream) = manager();
        let (connection, peer) = fake_connection();
        peer.fail_writes();
        let session = SubscriberSession::new(
            connection,
            names(&["events", "other"]),
            names(&["A", "B"]),
            8,
        );
        let shutdown = CancellationToken::new();

        let task = {
            let manager = Arc::clone(&manager);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { session.run(&manager, &shutdown).await })
        };
        wait_registered(&manager, 4).await;

        dispatch(&manager, r#"A,{"n":1}"#).await;
        let summary = task.await.unwrap().unwrap();
        dispatch(&manager, r#"A,{"n":2}"#).await;

        assert!(matches!(summary.reason, CloseReason::WriteFailed(_)));
        assert_eq!(summary.delivered, 0);
        assert_eq!(peer.write_attempts(), 1);
        assert_eq!(manager.stats().await.iter().map(|s| s.registrations).sum::<usize>(), 0);
    }

    #[tokio::test]
    async fn read_failure_closes_session() {
        let (manager, _upstream) = manager();
        let (connection, peer) = fake_connection();
        let session = SubscriberSession::new(connection, names(&["events"]), names(&["A"]), 8);
        let shutdown = CancellationToken::new();

        let task = {
            let manager = Arc::clone(&manager);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { session.run(&manager, &shutdown).await })
        };
        wait_registered(&manager, 1).await;

        peer.fail_read("connection reset");
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.reason, CloseReason::ReadFailed("connection reset".into()));
    }

    #[tokio::test]
    async fn shutdown_closes_every_session() {
        let (manager, _upstream) = manager();
        let shutdown = CancellationToken::new();
        let mut peers = Vec::new();
        let mut tasks = Vec::new();

        for _ in 0..3 {
            let (connection, peer) = fake_connection();
            peers.push(peer);
            let session = SubscriberSession::new(connection, names(&["events"]), names(&["A"]), 8);
            let manager = Arc::clone(&manager);
            let shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move { session.run(&manager, &shutdown).await }));
        }
        wait_registered(&manager, 3).await;

        shutdown.cancel();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().reason, CloseReason::Shutdown);
        }
        assert!(peers.iter().all(|p| p.is_closed()));
    }

    #[tokio::test]
    async fn full_queue_drops_the_connection() {
        let (manager, _upstream) = manager();
        let (connection, peer) = fake_connection();
        peer.stall_writes();
        let session = SubscriberSession::new(connection, names(&["events"]), names(&["A"]), 1);
        let shutdown = CancellationToken::new();

        let task = {
            let manager = Arc::clone(&manager);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { session.run(&manager, &shutdown).await })
        };
        wait_registered(&manager, 1).await;

        // One message is stuck in the write, one fills the queue, the next overflows.
        for n in 0..3 {
            dispatch(&manager, &format!(r#"A,{{"n":{n}}}"#)).await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.reason, CloseReason::QueueOverflow);
    }

    #[tokio::test]
    async fn registration_failure_releases_the_connection() {
        let (manager, upstream) = manager();
        upstream.reject("forbidden");
        let (connection, peer) = fake_connection();
        let session = SubscriberSession::new(connection, names(&["forbidden"]), names(&["A"]), 8);

        let err = session
            .run(&manager, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Subscribe { .. }));
        assert!(peer.is_closed());
    }
}
