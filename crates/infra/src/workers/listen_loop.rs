use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pgws_events::{EnvelopeCodec, NotificationSource, UpstreamEvent};

use crate::channel_manager::ChannelManager;

/// Handle to control and join the listen loop.
#[derive(Debug)]
pub struct ListenLoopHandle {
    shutdown: CancellationToken,
    join: JoinHandle<()>,
    stats: Arc<ListenStats>,
}

impl ListenLoopHandle {
    /// Request shutdown and wait for the loop to stop.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(err) = self.join.await {
            warn!(worker = "listen-loop", error = ?err, "listen loop task panicked");
        }
    }

    pub fn stats(&self) -> ListenSnapshot {
        self.stats.snapshot()
    }

    /// Shared counters, for readers that outlive the handle borrow.
    pub fn stats_source(&self) -> Arc<ListenStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Counters updated by the loop.
#[derive(Debug, Default)]
pub struct ListenStats {
    received: AtomicU64,
    dropped: AtomicU64,
    dispatched: AtomicU64,
    deliveries: AtomicU64,
    reconnects: AtomicU64,
}

impl ListenStats {
    pub fn snapshot(&self) -> ListenSnapshot {
        ListenSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ListenStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenSnapshot {
    /// Notifications pulled from the upstream.
    pub received: u64,
    /// Notifications that failed to decode.
    pub dropped: u64,
    /// Notifications decoded and routed.
    pub dispatched: u64,
    /// Successful posts across all subscribers.
    pub deliveries: u64,
    /// Reconnect sentinels observed.
    pub reconnects: u64,
}

/// The single consumer of upstream notifications.
///
/// - Pulls events one at a time, in arrival order
/// - Decodes and routes each notification through the [`ChannelManager`]
/// - Logs and skips malformed payloads, never stops on one
/// - Ends when the source closes or shutdown is requested
#[derive(Debug)]
pub struct ListenLoop;

impl ListenLoop {
    pub fn spawn<S>(source: S, manager: Arc<ChannelManager>, codec: EnvelopeCodec) -> ListenLoopHandle
    where
        S: NotificationSource + 'static,
    {
        let shutdown = CancellationToken::new();
        let stats = Arc::new(ListenStats::default());

        let join = tokio::spawn(Self::run(
            source,
            manager,
            codec,
            shutdown.clone(),
            Arc::clone(&stats),
        ));

        ListenLoopHandle {
            shutdown,
            join,
            stats,
        }
    }

    /// Loop body; exposed for callers that drive it on their own task.
    pub async fn run<S>(
        mut source: S,
        manager: Arc<ChannelManager>,
        codec: EnvelopeCodec,
        shutdown: CancellationToken,
        stats: Arc<ListenStats>,
    ) where
        S: NotificationSource,
    {
        info!(worker = "listen-loop", "listen loop started");

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = source.next_event() => event,
            };

            let notification = match event {
                None => {
                    info!(worker = "listen-loop", "upstream closed");
                    break;
                }
                Some(UpstreamEvent::Reconnected) => {
                    stats.reconnects.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        worker = "listen-loop",
                        "upstream reconnected; notifications sent during the outage are lost"
                    );
                    continue;
                }
                Some(UpstreamEvent::Notification(n)) => n,
            };

            stats.received.fetch_add(1, Ordering::Relaxed);

            let message = match codec.decode(notification.channel(), notification.payload()) {
                Ok(message) => message,
                Err(err) => {
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        worker = "listen-loop",
                        channel = notification.channel(),
                        error = %err,
                        "dropping undecodable notification"
                    );
                    continue;
                }
            };

            match manager.dispatch(&message).await {
                Ok(outcome) => {
                    stats.dispatched.fetch_add(1, Ordering::Relaxed);
                    stats
                        .deliveries
                        .fetch_add(outcome.delivered as u64, Ordering::Relaxed);
                    debug!(
                        channel = message.channel(),
                        audience = message.audience(),
                        correlation_id = %message.id(),
                        delivered = outcome.delivered,
                        failed = outcome.failed,
                        "notification dispatched"
                    );
                }
                Err(err) => {
                    warn!(
                        worker = "listen-loop",
                        channel = message.channel(),
                        correlation_id = %message.id(),
                        error = %err,
                        "dispatch failed"
                    );
                }
            }
        }

        info!(worker = "listen-loop", "listen loop stopped");
    }
}
