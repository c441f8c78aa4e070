//! Relay wiring: upstream, channel manager, listen loop.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pgws_core::RelayResult;
use pgws_events::{ChannelListener, InMemoryUpstream};
use pgws_infra::{
    AudienceSource, ChannelManager, ListenLoop, ListenLoopHandle, ListenSnapshot, ListenStats,
    PgUpstream, Relay, RelayConfig, UpstreamKind,
};

/// Everything the HTTP handlers need, shared behind one `Arc`.
pub struct RelayServices {
    relay: Relay,
    channels: Vec<String>,
    audience: AudienceSource,
    listen: Mutex<Option<ListenLoopHandle>>,
    listen_stats: Arc<ListenStats>,
    started_at: DateTime<Utc>,
}

impl RelayServices {
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Upstream channels every websocket joins.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn audience_source(&self) -> &AudienceSource {
        &self.audience
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn listen_stats(&self) -> ListenSnapshot {
        self.listen_stats.snapshot()
    }

    /// `false` once the listen loop has stopped (upstream gone or shutdown).
    pub fn is_listening(&self) -> bool {
        self.listen
            .lock()
            .map(|guard| guard.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Close every subscriber and stop the listen loop.
    pub async fn shutdown(&self) {
        self.relay.shutdown_token().cancel();

        let handle = match self.listen.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }

    fn assemble(
        config: &RelayConfig,
        listener: Arc<dyn ChannelListener>,
        listen: impl FnOnce(Arc<ChannelManager>) -> ListenLoopHandle,
        shutdown: CancellationToken,
    ) -> Self {
        let manager = Arc::new(ChannelManager::new(listener));
        let handle = listen(Arc::clone(&manager));
        let listen_stats = handle.stats_source();

        Self {
            relay: Relay::new(manager, shutdown, config.outbound_queue),
            channels: config.channels.clone(),
            audience: config.audience.clone(),
            listen: Mutex::new(Some(handle)),
            listen_stats,
            started_at: Utc::now(),
        }
    }

    /// Services over an in-process upstream; the returned handle publishes.
    pub fn in_memory(config: &RelayConfig, shutdown: CancellationToken) -> (Self, Arc<InMemoryUpstream>) {
        let (upstream, events) = InMemoryUpstream::new();
        let upstream = Arc::new(upstream);
        let codec = config.codec();

        let services = Self::assemble(
            config,
            upstream.clone(),
            |manager| ListenLoop::spawn(events, manager, codec),
            shutdown,
        );
        (services, upstream)
    }
}

/// Build services for `config`.
///
/// For Postgres this opens the LISTEN connection; failure is fatal to
/// startup.
pub async fn build_services(config: &RelayConfig, shutdown: CancellationToken) -> RelayResult<RelayServices> {
    match &config.upstream {
        UpstreamKind::Postgres { database_url } => {
            let (upstream, events) =
                PgUpstream::connect(database_url, config.pg_config(), shutdown.clone()).await?;
            let codec = config.codec();

            Ok(RelayServices::assemble(
                config,
                Arc::new(upstream),
                |manager| ListenLoop::spawn(events, manager, codec),
                shutdown,
            ))
        }
        UpstreamKind::InMemory => {
            warn!("using in-memory upstream; no notifications will arrive from a database");
            let (services, _upstream) = RelayServices::in_memory(config, shutdown);
            info!(channels = ?config.channels, "in-memory relay ready");
            Ok(services)
        }
    }
}
