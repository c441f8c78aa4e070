//! Postgres LISTEN/NOTIFY upstream.
//!
//! `PgListener` needs `&mut self` both to join channels and to receive, so a
//! single pump task owns it. Everything else talks to the pump:
//!
//! ```text
//! PgUpstream::listen ──Command::Listen──► pump task ──UpstreamEvent──► listen loop
//!                    ◄──────reply────────    │
//!                                           PgListener
//! ```
//!
//! ## Reconnects
//!
//! When the connection drops, the pump retries with a doubling delay between
//! `min_reconnect` and `max_reconnect`. `PgListener` re-issues `LISTEN` for
//! every joined channel on the new connection; once it is back the pump emits
//! [`UpstreamEvent::Reconnected`]. Notifications sent while disconnected are
//! lost. `listen` calls made during the outage fail fast with a `Subscribe`
//! error instead of waiting for the database to come back.
//!
//! ## Error Mapping
//!
//! | Failure | RelayError |
//! |---------|------------|
//! | initial connect | `Upstream` |
//! | `LISTEN` rejected | `Subscribe` |
//! | pump gone | `Subscribe` ("upstream closed") |
//! | listen while reconnecting | `Subscribe` ("upstream reconnecting") |

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use pgws_core::{RelayError, RelayResult};
use pgws_events::{ChannelListener, Notification, UpstreamEvent};

use super::backoff::ReconnectBackoff;

pub const DEFAULT_MIN_RECONNECT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RECONNECT: Duration = Duration::from_secs(60);

const COMMAND_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgUpstreamConfig {
    pub min_reconnect: Duration,
    pub max_reconnect: Duration,
}

impl Default for PgUpstreamConfig {
    fn default() -> Self {
        Self {
            min_reconnect: DEFAULT_MIN_RECONNECT,
            max_reconnect: DEFAULT_MAX_RECONNECT,
        }
    }
}

#[derive(Debug)]
enum Command {
    Listen {
        channel: String,
        reply: oneshot::Sender<RelayResult<()>>,
    },
}

/// Channel-joining half of the Postgres upstream.
///
/// The matching event stream is returned by [`PgUpstream::connect`].
#[derive(Debug, Clone)]
pub struct PgUpstream {
    commands: mpsc::Sender<Command>,
}

impl PgUpstream {
    /// Open the LISTEN connection and start the pump task.
    ///
    /// Fails only if the first connection cannot be established; later drops
    /// are retried in the background. The pump stops when `shutdown` fires or
    /// every `PgUpstream` clone is dropped.
    #[instrument(skip_all, err)]
    pub async fn connect(
        database_url: &str,
        config: PgUpstreamConfig,
        shutdown: CancellationToken,
    ) -> RelayResult<(Self, mpsc::UnboundedReceiver<UpstreamEvent>)> {
        let listener = PgListener::connect(database_url)
            .await
            .map_err(|e| RelayError::upstream(e.to_string()))?;
        info!("connected to postgres for LISTEN/NOTIFY");

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(pump(listener, commands_rx, events_tx, config, shutdown));

        Ok((
            Self {
                commands: commands_tx,
            },
            events_rx,
        ))
    }
}

#[async_trait]
impl ChannelListener for PgUpstream {
    async fn listen(&self, channel: &str) -> RelayResult<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Listen {
                channel: channel.to_string(),
                reply,
            })
            .await
            .map_err(|_| RelayError::subscribe(channel, "upstream closed"))?;

        response
            .await
            .map_err(|_| RelayError::subscribe(channel, "upstream closed"))?
    }
}

async fn pump(
    mut listener: PgListener,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<UpstreamEvent>,
    config: PgUpstreamConfig,
    shutdown: CancellationToken,
) {
    let mut backoff = ReconnectBackoff::new(config.min_reconnect, config.max_reconnect);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            command = commands.recv() => match command {
                Some(Command::Listen { channel, reply }) => {
                    let result = listener
                        .listen(&channel)
                        .await
                        .map_err(|e| RelayError::subscribe(&channel, e.to_string()));
                    // The caller may have given up; nothing to report then.
                    let _ = reply.send(result);
                }
                None => break,
            },
            received = listener.try_recv() => match received {
                Ok(Some(notification)) => {
                    let event = UpstreamEvent::Notification(Notification::new(
                        notification.channel(),
                        notification.payload(),
                    ));
                    if events.send(event).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    warn!("postgres LISTEN connection lost");
                    if !reconnect(&mut listener, &mut backoff, &mut commands, &shutdown).await {
                        break;
                    }
                    if events.send(UpstreamEvent::Reconnected).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "postgres LISTEN receive failed");
                    if !reconnect(&mut listener, &mut backoff, &mut commands, &shutdown).await {
                        break;
                    }
                    if events.send(UpstreamEvent::Reconnected).is_err() {
                        break;
                    }
                }
            },
        }
    }

    debug!("postgres pump stopped");
}

/// Retry until the listener has a live connection again.
///
/// Returns `false` when shutdown interrupted the wait or every
/// `PgUpstream` handle is gone.
async fn reconnect(
    listener: &mut PgListener,
    backoff: &mut ReconnectBackoff,
    commands: &mut mpsc::Receiver<Command>,
    shutdown: &CancellationToken,
) -> bool {
    loop {
        let wake = Instant::now() + backoff.next_delay();
        if !wait_refusing_commands(wake, commands, shutdown).await {
            return false;
        }

        // Any statement forces PgListener to reconnect and re-LISTEN.
        match sqlx::query("SELECT 1").execute(&mut *listener).await {
            Ok(_) => {
                backoff.reset();
                info!("postgres LISTEN connection re-established");
                return true;
            }
            Err(err) => {
                error!(error = %err, "postgres reconnect failed");
            }
        }
    }
}

/// Sleep until `wake`, failing every `listen` that arrives meanwhile.
async fn wait_refusing_commands(
    wake: Instant,
    commands: &mut mpsc::Receiver<Command>,
    shutdown: &CancellationToken,
) -> bool {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return false,
            command = commands.recv() => match command {
                Some(Command::Listen { channel, reply }) => {
                    debug!(channel = %channel, "listen refused while reconnecting");
                    let _ = reply.send(Err(RelayError::subscribe(channel, "upstream reconnecting")));
                }
                None => return false,
            },
            _ = tokio::time::sleep_until(wake) => return true,
        }
    }
}
