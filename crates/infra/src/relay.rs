//! Entry point the HTTP layer uses to hand over accepted connections.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use pgws_core::RelayResult;

use crate::channel_manager::ChannelManager;
use crate::subscriber::{Connection, SessionSummary, SubscriberSession};

#[derive(Clone)]
pub struct Relay {
    manager: Arc<ChannelManager>,
    shutdown: CancellationToken,
    queue_capacity: usize,
}

impl Relay {
    pub fn new(manager: Arc<ChannelManager>, shutdown: CancellationToken, queue_capacity: usize) -> Self {
        Self {
            manager,
            shutdown,
            queue_capacity,
        }
    }

    pub fn manager(&self) -> &Arc<ChannelManager> {
        &self.manager
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Run one subscriber to completion on `connection`.
    ///
    /// `audiences` were resolved once by the caller at connect time. Duplicate
    /// channels or audiences are collapsed here so the registry never sees the
    /// same pair twice.
    pub async fn serve<C: Connection>(
        &self,
        connection: C,
        channels: &[String],
        audiences: &[String],
    ) -> RelayResult<SessionSummary> {
        let session = SubscriberSession::new(
            connection,
            unique(channels),
            unique(audiences),
            self.queue_capacity,
        );
        session.run(&self.manager, &self.shutdown).await
    }
}

fn unique(items: &[String]) -> Vec<String> {
    items
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgws_events::{EnvelopeCodec, InMemoryUpstream};

    use crate::subscriber::CloseReason;
    use crate::subscriber::testing::fake_connection;

    #[test]
    fn unique_collapses_duplicates() {
        let items = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        assert_eq!(unique(&items), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_audiences_deliver_once() {
        let (upstream, _rx) = InMemoryUpstream::new();
        let manager = Arc::new(ChannelManager::new(Arc::new(upstream)));
        let relay = Relay::new(Arc::clone(&manager), CancellationToken::new(), 8);
        let (connection, mut peer) = fake_connection();

        let task = {
            let relay = relay.clone();
            tokio::spawn(async move {
                relay
                    .serve(
                        connection,
                        &["events".to_string(), "events".to_string()],
                        &["A".to_string(), "A".to_string()],
                    )
                    .await
            })
        };
        while manager.stats().await.first().map(|s| s.registrations) != Some(1) {
            tokio::task::yield_now().await;
        }

        let message = EnvelopeCodec::default()
            .decode("events", r#"A,{"once":true}"#)
            .unwrap();
        assert_eq!(manager.dispatch(&message).await.unwrap().delivered, 1);
        assert!(peer.next_message().await.is_some());

        relay.shutdown_token().cancel();
        assert_eq!(task.await.unwrap().unwrap().reason, CloseReason::Shutdown);
    }
}
