//! Channel manager: one audience registry per upstream channel.
//!
//! Registries are created lazily the first time a subscriber asks for a
//! channel, and the upstream is asked to `listen` at that moment. The table
//! only grows; channels are never un-listened.
//!
//! ```text
//! add_subscriber(channels, audiences, poster)
//!   └─ for each channel: [write lock] get-or-insert slot → slot.get_or_try_init(listen + create) → register
//!
//! dispatch(message)
//!   └─ [read lock] find registry for message.channel → publish(audience, bytes)
//! ```
//!
//! The table lock is held only to find or insert a channel's slot, never
//! across upstream IO. Each slot is a `OnceCell`: the first subscriber runs
//! `listen` while later ones for the same channel wait on that cell, so a
//! channel is still listened to at most once. Dispatch and unregister on
//! other channels proceed while a slow subscribe is in flight.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{OnceCell, RwLock};
use tracing::{error, info, trace};

use pgws_core::{RelayError, RelayResult, SubscriberId};
use pgws_events::{ChannelListener, Message};

use crate::registry::{AudienceRegistry, Poster, PublishOutcome};

/// Per-channel counters for the stats endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub channel: String,
    pub audiences: usize,
    pub registrations: usize,
}

/// A channel's registry, created once the upstream accepted `listen`.
type Slot = Arc<OnceCell<Arc<AudienceRegistry>>>;

pub struct ChannelManager {
    listener: Arc<dyn ChannelListener>,
    registries: RwLock<HashMap<String, Slot>>,
}

impl ChannelManager {
    pub fn new(listener: Arc<dyn ChannelListener>) -> Self {
        Self {
            listener,
            registries: RwLock::new(HashMap::new()),
        }
    }

    /// Register `poster` for `audiences` on every channel in `channels`.
    ///
    /// A channel seen for the first time is listened to on the upstream
    /// exactly once, even with concurrent callers. If that listen fails, no
    /// registry is created for the channel and every registration this call
    /// already made is rolled back.
    pub async fn add_subscriber(
        &self,
        channels: &[String],
        audiences: &[String],
        poster: Arc<dyn Poster>,
    ) -> RelayResult<()> {
        let mut joined: Vec<Arc<AudienceRegistry>> = Vec::with_capacity(channels.len());

        for channel in channels {
            let registry = match self.open_channel(channel).await {
                Ok(registry) => registry,
                Err(err) => {
                    error!(channel = %channel, error = %err, "channel subscribe failed");
                    rollback(&joined, audiences, poster.id());
                    return Err(err);
                }
            };

            if let Err(err) = registry.register(audiences, Arc::clone(&poster)) {
                rollback(&joined, audiences, poster.id());
                return Err(err);
            }
            joined.push(registry);
        }

        Ok(())
    }

    /// Registry for `channel`, listening on the upstream first if needed.
    async fn open_channel(&self, channel: &str) -> RelayResult<Arc<AudienceRegistry>> {
        let slot = {
            let mut registries = self.registries.write().await;
            Arc::clone(registries.entry(channel.to_string()).or_default())
        };

        let listener = &self.listener;
        let opened = slot
            .get_or_try_init(|| async move {
                listener.listen(channel).await?;
                info!(channel = %channel, "listening on channel");
                Ok::<_, RelayError>(Arc::new(AudienceRegistry::new()))
            })
            .await
            .map(Arc::clone);

        if opened.is_err() {
            self.discard_slot(channel, slot).await;
        }
        opened
    }

    /// Drop a slot whose listen failed, unless another caller is still
    /// waiting on it.
    async fn discard_slot(&self, channel: &str, slot: Slot) {
        let mut registries = self.registries.write().await;
        let Some(current) = registries.get(channel) else {
            return;
        };
        // Clones are only taken under the write lock: the table's and ours.
        if Arc::ptr_eq(current, &slot) && !slot.initialized() && Arc::strong_count(&slot) == 2 {
            registries.remove(channel);
        }
    }

    /// Unregister subscriber `id` from `audiences` on each known channel.
    ///
    /// Channels without a registry are skipped.
    pub async fn remove_subscriber(
        &self,
        channels: &[String],
        audiences: &[String],
        id: SubscriberId,
    ) -> RelayResult<()> {
        let registries = self.registries.read().await;
        for channel in channels {
            if let Some(registry) = registries.get(channel).and_then(|slot| slot.get()) {
                registry.unregister(audiences, id)?;
            }
        }
        Ok(())
    }

    /// Route one decoded message to the subscribers of its audience.
    ///
    /// Messages for channels no subscriber ever asked for are dropped.
    pub async fn dispatch(&self, message: &Message) -> RelayResult<PublishOutcome> {
        let registry = self
            .registries
            .read()
            .await
            .get(message.channel())
            .and_then(|slot| slot.get().cloned());
        let Some(registry) = registry else {
            trace!(channel = message.channel(), "no registry for channel");
            return Ok(PublishOutcome::default());
        };

        let bytes = message.to_bytes()?;
        registry.publish(message.audience(), &bytes)
    }

    pub async fn is_listening(&self, channel: &str) -> bool {
        self.registries
            .read()
            .await
            .get(channel)
            .is_some_and(|slot| slot.initialized())
    }

    /// Snapshot of every listened channel, sorted by name.
    pub async fn stats(&self) -> Vec<ChannelStats> {
        let registries = self.registries.read().await;
        let mut stats: Vec<ChannelStats> = registries
            .iter()
            .filter_map(|(channel, slot)| {
                slot.get().map(|registry| ChannelStats {
                    channel: channel.clone(),
                    audiences: registry.audience_count(),
                    registrations: registry.registration_count(),
                })
            })
            .collect();
        stats.sort_by(|a, b| a.channel.cmp(&b.channel));
        stats
    }
}

fn rollback(joined: &[Arc<AudienceRegistry>], audiences: &[String], id: SubscriberId) {
    for registry in joined {
        if let Err(err) = registry.unregister(audiences, id) {
            error!(subscriber_id = %id, error = %err, "rollback of partial registration failed");
        }
    }
}
