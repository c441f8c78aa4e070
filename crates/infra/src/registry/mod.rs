//! Per-channel audience registry.
//!
//! Maps an audience identifier to the subscribers currently interested in
//! it. One registry exists per upstream channel (see `ChannelManager`).
//!
//! ## Locking
//!
//! A single mutex guards the whole map. `publish` holds it only long enough
//! to clone the subscriber list for one audience; the `post` calls happen
//! after the guard is released, so a slow subscriber never stalls
//! registration on the same channel. A subscriber unregistering right after
//! the snapshot may still receive that one message.
//!
//! ## Duplicates
//!
//! `register` appends unconditionally. Registering the same subscriber twice
//! for one audience yields two deliveries per publish; callers dedupe.

mod poster;
mod recording;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tracing::debug;

use pgws_core::{RelayError, RelayResult, SubscriberId};

pub use poster::Poster;
pub use recording::RecordingPoster;

/// What a single `publish` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Subscribers that accepted the message.
    pub delivered: usize,
    /// Subscribers whose `post` failed.
    pub failed: usize,
}

impl PublishOutcome {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Audience → subscribers for one channel.
#[derive(Default)]
pub struct AudienceRegistry {
    registrations: Mutex<HashMap<String, Vec<Arc<dyn Poster>>>>,
}

impl AudienceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RelayResult<MutexGuard<'_, HashMap<String, Vec<Arc<dyn Poster>>>>> {
        self.registrations
            .lock()
            .map_err(|_| RelayError::Poisoned("audience registry"))
    }

    /// Add `poster` to every audience in `audiences`.
    pub fn register(&self, audiences: &[String], poster: Arc<dyn Poster>) -> RelayResult<()> {
        let mut registrations = self.lock()?;
        for audience in audiences {
            registrations
                .entry(audience.clone())
                .or_default()
                .push(Arc::clone(&poster));
        }
        Ok(())
    }

    /// Remove the subscriber `id` from every audience in `audiences`.
    ///
    /// Unknown audiences or subscribers are ignored. Audiences left empty are
    /// dropped from the map.
    pub fn unregister(&self, audiences: &[String], id: SubscriberId) -> RelayResult<()> {
        let mut registrations = self.lock()?;
        for audience in audiences {
            if let Some(posters) = registrations.get_mut(audience) {
                posters.retain(|p| p.id() != id);
                if posters.is_empty() {
                    registrations.remove(audience);
                }
            }
        }
        Ok(())
    }

    /// Hand `message` to every subscriber of `audience`.
    ///
    /// Nobody listening is the normal idle state, not an error.
    pub fn publish(&self, audience: &str, message: &Bytes) -> RelayResult<PublishOutcome> {
        let snapshot: Vec<Arc<dyn Poster>> = match self.lock()?.get(audience) {
            Some(posters) => posters.clone(),
            None => return Ok(PublishOutcome::default()),
        };

        let mut outcome = PublishOutcome::default();
        for poster in snapshot {
            match poster.post(message.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(err) => {
                    outcome.failed += 1;
                    debug!(
                        audience = audience,
                        subscriber_id = %poster.id(),
                        error = %err,
                        "delivery failed"
                    );
                }
            }
        }

        Ok(outcome)
    }

    /// Subscribers registered for `audience`.
    pub fn subscriber_count(&self, audience: &str) -> usize {
        self.lock()
            .map(|r| r.get(audience).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Audiences with at least one subscriber.
    pub fn audience_count(&self) -> usize {
        self.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Total (audience, subscriber) pairs.
    pub fn registration_count(&self) -> usize {
        self.lock()
            .map(|r| r.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}
