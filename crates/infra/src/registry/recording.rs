//! Recording poster for tests/dev.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;

use pgws_core::{RelayError, RelayResult, SubscriberId};

use super::poster::Poster;

/// Poster that keeps every message it was handed.
///
/// A failing recorder counts attempts but never stores anything.
#[derive(Debug)]
pub struct RecordingPoster {
    id: SubscriberId,
    failing: bool,
    attempts: AtomicUsize,
    deliveries: Mutex<Vec<Bytes>>,
}

impl RecordingPoster {
    pub fn new() -> Self {
        Self::build(false)
    }

    /// A poster whose every delivery fails.
    pub fn failing() -> Self {
        Self::build(true)
    }

    fn build(failing: bool) -> Self {
        Self {
            id: SubscriberId::new(),
            failing,
            attempts: AtomicUsize::new(0),
            deliveries: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn deliveries(&self) -> Vec<Bytes> {
        self.deliveries
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

impl Default for RecordingPoster {
    fn default() -> Self {
        Self::new()
    }
}

impl Poster for RecordingPoster {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn post(&self, message: Bytes) -> RelayResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(RelayError::delivery("recording poster configured to fail"));
        }

        self.deliveries
            .lock()
            .map_err(|_| RelayError::Poisoned("recording poster"))?
            .push(message);
        Ok(())
    }
}
