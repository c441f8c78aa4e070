use bytes::Bytes;

use pgws_core::{RelayResult, SubscriberId};

/// Anything that can receive a serialized message for one subscriber.
///
/// `post` must not block on network IO: registries call it while fanning out
/// and expect the implementation to hand the bytes to its own write path.
/// An `Err` means this subscriber is finished; it is never retried.
pub trait Poster: Send + Sync {
    fn id(&self) -> SubscriberId;

    fn post(&self, message: Bytes) -> RelayResult<()>;
}
