//! `pgws-core` — shared building blocks for the notification relay.
//!
//! Error taxonomy and strongly-typed identifiers. No IO lives here.

pub mod error;
pub mod id;

pub use error::{RelayError, RelayResult};
pub use id::{CorrelationId, SubscriberId};
