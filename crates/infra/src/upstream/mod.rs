//! Upstream transport adapters.

mod backoff;
mod postgres;

pub use backoff::ReconnectBackoff;
pub use postgres::{DEFAULT_MAX_RECONNECT, DEFAULT_MIN_RECONNECT, PgUpstream, PgUpstreamConfig};
