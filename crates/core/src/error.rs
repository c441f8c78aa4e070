//! Relay error model.

use thiserror::Error;

/// Result type used across the relay crates.
pub type RelayResult<T> = Result<T, RelayError>;

/// Relay-level error.
///
/// Decode and delivery failures are scoped to one notification or one
/// connection and never abort the listen loop. Only `Subscribe` and
/// `Upstream` reach a caller as terminal for the operation it attempted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// The raw notification has no `,{` separator within the audience bound.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The body after the separator is not a JSON object.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// A decoded message could not be serialized for delivery.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The upstream transport rejected a channel subscription.
    #[error("subscribe to channel '{channel}' failed: {reason}")]
    Subscribe { channel: String, reason: String },

    /// Delivery to one subscriber failed.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The downstream connection transport reported an error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The upstream event source could not be established or went away.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A shared lock was poisoned by a panicking holder.
    #[error("lock poisoned: {0}")]
    Poisoned(&'static str),
}

impl RelayError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedEnvelope(msg.into())
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    pub fn subscribe(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Subscribe {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_error_names_the_channel() {
        let err = RelayError::subscribe("events", "permission denied");
        assert_eq!(
            err.to_string(),
            "subscribe to channel 'events' failed: permission denied"
        );
    }
}
