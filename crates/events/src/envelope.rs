//! Notification envelope codec.
//!
//! Publishers emit one string per notification:
//!
//! ```text
//! <audience>,{<json-object>}
//! ```
//!
//! The audience prefix routes the notification and is never sent to
//! clients. The codec scans for the *first* `,{` and only accepts it when it
//! sits within `max_audience_len` bytes of the start, so an audience that
//! itself contains a comma still splits at the right place.

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

use pgws_core::{CorrelationId, RelayError, RelayResult};

/// Historical bound sized to a textual UUID.
pub const DEFAULT_MAX_AUDIENCE_LEN: usize = 36;

const SEPARATOR: &str = ",{";

/// A decoded notification, ready to be routed and delivered.
///
/// Serializes to `{"payload": {..}, "channel": "..", "id": ".."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    #[serde(skip)]
    audience: String,
    payload: JsonMap<String, JsonValue>,
    channel: String,
    id: CorrelationId,
}

impl Message {
    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn payload(&self) -> &JsonMap<String, JsonValue> {
        &self.payload
    }

    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Serialize the client-facing form (audience excluded).
    pub fn to_bytes(&self) -> RelayResult<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| RelayError::Encode(e.to_string()))
    }
}

/// Splits raw notification payloads into [`Message`]s.
///
/// Pure: no IO, no shared state. A fresh correlation id is minted per decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeCodec {
    max_audience_len: usize,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self {
            max_audience_len: DEFAULT_MAX_AUDIENCE_LEN,
        }
    }
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the separator-offset bound (in bytes).
    pub fn with_max_audience_len(mut self, max: usize) -> Self {
        self.max_audience_len = max;
        self
    }

    pub fn max_audience_len(&self) -> usize {
        self.max_audience_len
    }

    /// Decode one raw payload that arrived on `channel`.
    pub fn decode(&self, channel: &str, raw: &str) -> RelayResult<Message> {
        let sep = match raw.find(SEPARATOR) {
            Some(offset) if offset <= self.max_audience_len => offset,
            Some(offset) => {
                return Err(RelayError::malformed(format!(
                    "separator at offset {offset} exceeds audience bound {}",
                    self.max_audience_len
                )));
            }
            None => return Err(RelayError::malformed("missing ',{' separator")),
        };

        let payload: JsonMap<String, JsonValue> = serde_json::from_str(&raw[sep + 1..])
            .map_err(|e| RelayError::invalid_payload(e.to_string()))?;

        Ok(Message {
            audience: raw[..sep].to_string(),
            payload,
            channel: channel.to_string(),
            id: CorrelationId::new(),
        })
    }
}

/// Build the publisher-side wire form for `audience` and `payload`.
pub fn format_envelope(audience: &str, payload: &JsonMap<String, JsonValue>) -> String {
    format!("{audience},{}", JsonValue::Object(payload.clone()))
}
