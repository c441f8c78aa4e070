//! Upstream notifications: the envelope codec and the event-source boundary.

pub mod envelope;
pub mod in_memory;
pub mod upstream;

pub use envelope::{DEFAULT_MAX_AUDIENCE_LEN, EnvelopeCodec, Message, format_envelope};
pub use in_memory::InMemoryUpstream;
pub use upstream::{ChannelListener, Notification, NotificationSource, UpstreamEvent};
