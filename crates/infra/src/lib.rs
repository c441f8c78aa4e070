//! Relay infrastructure: routing, subscriber lifecycle, upstream adapters, config.

pub mod channel_manager;
pub mod config;
pub mod registry;
pub mod relay;
pub mod subscriber;
pub mod upstream;
pub mod workers;


pub use channel_manager::{ChannelManager, ChannelStats};
pub use config::{AudienceSource, ConfigError, RelayConfig, UpstreamKind};
pub use registry::{AudienceRegistry, Poster, PublishOutcome, RecordingPoster};
pub use relay::Relay;
pub use subscriber::{CloseReason, Connection, Inbound, InboundHalf, OutboundHalf, SessionSummary};
pub use upstream::{PgUpstream, PgUpstreamConfig};
pub use workers::{ListenLoop, ListenLoopHandle, ListenSnapshot, ListenStats};
