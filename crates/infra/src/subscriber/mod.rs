//! Subscriber lifecycle: one live downstream connection.
//!
//! ```text
//! connecting ──register──► active ──close signal──► closing ──teardown──► closed
//! ```
//!
//! A session owns two tasks: the serving task (drains the outbound queue and
//! writes) and the inbound read-observer (exists only to notice the peer going
//! away). Either of them, a failed `post`, or process shutdown may fire the
//! [`CloseLatch`]; the first reason wins and teardown runs once, in the serving
//! task.

mod connection;
mod latch;
mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{Connection, Inbound, InboundHalf, OutboundHalf};
pub use latch::{CloseLatch, CloseReason};
pub use session::{DEFAULT_OUTBOUND_QUEUE, SessionSummary, SubscriberSession, SubscriberState};
