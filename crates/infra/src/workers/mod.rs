//! Background workers.

mod listen_loop;

pub use listen_loop::{ListenLoop, ListenLoopHandle, ListenSnapshot, ListenStats};
