//! HTTP surface: websocket endpoint, health/stats routes, service wiring.

pub mod app;
pub mod audience;
pub mod ws;
