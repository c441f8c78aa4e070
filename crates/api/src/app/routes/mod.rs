pub mod system;
pub mod websocket;
