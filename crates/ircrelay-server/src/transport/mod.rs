//! Concrete transports: the upstream IRC socket and the browser-facing
//! WebSocket listener.

pub mod irc;
pub mod websocket;
