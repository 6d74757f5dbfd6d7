//! Stream Transport Adapters
//!
//! WebSocket implementation of the persistent channel port.

mod websocket;

pub use websocket::{WebSocketChannel, WebSocketTransport};
