//! WebSocket relay: upgrade endpoint, per-connection handling, and the room
//! registry server.

pub mod api;
pub mod handler;
pub mod registry;
pub mod room;
pub mod server;

use bytes::Bytes;

/// Connection ID.
pub type ConnId = usize;

/// Room ID.
pub type RoomId = String;

/// Frame sent to a client.
#[derive(Debug, Clone)]
pub enum Msg {
    /// Control-plane JSON frame.
    Text(String),
    /// Data-plane frame; byte 0 carries the sending member's index.
    Binary(Bytes),
}
