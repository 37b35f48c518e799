//! Wire contract for the bounded-room binary relay.
//!
//! This crate defines the protocol spoken between relay clients and the relay
//! server: the JSON control plane that creates and joins rooms, and the
//! one-byte routing header that drives the binary data plane. It contains no
//! I/O; the server and any native client share these types.
//!
//! # Main Components
//!
//! * [`RequestPacket`] - Tagged enum for inbound control requests
//! * [`ResponsePacket`] - Tagged enum for outbound control responses
//! * [`ErrorMessage`] - Error codes carried by [`ResponsePacket::Error`]
//! * [`RouteTarget`] - Decoded routing header of a binary frame
//!
//! # Binary frames
//!
//! Byte 0 of a client-sent binary frame addresses the frame: [`BROADCAST_INDEX`]
//! fans the frame out to every other room member, any other value unicasts to
//! the member at that index. The relay rewrites byte 0 of every delivered
//! frame with the sender's own index; bytes 1.. are opaque payload.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Index byte that addresses every other member of the room.
pub const BROADCAST_INDEX: u8 = u8::MAX;

/// Smallest admissible room capacity.
pub const MIN_ROOM_SIZE: usize = 1;

/// Largest admissible room capacity. Capped one below the broadcast byte so a
/// member index can never be mistaken for a broadcast.
pub const MAX_ROOM_SIZE: usize = 254;

/// Capacity used when a `create` request carries no explicit size.
pub const DEFAULT_ROOM_SIZE: usize = 2;

/// Control request sent by a client.
///
/// Anything that fails to parse as one of these variants is not answered; the
/// relay drops such frames without a response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RequestPacket {
    /// Open a new room with the sender as its first member.
    Create {
        /// Requested capacity; defaults to [`DEFAULT_ROOM_SIZE`].
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<usize>,
    },
    /// Enter the room with the given id.
    Join {
        /// Id previously returned by a `create` acknowledgement.
        id: String,
    },
}

/// Control response sent by the relay.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResponsePacket {
    /// Join acknowledgement and notification.
    ///
    /// Sent with `size` (the number of members already present) to the joiner
    /// itself, and without `size` to every prior member.
    Join {
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<usize>,
    },
    /// Acknowledges a `create` with the new room's id.
    Create { id: String },
    /// A member left; `index` is the position it held just before removal.
    /// Members behind it have shifted down by one.
    Leave { index: usize },
    /// A control request was rejected.
    Error { message: ErrorMessage },
}

/// Error codes carried by [`ResponsePacket::Error`], serialized as their bare
/// PascalCase names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorMessage {
    /// `create` asked for a capacity outside `1..=254`.
    InvalidSize,
    /// The generated room id collided with a live room.
    AlreadyExists,
    /// `join` named a room that is not registered.
    DoesNotExist,
    /// The target room is at capacity.
    IsFull,
}

impl fmt::Display for ErrorMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Routing target decoded from the first byte of a binary frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    /// Deliver to every other member of the sender's room.
    Broadcast,
    /// Deliver to the member at this index, if one exists. Sending to one's
    /// own index is permitted.
    Member(u8),
}

impl RouteTarget {
    /// Decode the leading index byte of a binary frame.
    #[must_use]
    pub const fn from_index_byte(byte: u8) -> Self {
        if byte == BROADCAST_INDEX {
            Self::Broadcast
        } else {
            Self::Member(byte)
        }
    }
}
