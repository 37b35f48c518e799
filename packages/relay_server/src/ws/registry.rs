//! Authoritative in-memory state of rooms and their members.
//!
//! The registry pairs the forward map (room id to room) with a reverse index
//! (connection to room and index) so a disconnect locates its room in O(1)
//! instead of scanning every room. Both maps are mutated in the same step;
//! observing them out of sync is a programming bug and aborts the process.

use std::collections::HashMap;

use thiserror::Error;
use uuid::Uuid;

use relay::{DEFAULT_ROOM_SIZE, MAX_ROOM_SIZE, MIN_ROOM_SIZE};

use super::room::Room;
use super::{ConnId, RoomId};

/// A connection's current room membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    /// Room the connection is a member of.
    pub room: RoomId,
    /// The connection's current index within that room.
    pub index: usize,
}

/// Error from [`Registry::create_room`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CreateRoomError {
    /// Requested capacity is outside the admissible range.
    #[error("the room size is not valid")]
    InvalidSize,
    /// The id source produced an id that is already taken. Not retried.
    #[error("a room with that identifier already exists")]
    AlreadyExists,
    /// The connection is already a member of a room.
    #[error("the connection is already in a room")]
    AlreadyInRoom,
}

/// Error from [`Registry::join_room`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinRoomError {
    /// No room is registered under the requested id.
    #[error("the room does not exist")]
    DoesNotExist,
    /// The room's member count equals its capacity.
    #[error("the room is full")]
    IsFull,
    /// The connection is already a member of a room.
    #[error("the connection is already in a room")]
    AlreadyInRoom,
}

/// Successful join: the new member's index and the members that were already
/// present, in index order, for notification fan-out.
#[derive(Debug, PartialEq, Eq)]
pub struct Joined {
    pub index: usize,
    pub peers: Vec<ConnId>,
}

/// Disconnect reconciliation result: the departed member's former room and
/// index, and the members remaining after the removal (empty when the room
/// was destroyed).
#[derive(Debug)]
pub struct Departure {
    pub room: RoomId,
    pub index: usize,
    pub remaining: Vec<ConnId>,
}

/// Rooms keyed by id plus the reverse index from connection to membership.
///
/// Room ids come from an injected source so tests can force collisions; the
/// default source draws random UUIDs.
pub struct Registry {
    rooms: HashMap<RoomId, Room>,
    by_conn: HashMap<ConnId, Membership>,
    id_source: Box<dyn FnMut() -> RoomId + Send>,
}

impl Registry {
    /// Registry handing out random UUID room ids.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id_source(|| Uuid::new_v4().to_string())
    }

    /// Registry with a caller-provided room id source.
    pub fn with_id_source(id_source: impl FnMut() -> RoomId + Send + 'static) -> Self {
        Self {
            rooms: HashMap::new(),
            by_conn: HashMap::new(),
            id_source: Box::new(id_source),
        }
    }

    /// Create a room with `conn` as its first member and return the new id.
    ///
    /// A `size` of `None` uses the default capacity.
    ///
    /// # Errors
    ///
    /// * [`CreateRoomError::AlreadyInRoom`] if `conn` is in a room already.
    /// * [`CreateRoomError::InvalidSize`] if `size` is outside the admissible
    ///   range.
    /// * [`CreateRoomError::AlreadyExists`] if the id source collided with a
    ///   live room.
    pub fn create_room(
        &mut self,
        conn: ConnId,
        size: Option<usize>,
    ) -> Result<RoomId, CreateRoomError> {
        if self.by_conn.contains_key(&conn) {
            return Err(CreateRoomError::AlreadyInRoom);
        }

        let capacity = size.unwrap_or(DEFAULT_ROOM_SIZE);
        if !(MIN_ROOM_SIZE..=MAX_ROOM_SIZE).contains(&capacity) {
            return Err(CreateRoomError::InvalidSize);
        }

        let room_id = (self.id_source)();
        if self.rooms.contains_key(&room_id) {
            return Err(CreateRoomError::AlreadyExists);
        }

        let mut room = Room::new(capacity);
        let index = room.try_add(conn).expect("a new room cannot be full");

        self.rooms.insert(room_id.clone(), room);
        self.by_conn.insert(
            conn,
            Membership {
                room: room_id.clone(),
                index,
            },
        );

        Ok(room_id)
    }

    /// Append `conn` to the room with id `room_id`.
    ///
    /// # Errors
    ///
    /// * [`JoinRoomError::AlreadyInRoom`] if `conn` is in a room already.
    /// * [`JoinRoomError::DoesNotExist`] if no room has that id.
    /// * [`JoinRoomError::IsFull`] if the room is at capacity; the room is
    ///   left untouched.
    pub fn join_room(&mut self, conn: ConnId, room_id: &str) -> Result<Joined, JoinRoomError> {
        if self.by_conn.contains_key(&conn) {
            return Err(JoinRoomError::AlreadyInRoom);
        }

        let Some(room) = self.rooms.get_mut(room_id) else {
            return Err(JoinRoomError::DoesNotExist);
        };

        let index = room.try_add(conn).map_err(|_| JoinRoomError::IsFull)?;
        let peers = room.members()[..index].to_vec();

        self.by_conn.insert(
            conn,
            Membership {
                room: room_id.to_string(),
                index,
            },
        );

        Ok(Joined { index, peers })
    }

    /// Remove `conn` from its room, if any.
    ///
    /// Rewrites the reverse index of every member the removal shifted down
    /// and destroys the room when its last member departs. Safe to call for
    /// connections that never joined a room, and for repeated disconnects of
    /// the same connection.
    pub fn handle_disconnect(&mut self, conn: ConnId) -> Option<Departure> {
        let Membership {
            room: room_id,
            index,
        } = self.by_conn.remove(&conn)?;

        let room = self
            .rooms
            .get_mut(&room_id)
            .unwrap_or_else(|| panic!("reverse index points at missing room '{room_id}'"));

        let removed = room.remove_at(index);
        assert_eq!(
            removed, conn,
            "reverse index out of sync with room '{room_id}' at index {index}"
        );

        for (shifted_index, member) in room.members().iter().copied().enumerate().skip(index) {
            let membership = self.by_conn.get_mut(&member).unwrap_or_else(|| {
                panic!("member {member} of room '{room_id}' missing from reverse index")
            });
            membership.index = shifted_index;
        }

        let remaining = room.members().to_vec();
        if room.is_empty() {
            self.rooms.remove(&room_id);
        }

        Some(Departure {
            room: room_id,
            index,
            remaining,
        })
    }

    /// The room and index `conn` currently occupies.
    #[must_use]
    pub fn lookup(&self, conn: ConnId) -> Option<&Membership> {
        self.by_conn.get(&conn)
    }

    /// Members of `conn`'s room other than `conn` itself, in index order.
    #[must_use]
    pub fn room_members_except(&self, conn: ConnId) -> Option<Vec<ConnId>> {
        let membership = self.by_conn.get(&conn)?;

        let room = self.rooms.get(&membership.room).unwrap_or_else(|| {
            panic!("reverse index points at missing room '{}'", membership.room)
        });

        Some(room.members_except(conn))
    }

    /// The member at `index` of room `room_id`, if both exist.
    #[must_use]
    pub fn member_at(&self, room_id: &str, index: usize) -> Option<ConnId> {
        self.rooms.get(room_id).and_then(|room| room.get(index))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Registry {
    /// Check the forward map and the reverse index against each other.
    fn assert_consistent(&self) {
        for (conn, membership) in &self.by_conn {
            let room = self
                .rooms
                .get(&membership.room)
                .expect("membership names a live room");
            assert_eq!(room.get(membership.index), Some(*conn));
        }

        for (room_id, room) in &self.rooms {
            assert!(!room.is_empty(), "room '{room_id}' should have been destroyed");
            assert!(room.len() <= room.capacity());

            for (index, member) in room.members().iter().enumerate() {
                let membership = self
                    .by_conn
                    .get(member)
                    .expect("every member has a reverse index entry");
                assert_eq!(membership.room, *room_id);
                assert_eq!(membership.index, index);
            }
        }
    }
}
