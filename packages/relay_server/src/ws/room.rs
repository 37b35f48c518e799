//! Fixed-capacity ordered room membership.

use thiserror::Error;

use super::ConnId;

/// Error returned when adding a member to a room at capacity.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("the room is full")]
pub struct RoomFull;

/// An ordered, capacity-bounded list of room members.
///
/// A member's index is its current position in the list. Removing a member
/// shifts every later member down by one, so any external bookkeeping keyed
/// by index must be rewritten in the same step as the removal.
#[derive(Debug)]
pub struct Room {
    capacity: usize,
    members: Vec<ConnId>,
}

impl Room {
    /// Create an empty room. Capacity is fixed for the room's lifetime.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            members: Vec::with_capacity(capacity),
        }
    }

    /// Append a member, returning its index.
    ///
    /// # Errors
    ///
    /// * Returns [`RoomFull`] if the room is at capacity.
    pub fn try_add(&mut self, conn: ConnId) -> Result<usize, RoomFull> {
        if self.members.len() >= self.capacity {
            return Err(RoomFull);
        }

        self.members.push(conn);

        Ok(self.members.len() - 1)
    }

    /// Remove the member at `index`, shifting the tail down by one, and
    /// return it.
    ///
    /// # Panics
    ///
    /// * Panics if `index` is out of bounds.
    pub fn remove_at(&mut self, index: usize) -> ConnId {
        self.members.remove(index)
    }

    /// Current members in index order.
    #[must_use]
    pub fn members(&self) -> &[ConnId] {
        &self.members
    }

    /// Current members except `conn`, in index order.
    #[must_use]
    pub fn members_except(&self, conn: ConnId) -> Vec<ConnId> {
        self.members
            .iter()
            .copied()
            .filter(|member| *member != conn)
            .collect()
    }

    /// The member at `index`, if that index exists.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<ConnId> {
        self.members.get(index).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
