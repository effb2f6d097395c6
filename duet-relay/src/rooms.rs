//! Room store for the relay server.
//!
//! Tracks which connections belong to which rooms. A room holds at most two
//! members and is deleted the moment its last member leaves. All mutations
//! run under one lock so check-then-mutate sequences (join admission, leave
//! fan-out) are atomic with respect to each other. The store does no I/O;
//! callers notify peers with the identifiers it returns.
//!
//! Room entries are ephemeral, lost on relay restart like the connection
//! registry.

use std::collections::{BTreeSet, HashMap};

use duet_proto::{ConnectionId, RoomId};
use parking_lot::Mutex;

/// Maximum number of members in one room.
pub const ROOM_CAPACITY: usize = 2;

/// Default maximum number of live rooms.
pub const DEFAULT_MAX_ROOMS: usize = 1000;

/// Errors that can occur during room store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// A live room already uses this identifier.
    #[error("Room already exists")]
    RoomAlreadyExists,
    /// No live room uses this identifier.
    #[error("Room does not exist")]
    RoomNotFound,
    /// The room already has two members.
    #[error("Room is full")]
    RoomFull,
    /// The joiner is already the room's member.
    #[error("Already a member of this room")]
    AlreadyMember,
    /// The identifier is empty or too long.
    #[error("Invalid room id")]
    InvalidRoomId,
    /// The store holds its maximum number of rooms.
    #[error("Room limit reached (max {0} rooms)")]
    CapacityReached(usize),
}

/// Pairing state of a live room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Only the creator is present.
    Created,
    /// Both participants are present.
    Paired,
}

/// A room that `leave` removed a connection from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// The room that was left.
    pub room_id: RoomId,
    /// The member still in the room, or `None` if the room was deleted.
    pub remaining: Option<ConnectionId>,
}

#[derive(Debug)]
struct Room {
    /// Creator first, joiner second.
    members: Vec<ConnectionId>,
}

impl Room {
    fn new(creator: ConnectionId) -> Self {
        let mut members = Vec::with_capacity(ROOM_CAPACITY);
        members.push(creator);
        Self { members }
    }

    fn state(&self) -> RoomState {
        if self.members.len() < ROOM_CAPACITY {
            RoomState::Created
        } else {
            RoomState::Paired
        }
    }
}

#[derive(Debug, Default)]
struct Rooms {
    rooms: HashMap<RoomId, Room>,
    /// Reverse index: every room each connection is a member of.
    memberships: HashMap<ConnectionId, BTreeSet<RoomId>>,
}

impl Rooms {
    fn add_membership(&mut self, conn_id: ConnectionId, room_id: &RoomId) {
        self.memberships
            .entry(conn_id)
            .or_default()
            .insert(room_id.clone());
    }
}

/// In-memory room directory with two-member admission control.
pub struct RoomStore {
    inner: Mutex<Rooms>,
    max_rooms: usize,
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomStore {
    /// Creates a new, empty room store with the default room limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_rooms(DEFAULT_MAX_ROOMS)
    }

    /// Creates a new, empty room store holding at most `max_rooms` live rooms.
    #[must_use]
    pub fn with_max_rooms(max_rooms: usize) -> Self {
        Self {
            inner: Mutex::new(Rooms::default()),
            max_rooms,
        }
    }

    /// Creates a room with `creator` as its only member.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::InvalidRoomId`], [`RoomError::RoomAlreadyExists`]
    /// or [`RoomError::CapacityReached`]. Nothing changes on error.
    pub fn create_room(&self, room_id: &RoomId, creator: ConnectionId) -> Result<(), RoomError> {
        if !room_id.is_valid() {
            return Err(RoomError::InvalidRoomId);
        }

        let mut inner = self.inner.lock();
        if inner.rooms.contains_key(room_id) {
            return Err(RoomError::RoomAlreadyExists);
        }
        if inner.rooms.len() >= self.max_rooms {
            return Err(RoomError::CapacityReached(self.max_rooms));
        }

        inner.rooms.insert(room_id.clone(), Room::new(creator));
        inner.add_membership(creator, room_id);
        drop(inner);

        Ok(())
    }

    /// Adds `joiner` to a room that has exactly one member and returns that
    /// member's identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::RoomNotFound`], [`RoomError::RoomFull`],
    /// [`RoomError::AlreadyMember`] or [`RoomError::InvalidRoomId`]. Nothing
    /// changes on error.
    pub fn join_room(&self, room_id: &RoomId, joiner: ConnectionId) -> Result<ConnectionId, RoomError> {
        self.join_room_with(room_id, joiner, |_| {})
    }

    /// Like [`RoomStore::join_room`], but runs `on_paired` with the creator's
    /// identifier before the lock is released.
    ///
    /// `on_paired` must not block or touch the store. Notifications queued
    /// from it are ordered before any `leave` that follows the join.
    ///
    /// # Errors
    ///
    /// Same as [`RoomStore::join_room`]; `on_paired` is not called on error.
    pub fn join_room_with<F>(
        &self,
        room_id: &RoomId,
        joiner: ConnectionId,
        on_paired: F,
    ) -> Result<ConnectionId, RoomError>
    where
        F: FnOnce(ConnectionId),
    {
        if !room_id.is_valid() {
            return Err(RoomError::InvalidRoomId);
        }

        let mut inner = self.inner.lock();
        let room = inner.rooms.get_mut(room_id).ok_or(RoomError::RoomNotFound)?;
        let creator = match room.members.as_slice() {
            [only] if *only == joiner => return Err(RoomError::AlreadyMember),
            [only] => *only,
            _ => return Err(RoomError::RoomFull),
        };

        room.members.push(joiner);
        inner.add_membership(joiner, room_id);
        on_paired(creator);
        drop(inner);

        Ok(creator)
    }

    /// Removes `conn_id` from every room it belongs to.
    ///
    /// Rooms left empty are deleted. Returns one [`Departure`] per room the
    /// connection was in; calling it again for the same connection returns
    /// an empty list.
    pub fn leave(&self, conn_id: ConnectionId) -> Vec<Departure> {
        self.leave_with(conn_id, |_| {})
    }

    /// Like [`RoomStore::leave`], but runs `on_departure` for each room
    /// before the lock is released.
    ///
    /// `on_departure` must not block or touch the store.
    pub fn leave_with<F>(&self, conn_id: ConnectionId, mut on_departure: F) -> Vec<Departure>
    where
        F: FnMut(&Departure),
    {
        let mut inner = self.inner.lock();
        let Some(room_ids) = inner.memberships.remove(&conn_id) else {
            return Vec::new();
        };

        let mut departures = Vec::with_capacity(room_ids.len());
        for room_id in room_ids {
            let Some(room) = inner.rooms.get_mut(&room_id) else {
                continue;
            };
            room.members.retain(|m| *m != conn_id);
            let remaining = room.members.first().copied();
            if remaining.is_none() {
                inner.rooms.remove(&room_id);
            }
            let departure = Departure { room_id, remaining };
            on_departure(&departure);
            departures.push(departure);
        }
        drop(inner);

        departures
    }

    /// Members of a room in join order, or `None` if the room does not exist.
    pub fn members(&self, room_id: &RoomId) -> Option<Vec<ConnectionId>> {
        self.inner
            .lock()
            .rooms
            .get(room_id)
            .map(|room| room.members.clone())
    }

    /// Members of a room other than `sender`, or `None` if the room does not
    /// exist.
    pub fn others(&self, room_id: &RoomId, sender: ConnectionId) -> Option<Vec<ConnectionId>> {
        self.inner.lock().rooms.get(room_id).map(|room| {
            room.members
                .iter()
                .copied()
                .filter(|m| *m != sender)
                .collect()
        })
    }

    /// Pairing state of a room, or `None` if the room does not exist.
    pub fn state(&self, room_id: &RoomId) -> Option<RoomState> {
        self.inner.lock().rooms.get(room_id).map(Room::state)
    }

    /// Rooms the connection currently belongs to, in identifier order.
    pub fn rooms_of(&self, conn_id: ConnectionId) -> Vec<RoomId> {
        self.inner
            .lock()
            .memberships
            .get(&conn_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether a room with this identifier is live.
    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.inner.lock().rooms.contains_key(room_id)
    }

    /// Number of live rooms.
    pub fn len(&self) -> usize {
        self.inner.lock().rooms.len()
    }

    /// Whether there are no live rooms.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().rooms.is_empty()
    }
}
