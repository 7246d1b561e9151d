//! Rooms: broadcast groups of WebSocket connections.
//!
//! A [`Room`] is a set of connections used as a broadcast target. Rooms
//! are created through the [`RoomRegistry`], receive sequential ids, and
//! live for the rest of the process — the registry is append-only.
//!
//! Membership follows set semantics: [`Room::join`] is idempotent (a
//! connection is a member at most once, re-joining moves it to the back)
//! and [`Room::leave`] is a no-op for non-members. Each room guards its
//! member list with its own lock; the registry's room list has a
//! separate lock and is only ever appended to.
//!
//! # Examples
//!
//! ```
//! use webforge_core::websocket::room::RoomRegistry;
//!
//! let rooms = RoomRegistry::new();
//! let lobby = rooms.create();
//! assert_eq!(lobby.id(), 0);
//! assert_eq!(rooms.create().id(), 1);
//! ```

use crate::websocket::connection::{ConnectionId, WsConnection};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A broadcast group of connections.
#[derive(Debug)]
pub struct Room {
    id: usize,
    members: Mutex<Vec<WsConnection>>,
}

impl Room {
    fn new(id: usize) -> Self {
        Self {
            id,
            members: Mutex::new(Vec::new()),
        }
    }

    /// This room's registry id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of member connections.
    pub fn len(&self) -> usize {
        lock(&self.members).len()
    }

    /// True when the room has no members.
    pub fn is_empty(&self) -> bool {
        lock(&self.members).is_empty()
    }

    /// Adds a connection to the room.
    ///
    /// Idempotent: an existing membership is replaced, never duplicated.
    pub fn join(&self, conn: &WsConnection) {
        let mut members = lock(&self.members);
        members.retain(|c| c.id() != conn.id());
        members.push(conn.clone());
    }

    /// Removes a connection from the room. No-op for non-members.
    pub fn leave(&self, conn: &WsConnection) {
        self.remove_id(conn.id());
    }

    pub(crate) fn remove_id(&self, id: ConnectionId) {
        lock(&self.members).retain(|c| c.id() != id);
    }

    /// True when the connection is currently a member.
    pub fn contains(&self, conn: &WsConnection) -> bool {
        lock(&self.members).iter().any(|c| c.id() == conn.id())
    }

    /// Snapshot of the current members, for iteration outside the lock.
    pub fn members(&self) -> Vec<WsConnection> {
        lock(&self.members).clone()
    }
}

/// The append-only list of all rooms.
///
/// Room ids are indexes into this list; rooms are never removed.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<Vec<Arc<Room>>>,
}

impl RoomRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a room and assigns it the next sequential id.
    pub fn create(&self) -> Arc<Room> {
        let mut rooms = self
            .rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let room = Arc::new(Room::new(rooms.len()));
        rooms.push(room.clone());
        room
    }

    /// Looks up a room by id.
    pub fn get(&self, id: usize) -> Option<Arc<Room>> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Number of rooms ever created.
    pub fn count(&self) -> usize {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drops a disconnecting connection from every room.
    pub(crate) fn remove_everywhere(&self, id: ConnectionId) {
        let rooms: Vec<Arc<Room>> = self
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for room in rooms {
            room.remove_id(id);
        }
    }
}
