//! Room membership index.
//!
//! Tracks which connections are subscribed to which rooms. This is a
//! *presence* subscription derived from join/leave signals, independent of
//! any persisted room-membership record; authorization happens in the
//! collaborator that accepts the join request before signaling it here.

use crate::connection::ConnectionId;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;

/// A room identifier.
pub type RoomId = String;

/// Maximum room id length.
pub const MAX_ROOM_ID_LENGTH: usize = 256;

/// Room index errors.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Invalid room identifier.
    #[error("Invalid room id: {0}")]
    InvalidRoom(&'static str),

    /// Maximum subscriptions for this connection reached.
    #[error("Maximum room subscriptions reached")]
    MaxSubscriptionsReached,
}

/// Validate a room identifier.
///
/// # Errors
///
/// Returns an error message if the room id is invalid.
pub fn validate_room_id(room_id: &str) -> Result<(), &'static str> {
    if room_id.is_empty() {
        return Err("Room id cannot be empty");
    }
    if room_id.len() > MAX_ROOM_ID_LENGTH {
        return Err("Room id too long");
    }
    if !room_id.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room id contains invalid characters");
    }
    Ok(())
}

#[derive(Default)]
struct RoomsInner {
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
    by_conn: HashMap<ConnectionId, HashSet<RoomId>>,
}

/// In-memory mapping of room -> set of subscribed connections.
pub struct RoomIndex {
    inner: RwLock<RoomsInner>,
    max_rooms_per_connection: usize,
}

impl RoomIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new(max_rooms_per_connection: usize) -> Self {
        Self {
            inner: RwLock::new(RoomsInner::default()),
            max_rooms_per_connection,
        }
    }

    /// Subscribe a connection to a room. Idempotent.
    ///
    /// Returns `true` if the subscription is new.
    ///
    /// # Errors
    ///
    /// Returns an error if the room id is invalid or the connection is at
    /// its subscription limit.
    pub fn subscribe(
        &self,
        room_id: &str,
        connection_id: &ConnectionId,
    ) -> Result<bool, RoomError> {
        validate_room_id(room_id).map_err(RoomError::InvalidRoom)?;

        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let inner = &mut *guard;

        let subs = inner.by_conn.entry(connection_id.clone()).or_default();
        if subs.contains(room_id) {
            return Ok(false);
        }
        if subs.len() >= self.max_rooms_per_connection {
            return Err(RoomError::MaxSubscriptionsReached);
        }
        subs.insert(room_id.to_string());

        inner
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id.clone());

        debug!(room = %room_id, connection = %connection_id, "Subscribed");
        Ok(true)
    }

    /// Unsubscribe a connection from a room. Idempotent.
    ///
    /// Returns `true` if the connection was subscribed. Empty rooms are
    /// removed from the index.
    pub fn unsubscribe(&self, room_id: &str, connection_id: &ConnectionId) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let removed = match inner.rooms.get_mut(room_id) {
            Some(members) => members.remove(connection_id),
            None => false,
        };
        if !removed {
            return false;
        }

        if inner.rooms.get(room_id).is_some_and(HashSet::is_empty) {
            inner.rooms.remove(room_id);
            debug!(room = %room_id, "Removed empty room");
        }
        if let Some(subs) = inner.by_conn.get_mut(connection_id) {
            subs.remove(room_id);
            if subs.is_empty() {
                inner.by_conn.remove(connection_id);
            }
        }

        debug!(room = %room_id, connection = %connection_id, "Unsubscribed");
        true
    }

    /// Snapshot of the connections subscribed to a room at call time.
    ///
    /// Concurrent subscribe/unsubscribe calls may invalidate the snapshot
    /// immediately; callers must treat it as point-in-time only.
    #[must_use]
    pub fn members_of(&self, room_id: &str) -> Vec<ConnectionId> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .rooms
            .get(room_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Unsubscribe a connection from every room it was in.
    ///
    /// Invoked on connection release so no subscription outlives its
    /// connection. Returns the rooms it was removed from.
    pub fn drop_connection(&self, connection_id: &ConnectionId) -> Vec<RoomId> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let Some(rooms) = inner.by_conn.remove(connection_id) else {
            return Vec::new();
        };

        for room_id in &rooms {
            if let Some(members) = inner.rooms.get_mut(room_id) {
                members.remove(connection_id);
                if members.is_empty() {
                    inner.rooms.remove(room_id);
                }
            }
        }

        debug!(connection = %connection_id, rooms = rooms.len(), "Dropped all subscriptions");
        rooms.into_iter().collect()
    }

    /// Rooms a connection is currently subscribed to.
    #[must_use]
    pub fn rooms_of(&self, connection_id: &ConnectionId) -> Vec<RoomId> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .by_conn
            .get(connection_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of rooms with at least one subscriber.
    #[must_use]
    pub fn room_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.rooms.len()
    }

    /// Total number of subscriptions across all rooms.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_conn.values().map(HashSet::len).sum()
    }
}

impl Default for RoomIndex {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_idempotent() {
        let index = RoomIndex::default();
        let conn = ConnectionId::from("c1");

        assert!(index.subscribe("r1", &conn).unwrap());
        assert!(!index.subscribe("r1", &conn).unwrap());
        assert_eq!(index.members_of("r1"), vec![conn.clone()]);
        assert_eq!(index.subscription_count(), 1);
    }

    #[test]
    fn test_unsubscribe_idempotent() {
        let index = RoomIndex::default();
        let conn = ConnectionId::from("c1");

        index.subscribe("r1", &conn).unwrap();
        assert!(index.unsubscribe("r1", &conn));
        assert!(!index.unsubscribe("r1", &conn));
        // Empty room is gone from the index.
        assert_eq!(index.room_count(), 0);
    }

    #[test]
    fn test_unsubscribe_non_member() {
        let index = RoomIndex::default();
        assert!(!index.unsubscribe("r1", &ConnectionId::from("ghost")));
    }

    #[test]
    fn test_drop_connection_clears_all_rooms() {
        let index = RoomIndex::default();
        let c1 = ConnectionId::from("c1");
        let c2 = ConnectionId::from("c2");

        index.subscribe("r1", &c1).unwrap();
        index.subscribe("r2", &c1).unwrap();
        index.subscribe("r1", &c2).unwrap();

        let mut dropped = index.drop_connection(&c1);
        dropped.sort();
        assert_eq!(dropped, vec!["r1".to_string(), "r2".to_string()]);

        assert!(!index.members_of("r1").contains(&c1));
        assert_eq!(index.members_of("r1"), vec![c2]);
        assert_eq!(index.room_count(), 1);
        assert!(index.rooms_of(&c1).is_empty());
    }

    #[test]
    fn test_room_id_validation() {
        let index = RoomIndex::default();
        let conn = ConnectionId::from("c1");

        assert!(matches!(
            index.subscribe("", &conn),
            Err(RoomError::InvalidRoom(_))
        ));

        let long = "r".repeat(MAX_ROOM_ID_LENGTH + 1);
        assert!(matches!(
            index.subscribe(&long, &conn),
            Err(RoomError::InvalidRoom(_))
        ));

        assert!(validate_room_id("room:42").is_ok());
    }

    #[test]
    fn test_subscription_limit() {
        let index = RoomIndex::new(2);
        let conn = ConnectionId::from("c1");

        index.subscribe("r1", &conn).unwrap();
        index.subscribe("r2", &conn).unwrap();
        assert!(matches!(
            index.subscribe("r3", &conn),
            Err(RoomError::MaxSubscriptionsReached)
        ));

        // Re-subscribing an existing room stays a no-op, not a limit error.
        assert!(!index.subscribe("r1", &conn).unwrap());
    }
}
