//! Connection registry: one live connection per user identity.
//!
//! The registry resolves duplicate logins with last-writer-wins eviction
//! and protects against a stale disconnect racing a newer connection for
//! the same identity. Both maps live under a single lock so no reader ever
//! observes a half-applied admit or release.

use crate::connection::{ConnectionHandle, ConnectionId, UserId};
use beacon_protocol::ServerEvent;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct RegistryInner {
    by_user: HashMap<UserId, ConnectionHandle>,
    by_conn: HashMap<ConnectionId, UserId>,
}

/// Maps user identities to their single live connection.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `handle` as the live connection for its user identity.
    ///
    /// Any previously registered connection for the same identity is
    /// evicted: it receives a `session-replaced` close signal before the
    /// new mapping becomes visible to [`resolve`](Self::resolve). Returns
    /// the evicted handle, if any.
    pub fn admit(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let evicted = inner.by_user.remove(&handle.user);
        if let Some(ref old) = evicted {
            // Close signal first; the mapping swap happens under the same
            // write lock, so resolve() never sees both connections live.
            old.send(ServerEvent::SessionReplaced {});
            inner.by_conn.remove(&old.id);
            debug!(user = %handle.user, evicted = %old.id, "Evicting duplicate session");
        }

        inner.by_conn.insert(handle.id.clone(), handle.user.clone());
        debug!(user = %handle.user, connection = %handle.id, "Connection admitted");
        inner.by_user.insert(handle.user.clone(), handle);

        evicted
    }

    /// Look up the live connection for a user identity.
    ///
    /// `None` means the user is offline. That is a normal outcome, not a
    /// fault.
    #[must_use]
    pub fn resolve(&self, user: &str) -> Option<ConnectionHandle> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_user.get(user).cloned()
    }

    /// Remove the registry entry for `connection_id`.
    ///
    /// The entry is removed only if this connection is still the one on
    /// record for its identity; a late release from a superseded session is
    /// a no-op. Returns the identity that was released, if any.
    pub fn release(&self, connection_id: &ConnectionId) -> Option<UserId> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let user = inner.by_conn.remove(connection_id)?;
        // by_conn is pruned on eviction, so reaching here means this
        // connection is still the one on record.
        inner.by_user.remove(&user);
        debug!(user = %user, connection = %connection_id, "Connection released");
        Some(user)
    }

    /// Number of registered identities.
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_user.len()
    }

    /// Check whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
