//! Connection handles.
//!
//! A [`ConnectionHandle`] is the core's view of one live transport session:
//! the server-assigned connection id, the user identity announced at
//! handshake, cached display attributes, and the outbox used to push events
//! to the connection's writer task.

use beacon_protocol::ServerEvent;
use std::fmt;
use tokio::sync::mpsc;

/// Durable user identity, stable across reconnects.
pub type UserId = String;

/// A unique identifier for one transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a connection ID from an existing value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Self(format!("conn_{:x}", timestamp))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Display attributes cached at handshake time, so call invites can carry
/// them without a lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayAttrs {
    /// Display name.
    pub name: String,
    /// Avatar reference, if any.
    pub avatar_url: Option<String>,
}

impl DisplayAttrs {
    /// Create display attributes.
    #[must_use]
    pub fn new(name: impl Into<String>, avatar_url: Option<String>) -> Self {
        Self {
            name: name.into(),
            avatar_url,
        }
    }
}

/// Handle to one live, identified connection.
///
/// Cloning is cheap; all clones push into the same outbox.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Server-assigned connection identifier.
    pub id: ConnectionId,
    /// User identity announced at handshake.
    pub user: UserId,
    /// Display attributes cached at handshake.
    pub display: DisplayAttrs,
    /// Outbound event queue consumed by the connection's writer task.
    outbox: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    /// Create a handle for a connection.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        user: impl Into<UserId>,
        display: DisplayAttrs,
        outbox: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            id,
            user: user.into(),
            display,
            outbox,
        }
    }

    /// Queue an event for delivery to this connection.
    ///
    /// Returns `false` if the connection's writer task has already gone
    /// away; the event is dropped, which is the intended at-most-once
    /// behavior for disconnected recipients.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.outbox.send(event).is_ok()
    }
}
