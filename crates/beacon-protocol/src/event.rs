//! Outbound server events.
//!
//! Events are the messages the server pushes to connected clients. Some are
//! produced by the core itself (handshake, call relay); the `notify` variant
//! carries application events produced by external collaborators (message
//! persistence, room administration) and merely routed through the
//! broadcast engine.

use serde::{Deserialize, Serialize};

/// An event delivered to a client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Handshake acknowledgment.
    #[serde(rename = "connected")]
    Connected {
        /// Server-assigned connection identifier.
        connection_id: String,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat_ms: u32,
    },

    /// Confirmation that a join signal was applied.
    #[serde(rename = "joined")]
    Joined {
        /// Room the connection is now subscribed to.
        room_id: String,
    },

    /// A call invite addressed to this connection.
    #[serde(rename = "incoming-call")]
    IncomingCall {
        /// User identity of the caller.
        caller: String,
        /// Caller display name, cached at handshake.
        caller_name: String,
        /// Caller avatar reference, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        caller_avatar: Option<String>,
        /// Opaque negotiation payload from the caller.
        payload: serde_json::Value,
        /// Room the call originates from, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },

    /// The callee accepted; carries their negotiation payload.
    #[serde(rename = "call-accepted")]
    CallAccepted {
        /// Opaque negotiation payload from the callee.
        payload: serde_json::Value,
    },

    /// The callee declined the invite.
    #[serde(rename = "call-rejected")]
    CallRejected {},

    /// The other participant ended the call.
    #[serde(rename = "call-ended")]
    CallEnded {},

    /// A call operation failed; the session (if any) was destroyed.
    #[serde(rename = "call-failed")]
    CallFailed {
        /// Human-readable failure reason.
        reason: String,
    },

    /// Negotiation payload relayed from the other participant.
    #[serde(rename = "call-negotiation")]
    CallNegotiation {
        /// User identity the payload came from.
        peer: String,
        /// Opaque negotiation payload.
        payload: serde_json::Value,
    },

    /// Application event routed from an external collaborator.
    ///
    /// `event` names the application-level kind (`message-received`,
    /// `message-deleted`, `member-kicked`, `room-deleted`, `typing`,
    /// `stop-typing`); the payload is produced upstream and not interpreted
    /// here.
    #[serde(rename = "notify")]
    Notify {
        /// Application event name.
        event: String,
        /// Collaborator-produced payload.
        payload: serde_json::Value,
    },

    /// Close signal: a newer connection claimed this user identity.
    ///
    /// The receiving connection is about to be terminated.
    #[serde(rename = "session-replaced")]
    SessionReplaced {},

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Timestamp echoed from the ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ServerEvent {
    /// Create a `notify` event for collaborator payloads.
    #[must_use]
    pub fn notify(event: impl Into<String>, payload: serde_json::Value) -> Self {
        ServerEvent::Notify {
            event: event.into(),
            payload,
        }
    }

    /// Create a `call-failed` event.
    #[must_use]
    pub fn call_failed(reason: impl Into<String>) -> Self {
        ServerEvent::CallFailed {
            reason: reason.into(),
        }
    }

    /// Short name of this event, for logging and metrics labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::Joined { .. } => "joined",
            ServerEvent::IncomingCall { .. } => "incoming-call",
            ServerEvent::CallAccepted { .. } => "call-accepted",
            ServerEvent::CallRejected {} => "call-rejected",
            ServerEvent::CallEnded {} => "call-ended",
            ServerEvent::CallFailed { .. } => "call-failed",
            ServerEvent::CallNegotiation { .. } => "call-negotiation",
            ServerEvent::Notify { .. } => "notify",
            ServerEvent::SessionReplaced {} => "session-replaced",
            ServerEvent::Pong { .. } => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_tag_names() {
        let event = ServerEvent::notify("message-received", json!({"text": "hi"}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "notify");
        assert_eq!(value["event"], "message-received");

        let event = ServerEvent::CallRejected {};
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "call-rejected");
    }

    #[test]
    fn test_call_failed_helper() {
        let event = ServerEvent::call_failed("callee is offline");
        assert_eq!(event.name(), "call-failed");
        match event {
            ServerEvent::CallFailed { reason } => assert_eq!(reason, "callee is offline"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
