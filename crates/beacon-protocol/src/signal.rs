//! Inbound client signals.
//!
//! Signals are the messages a connected client sends to the server:
//! the identify handshake, room membership changes, and call control.
//! Negotiation payloads (offer/answer/candidate data) are opaque JSON
//! relayed verbatim between call participants.

use serde::{Deserialize, Serialize};

/// A signal sent by a client over its connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientSignal {
    /// Handshake: announce the durable user identity behind this connection.
    ///
    /// Display attributes are cached server-side so call invites can carry
    /// them without a lookup.
    #[serde(rename = "identify")]
    Identify {
        /// Durable user identity, stable across reconnects.
        user_id: String,
        /// Display name shown to call peers.
        name: String,
        /// Optional avatar reference.
        #[serde(skip_serializing_if = "Option::is_none")]
        avatar_url: Option<String>,
    },

    /// Subscribe this connection to a room.
    #[serde(rename = "join")]
    Join {
        /// Room to subscribe to.
        room_id: String,
    },

    /// Unsubscribe this connection from a room.
    #[serde(rename = "leave")]
    Leave {
        /// Room to unsubscribe from.
        room_id: String,
    },

    /// Invite another user to a call.
    #[serde(rename = "call-invite")]
    CallInvite {
        /// User identity of the callee.
        callee: String,
        /// Opaque negotiation payload for the callee.
        payload: serde_json::Value,
        /// Room the call originates from, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },

    /// Accept a pending call invite.
    #[serde(rename = "call-accept")]
    CallAccept {
        /// User identity of the caller being answered.
        caller: String,
        /// Opaque negotiation payload for the caller.
        payload: serde_json::Value,
    },

    /// Decline a pending call invite.
    #[serde(rename = "call-reject")]
    CallReject {
        /// User identity of the caller being declined.
        caller: String,
    },

    /// End a live call with a peer. Either participant may send this.
    #[serde(rename = "call-end")]
    CallEnd {
        /// User identity of the other participant.
        peer: String,
    },

    /// Relay a negotiation payload (candidate/offer/answer) to the peer.
    #[serde(rename = "call-negotiation")]
    CallNegotiation {
        /// User identity of the other participant.
        peer: String,
        /// Opaque negotiation payload, uninterpreted by the server.
        payload: serde_json::Value,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp echoed back in the pong.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ClientSignal {
    /// Short name of this signal, for logging and metrics labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientSignal::Identify { .. } => "identify",
            ClientSignal::Join { .. } => "join",
            ClientSignal::Leave { .. } => "leave",
            ClientSignal::CallInvite { .. } => "call-invite",
            ClientSignal::CallAccept { .. } => "call-accept",
            ClientSignal::CallReject { .. } => "call-reject",
            ClientSignal::CallEnd { .. } => "call-end",
            ClientSignal::CallNegotiation { .. } => "call-negotiation",
            ClientSignal::Ping { .. } => "ping",
        }
    }
}
