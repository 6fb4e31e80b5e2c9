//! Call session table and state machine.
//!
//! Each in-flight call attempt is keyed by the ordered (caller, callee)
//! pair and moves through `invited -> {accepted, rejected, ended, failed}`.
//! Terminal states remove the session; nothing here is persisted. A single
//! mutex guards the table so the single-flight invariant (at most one live
//! session per ordered pair) holds under concurrent invites.

use crate::connection::UserId;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

/// Call signaling errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallError {
    /// The callee has no live connection.
    #[error("callee is offline")]
    CalleeOffline,

    /// A live session already exists for this (caller, callee) pair.
    #[error("a call is already in progress")]
    AlreadyInCall,

    /// No live session exists for this pair. Routinely caused by duplicate
    /// client retries; callers treat it as a silent no-op.
    #[error("no live call session for this pair")]
    UnknownSession,

    /// The peer's connection vanished mid-relay; the session was destroyed.
    #[error("peer is no longer reachable")]
    PeerUnreachable,
}

/// Live (non-terminal) call session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Invite relayed to the callee, awaiting their answer.
    Invited,
    /// Callee accepted; negotiation traffic flows both ways.
    Accepted,
}

/// One in-flight call attempt between two user identities.
#[derive(Debug, Clone)]
pub struct CallSession {
    /// User identity that initiated the call.
    pub caller: UserId,
    /// User identity being called.
    pub callee: UserId,
    /// Current state.
    pub state: CallState,
}

/// Table of live call sessions, keyed by ordered (caller, callee).
#[derive(Default)]
pub struct CallTable {
    sessions: Mutex<HashMap<(UserId, UserId), CallSession>>,
}

impl CallTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session in the `invited` state.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::AlreadyInCall`] if a live session already
    /// exists for this ordered pair.
    pub fn begin(&self, caller: &str, callee: &str) -> Result<(), CallError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let key = (caller.to_string(), callee.to_string());

        if sessions.contains_key(&key) {
            return Err(CallError::AlreadyInCall);
        }

        sessions.insert(
            key,
            CallSession {
                caller: caller.to_string(),
                callee: callee.to_string(),
                state: CallState::Invited,
            },
        );
        debug!(caller = %caller, callee = %callee, "Call session created");
        Ok(())
    }

    /// Transition `invited -> accepted`.
    ///
    /// Returns `false` if no session exists for the pair or it is not in
    /// the `invited` state. Only the designated callee's identity matches
    /// the session key, so no one else can trigger this transition.
    pub fn accept(&self, caller: &str, callee: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let key = (caller.to_string(), callee.to_string());

        match sessions.get_mut(&key) {
            Some(session) if session.state == CallState::Invited => {
                session.state = CallState::Accepted;
                debug!(caller = %caller, callee = %callee, "Call accepted");
                true
            }
            _ => false,
        }
    }

    /// Terminate an `invited` session as rejected, removing it.
    ///
    /// Returns `false` if no such pending session exists.
    pub fn reject(&self, caller: &str, callee: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let key = (caller.to_string(), callee.to_string());

        match sessions.get(&key) {
            Some(session) if session.state == CallState::Invited => {
                sessions.remove(&key);
                debug!(caller = %caller, callee = %callee, "Call rejected");
                true
            }
            _ => false,
        }
    }

    /// End the live session between two participants, in either role and
    /// either state, removing it.
    ///
    /// Returns `false` if no live session exists; a repeated end is a
    /// no-op, not an error.
    pub fn end(&self, a: &str, b: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());

        let mut removed = sessions.remove(&(a.to_string(), b.to_string()));
        if removed.is_none() {
            removed = sessions.remove(&(b.to_string(), a.to_string()));
        }

        if let Some(session) = removed {
            debug!(caller = %session.caller, callee = %session.callee, "Call ended");
            true
        } else {
            false
        }
    }

    /// Check whether a live session exists between two participants, in
    /// either role.
    #[must_use]
    pub fn is_live(&self, a: &str, b: &str) -> bool {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.contains_key(&(a.to_string(), b.to_string()))
            || sessions.contains_key(&(b.to_string(), a.to_string()))
    }

    /// Destroy the session between two participants after a relay failure.
    pub fn fail(&self, a: &str, b: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());

        let mut removed = sessions.remove(&(a.to_string(), b.to_string()));
        if removed.is_none() {
            removed = sessions.remove(&(b.to_string(), a.to_string()));
        }

        if removed.is_some() {
            debug!(a = %a, b = %b, "Call session destroyed after relay failure");
        }
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.len()
    }

    /// Check whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
