//! The hub: process-wide owner of all realtime state.
//!
//! One `Hub` exists per process, constructed at startup and shared by
//! whatever accepts connections and by the REST layer that signals
//! committed writes. It composes the connection registry, room index, and
//! call table, and exposes the two delivery entry points collaborators use:
//! [`deliver_to_room`](Hub::deliver_to_room) and
//! [`deliver_to_user`](Hub::deliver_to_user).

use crate::calls::{CallError, CallTable};
use crate::connection::{ConnectionHandle, ConnectionId, DisplayAttrs, UserId};
use crate::registry::ConnectionRegistry;
use crate::rooms::{RoomError, RoomIndex};
use beacon_protocol::ServerEvent;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum room subscriptions per connection.
    pub max_rooms_per_connection: usize,
    /// Heartbeat interval advertised in the handshake ack, in milliseconds.
    pub heartbeat_ms: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_rooms_per_connection: 100,
            heartbeat_ms: 30_000,
        }
    }
}

/// Hub statistics, for metrics gauges.
#[derive(Debug, Clone)]
pub struct HubStats {
    /// Number of live connections.
    pub connection_count: usize,
    /// Number of rooms with at least one subscriber.
    pub room_count: usize,
    /// Total room subscriptions.
    pub subscription_count: usize,
    /// Live call sessions.
    pub call_count: usize,
}

/// Process-wide presence, fan-out, and call-signaling state.
pub struct Hub {
    /// Every live identified connection, by connection id.
    connections: DashMap<ConnectionId, ConnectionHandle>,
    /// User identity -> live connection.
    registry: ConnectionRegistry,
    /// Room -> subscribed connections.
    rooms: RoomIndex,
    /// Live call sessions.
    calls: CallTable,
    /// Configuration.
    config: HubConfig,
}

impl Hub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            connections: DashMap::new(),
            registry: ConnectionRegistry::new(),
            rooms: RoomIndex::new(config.max_rooms_per_connection),
            calls: CallTable::new(),
            config,
        }
    }

    /// Heartbeat interval to advertise in handshake acks.
    #[must_use]
    pub fn heartbeat_ms(&self) -> u32 {
        self.config.heartbeat_ms
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connection_count: self.connections.len(),
            room_count: self.rooms.room_count(),
            subscription_count: self.rooms.subscription_count(),
            call_count: self.calls.len(),
        }
    }

    // ---- connection lifecycle ----

    /// Admit an identified connection.
    ///
    /// Registers the identity mapping (evicting any previous connection for
    /// the same user, which receives a `session-replaced` close signal) and
    /// makes the connection reachable for room and direct delivery. Returns
    /// the handle used for all subsequent operations on this connection.
    pub fn admit(
        &self,
        connection_id: ConnectionId,
        user: impl Into<UserId>,
        display: DisplayAttrs,
        outbox: mpsc::UnboundedSender<ServerEvent>,
    ) -> ConnectionHandle {
        let handle = ConnectionHandle::new(connection_id, user, display, outbox);

        self.connections.insert(handle.id.clone(), handle.clone());
        self.registry.admit(handle.clone());

        handle
    }

    /// Release a connection on transport close.
    ///
    /// Synchronously removes the identity mapping (unless a newer session
    /// already superseded it), every room subscription, and the delivery
    /// entry, so nothing can be attributed to this connection afterwards.
    /// Returns the identity that was unmapped, if this connection still
    /// owned one.
    pub fn release(&self, connection_id: &ConnectionId) -> Option<UserId> {
        self.connections.remove(connection_id);
        self.rooms.drop_connection(connection_id);
        let released = self.registry.release(connection_id);
        debug!(connection = %connection_id, "Connection released from hub");
        released
    }

    /// Look up the live connection for a user identity. `None` = offline.
    #[must_use]
    pub fn resolve(&self, user: &str) -> Option<ConnectionId> {
        self.registry.resolve(user).map(|handle| handle.id)
    }

    // ---- room membership ----

    /// Subscribe a connection to a room. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the room id is invalid or the connection is at
    /// its subscription limit.
    pub fn join(&self, handle: &ConnectionHandle, room_id: &str) -> Result<bool, RoomError> {
        self.rooms.subscribe(room_id, &handle.id)
    }

    /// Unsubscribe a connection from a room. Idempotent.
    pub fn leave(&self, handle: &ConnectionHandle, room_id: &str) -> bool {
        self.rooms.unsubscribe(room_id, &handle.id)
    }

    /// Snapshot of the connections subscribed to a room.
    #[must_use]
    pub fn members_of(&self, room_id: &str) -> Vec<ConnectionId> {
        self.rooms.members_of(room_id)
    }

    // ---- broadcast engine ----

    /// Deliver an event to every connection subscribed to a room.
    ///
    /// `exclude` suppresses delivery to one connection (used for
    /// don't-echo-to-sender event types; message delivery passes `None` so
    /// the sender receives the server-confirmed copy). Subscribers that
    /// disconnected since the snapshot are skipped silently. Returns the
    /// number of connections the event was queued to.
    pub fn deliver_to_room(
        &self,
        room_id: &str,
        event: ServerEvent,
        exclude: Option<&ConnectionId>,
    ) -> usize {
        let members = self.rooms.members_of(room_id);
        let mut delivered = 0;

        for member in &members {
            if exclude == Some(member) {
                continue;
            }
            if let Some(handle) = self.connections.get(member) {
                if handle.send(event.clone()) {
                    delivered += 1;
                }
            }
        }

        trace!(room = %room_id, recipients = delivered, "Delivered to room");
        delivered
    }

    /// Deliver an event to one user's live connection.
    ///
    /// Returns `false` when the user is offline or their connection just
    /// closed; the event is dropped. At-most-once, best-effort delivery by
    /// design. Durability belongs to the persistence collaborator.
    pub fn deliver_to_user(&self, user: &str, event: ServerEvent) -> bool {
        match self.registry.resolve(user) {
            Some(handle) => handle.send(event),
            None => {
                trace!(user = %user, "Deliver to offline user dropped");
                false
            }
        }
    }

    // ---- call signaling ----

    /// Start a call: `none -> invited`.
    ///
    /// Fails synchronously if the callee is offline or a live session
    /// already exists for this (caller, callee) pair; no session is created
    /// in either case. On success the invite (with the caller's cached
    /// display attributes and opaque negotiation payload) is relayed to the
    /// callee's connection.
    ///
    /// # Errors
    ///
    /// [`CallError::CalleeOffline`], [`CallError::AlreadyInCall`], or
    /// [`CallError::PeerUnreachable`] if the callee vanished mid-invite.
    pub fn call_invite(
        &self,
        caller: &ConnectionHandle,
        callee: &str,
        payload: Value,
        room_id: Option<String>,
    ) -> Result<(), CallError> {
        let callee_conn = self.registry.resolve(callee).ok_or(CallError::CalleeOffline)?;

        self.calls.begin(&caller.user, callee)?;

        let invite = ServerEvent::IncomingCall {
            caller: caller.user.clone(),
            caller_name: caller.display.name.clone(),
            caller_avatar: caller.display.avatar_url.clone(),
            payload,
            room_id,
        };

        if !callee_conn.send(invite) {
            self.calls.fail(&caller.user, callee);
            return Err(CallError::PeerUnreachable);
        }

        debug!(caller = %caller.user, callee = %callee, "Call invite relayed");
        Ok(())
    }

    /// Accept a pending invite: `invited -> accepted`.
    ///
    /// Only the designated callee can accept. The accept payload is relayed
    /// back to the caller; if the caller disconnected in the meantime the
    /// session is destroyed and the error is reported to the accepting
    /// side.
    ///
    /// # Errors
    ///
    /// [`CallError::UnknownSession`] for a missing or already-answered
    /// session (callers ignore this silently), [`CallError::PeerUnreachable`]
    /// when the caller is gone.
    pub fn call_accept(
        &self,
        callee: &ConnectionHandle,
        caller: &str,
        payload: Value,
    ) -> Result<(), CallError> {
        if !self.calls.accept(caller, &callee.user) {
            return Err(CallError::UnknownSession);
        }

        let delivered = self
            .registry
            .resolve(caller)
            .is_some_and(|conn| conn.send(ServerEvent::CallAccepted { payload }));

        if !delivered {
            self.calls.fail(caller, &callee.user);
            return Err(CallError::PeerUnreachable);
        }

        debug!(caller = %caller, callee = %callee.user, "Call accepted");
        Ok(())
    }

    /// Decline a pending invite: `invited -> rejected`. The session is
    /// destroyed. Unknown sessions are silent no-ops.
    pub fn call_reject(&self, callee: &ConnectionHandle, caller: &str) {
        if !self.calls.reject(caller, &callee.user) {
            return;
        }
        if let Some(conn) = self.registry.resolve(caller) {
            conn.send(ServerEvent::CallRejected {});
        }
        debug!(caller = %caller, callee = %callee.user, "Call reject relayed");
    }

    /// End a live call from either side. The session is destroyed and the
    /// other participant notified. Repeated ends are no-ops.
    pub fn call_end(&self, conn: &ConnectionHandle, peer: &str) {
        if !self.calls.end(&conn.user, peer) {
            return;
        }
        if let Some(peer_conn) = self.registry.resolve(peer) {
            peer_conn.send(ServerEvent::CallEnded {});
        }
        debug!(user = %conn.user, peer = %peer, "Call end relayed");
    }

    /// Relay an opaque negotiation payload to the call peer.
    ///
    /// Authorized only when a live session exists with the sender as a
    /// participant; the payload is never interpreted. An unreachable peer
    /// destroys the session.
    ///
    /// # Errors
    ///
    /// [`CallError::UnknownSession`] when no live session covers the pair
    /// (ignored silently by callers), [`CallError::PeerUnreachable`] when
    /// the peer is gone.
    pub fn call_negotiation(
        &self,
        conn: &ConnectionHandle,
        peer: &str,
        payload: Value,
    ) -> Result<(), CallError> {
        if !self.calls.is_live(&conn.user, peer) {
            return Err(CallError::UnknownSession);
        }

        let delivered = self.registry.resolve(peer).is_some_and(|peer_conn| {
            peer_conn.send(ServerEvent::CallNegotiation {
                peer: conn.user.clone(),
                payload,
            })
        });

        if !delivered {
            self.calls.fail(&conn.user, peer);
            return Err(CallError::PeerUnreachable);
        }

        Ok(())
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct TestClient {
        handle: ConnectionHandle,
        rx: UnboundedReceiver<ServerEvent>,
    }

    impl TestClient {
        fn recv(&mut self) -> Option<ServerEvent> {
            self.rx.try_recv().ok()
        }

        fn drain(&mut self) -> Vec<ServerEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn connect(hub: &Hub, conn: &str, user: &str) -> TestClient {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = hub.admit(
            ConnectionId::from(conn),
            user,
            DisplayAttrs::new(user, None),
            tx,
        );
        TestClient { handle, rx }
    }

    #[test]
    fn test_duplicate_login_evicts_and_remaps() {
        let hub = Hub::new();
        let mut x = connect(&hub, "cx", "u1");
        let _y = connect(&hub, "cy", "u1");

        assert!(matches!(x.recv(), Some(ServerEvent::SessionReplaced {})));
        assert_eq!(hub.resolve("u1"), Some(ConnectionId::from("cy")));

        // The evicted task disconnects late; the new mapping survives.
        hub.release(&x.handle.id);
        assert_eq!(hub.resolve("u1"), Some(ConnectionId::from("cy")));
    }

    #[test]
    fn test_room_broadcast_join_and_leave() {
        let hub = Hub::new();
        let mut a = connect(&hub, "c1", "u1");
        let mut b = connect(&hub, "c2", "u2");

        hub.join(&a.handle, "r1").unwrap();
        hub.join(&b.handle, "r1").unwrap();

        let event = ServerEvent::notify("message-received", serde_json::json!({"text": "hi"}));
        assert_eq!(hub.deliver_to_room("r1", event.clone(), None), 2);
        assert_eq!(a.recv(), Some(event.clone()));
        assert_eq!(b.recv(), Some(event.clone()));

        hub.leave(&b.handle, "r1");
        assert_eq!(hub.deliver_to_room("r1", event.clone(), None), 1);
        assert_eq!(a.recv(), Some(event));
        assert!(b.recv().is_none());
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let hub = Hub::new();
        let mut a = connect(&hub, "c1", "u1");
        let mut b = connect(&hub, "c2", "u2");
        let mut c = connect(&hub, "c3", "u3");

        for client in [&a, &b, &c] {
            hub.join(&client.handle, "r1").unwrap();
        }

        let typing = ServerEvent::notify("typing", serde_json::json!({"user": "u1"}));
        let delivered = hub.deliver_to_room("r1", typing, Some(&a.handle.id));
        assert_eq!(delivered, 2);
        assert!(a.recv().is_none());
        assert!(b.recv().is_some());
        assert!(c.recv().is_some());
    }

    #[test]
    fn test_broadcast_skips_disconnected_subscriber() {
        let hub = Hub::new();
        let mut a = connect(&hub, "c1", "u1");
        let b = connect(&hub, "c2", "u2");

        hub.join(&a.handle, "r1").unwrap();
        hub.join(&b.handle, "r1").unwrap();

        // b's writer task is gone but its subscription lingers.
        drop(b.rx);

        let event = ServerEvent::notify("message-received", serde_json::json!({}));
        assert_eq!(hub.deliver_to_room("r1", event, None), 1);
        assert!(a.recv().is_some());
    }

    #[test]
    fn test_release_clears_subscriptions() {
        let hub = Hub::new();
        let a = connect(&hub, "c1", "u1");

        hub.join(&a.handle, "r1").unwrap();
        hub.release(&a.handle.id);

        assert!(!hub.members_of("r1").contains(&a.handle.id));
        assert!(hub.resolve("u1").is_none());
        assert_eq!(hub.stats().subscription_count, 0);
    }

    #[test]
    fn test_deliver_to_user() {
        let hub = Hub::new();
        let mut a = connect(&hub, "c1", "u1");

        assert!(hub.deliver_to_user("u1", ServerEvent::notify("x", serde_json::json!(1))));
        assert!(a.recv().is_some());

        // Offline user: documented no-op.
        assert!(!hub.deliver_to_user("nobody", ServerEvent::notify("x", serde_json::json!(1))));
    }

    #[test]
    fn test_invite_offline_callee_fails_without_session() {
        let hub = Hub::new();
        let a = connect(&hub, "c1", "u1");

        let result = hub.call_invite(&a.handle, "u3", serde_json::json!({"sdp": "o"}), None);
        assert_eq!(result, Err(CallError::CalleeOffline));
        assert_eq!(hub.stats().call_count, 0);
    }

    #[test]
    fn test_call_lifecycle() {
        let hub = Hub::new();
        let mut a = connect(&hub, "c1", "u1");
        let mut b = connect(&hub, "c2", "u2");

        hub.call_invite(&a.handle, "u2", serde_json::json!({"sdp": "offer"}), Some("r1".into()))
            .unwrap();
        match b.recv() {
            Some(ServerEvent::IncomingCall { caller, caller_name, room_id, .. }) => {
                assert_eq!(caller, "u1");
                assert_eq!(caller_name, "u1");
                assert_eq!(room_id.as_deref(), Some("r1"));
            }
            other => panic!("expected incoming-call, got {other:?}"),
        }

        // Second invite while one is pending is rejected synchronously.
        assert_eq!(
            hub.call_invite(&a.handle, "u2", serde_json::json!({}), None),
            Err(CallError::AlreadyInCall)
        );

        hub.call_accept(&b.handle, "u1", serde_json::json!({"sdp": "answer"}))
            .unwrap();
        assert!(matches!(a.recv(), Some(ServerEvent::CallAccepted { .. })));

        // Negotiation flows both ways while the session is live.
        hub.call_negotiation(&a.handle, "u2", serde_json::json!({"candidate": 1}))
            .unwrap();
        assert!(matches!(b.recv(), Some(ServerEvent::CallNegotiation { .. })));

        hub.call_end(&a.handle, "u2");
        assert!(matches!(b.recv(), Some(ServerEvent::CallEnded {})));

        // Subsequent ends from either side are no-ops.
        hub.call_end(&a.handle, "u2");
        hub.call_end(&b.handle, "u1");
        assert!(a.recv().is_none());
        assert!(b.recv().is_none());
        assert_eq!(hub.stats().call_count, 0);
    }

    #[test]
    fn test_reject_relays_to_caller() {
        let hub = Hub::new();
        let mut a = connect(&hub, "c1", "u1");
        let b = connect(&hub, "c2", "u2");

        hub.call_invite(&a.handle, "u2", serde_json::json!({}), None).unwrap();
        hub.call_reject(&b.handle, "u1");

        let events = a.drain();
        assert!(events.iter().any(|e| matches!(e, ServerEvent::CallRejected {})));
        assert_eq!(hub.stats().call_count, 0);
    }

    #[test]
    fn test_only_designated_callee_can_accept() {
        let hub = Hub::new();
        let mut a = connect(&hub, "c1", "u1");
        let _b = connect(&hub, "c2", "u2");
        let c = connect(&hub, "c3", "u3");

        hub.call_invite(&a.handle, "u2", serde_json::json!({}), None).unwrap();

        let result = hub.call_accept(&c.handle, "u1", serde_json::json!({}));
        assert_eq!(result, Err(CallError::UnknownSession));
        assert!(a.recv().is_none());
        assert_eq!(hub.stats().call_count, 1);
    }

    #[test]
    fn test_accept_after_caller_disconnect_destroys_session() {
        let hub = Hub::new();
        let a = connect(&hub, "c1", "u1");
        let b = connect(&hub, "c2", "u2");

        hub.call_invite(&a.handle, "u2", serde_json::json!({}), None).unwrap();
        hub.release(&a.handle.id);

        let result = hub.call_accept(&b.handle, "u1", serde_json::json!({}));
        assert_eq!(result, Err(CallError::PeerUnreachable));
        assert_eq!(hub.stats().call_count, 0);
    }

    #[test]
    fn test_negotiation_requires_live_session() {
        let hub = Hub::new();
        let a = connect(&hub, "c1", "u1");
        let mut b = connect(&hub, "c2", "u2");

        let result = hub.call_negotiation(&a.handle, "u2", serde_json::json!({"candidate": 1}));
        assert_eq!(result, Err(CallError::UnknownSession));
        assert!(b.recv().is_none());
    }
}
