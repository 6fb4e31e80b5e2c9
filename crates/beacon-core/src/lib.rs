//! # beacon-core
//!
//! Presence registry, room-scoped broadcast, and call signaling for the
//! Beacon realtime layer.
//!
//! This crate owns all of the volatile per-process state behind a chat
//! server's realtime surface:
//!
//! - **ConnectionRegistry** - one live connection per user identity
//! - **RoomIndex** - room -> subscribed connections
//! - **CallTable** - in-flight call sessions between two identities
//! - **Hub** - composes the three and exposes delivery entry points
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│     Hub     │────▶│  RoomIndex  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                        │         │
//!                        ▼         ▼
//!                 ┌──────────┐  ┌───────────┐
//!                 │ Registry │  │ CallTable │
//!                 └──────────┘  └───────────┘
//! ```
//!
//! Nothing here is persisted. Every structure is rebuilt from scratch after
//! a restart: clients re-identify and re-join their rooms.

pub mod calls;
pub mod connection;
pub mod hub;
pub mod registry;
pub mod rooms;

pub use calls::{CallError, CallState, CallTable};
pub use connection::{ConnectionHandle, ConnectionId, DisplayAttrs, UserId};
pub use hub::{Hub, HubConfig, HubStats};
pub use registry::ConnectionRegistry;
pub use rooms::{RoomError, RoomId, RoomIndex};
