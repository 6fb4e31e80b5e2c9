//! # beacon-protocol
//!
//! Wire protocol definitions for the Beacon realtime layer.
//!
//! This crate defines the messages exchanged between chat clients and the
//! Beacon server, plus the binary codec used to frame them:
//!
//! - [`ClientSignal`] - inbound signals (identify, join/leave, call control)
//! - [`ServerEvent`] - outbound events (broadcasts, call relay, handshake)
//! - [`codec`] - length-prefixed MessagePack encoding
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, ClientSignal};
//!
//! let signal = ClientSignal::Join { room_id: "room:42".into() };
//!
//! let encoded = codec::encode(&signal).unwrap();
//! let decoded: ClientSignal = codec::decode(&encoded).unwrap();
//! assert_eq!(signal, decoded);
//! ```

pub mod codec;
pub mod event;
pub mod signal;

pub use codec::{decode, encode, ProtocolError};
pub use event::ServerEvent;
pub use signal::ClientSignal;
