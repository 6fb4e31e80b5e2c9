//! Codec for encoding and decoding Beacon wire messages.
//!
//! Messages are MessagePack-encoded with a 4-byte big-endian length prefix.
//! The codec is generic over the message type so both signal directions
//! share one framing implementation.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum frame size (1 MiB). Chat payloads are small; anything larger
/// indicates a broken or hostile client.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode a frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode a message to bytes.
///
/// The encoded format is:
/// - 4 bytes: big-endian length prefix
/// - N bytes: MessagePack-encoded message
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, ProtocolError> {
    let payload = rmp_serde::to_vec_named(message)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(buf.freeze())
}

/// Encode a message into an existing buffer.
///
/// # Errors
///
/// Returns an error if the message is too large or encoding fails.
pub fn encode_into<T: Serialize>(message: &T, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(message)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a message from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let message = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(message)
}

/// Try to decode a message from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(message))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let message = rmp_serde::from_slice(&payload)?;

    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientSignal, ServerEvent};
    use serde_json::json;

    #[test]
    fn test_encode_decode_signals() {
        let signals = vec![
            ClientSignal::Identify {
                user_id: "u1".into(),
                name: "Alice".into(),
                avatar_url: Some("https://example.com/a.png".into()),
            },
            ClientSignal::Join { room_id: "room:1".into() },
            ClientSignal::Leave { room_id: "room:1".into() },
            ClientSignal::CallInvite {
                callee: "u2".into(),
                payload: json!({"sdp": "offer"}),
                room_id: None,
            },
            ClientSignal::CallNegotiation {
                peer: "u2".into(),
                payload: json!({"candidate": "host 10.0.0.1"}),
            },
            ClientSignal::Ping { timestamp: Some(12345) },
        ];

        for signal in signals {
            let encoded = encode(&signal).unwrap();
            let decoded: ClientSignal = decode(&encoded).unwrap();
            assert_eq!(signal, decoded);
        }
    }

    #[test]
    fn test_encode_decode_events() {
        let events = vec![
            ServerEvent::Connected {
                connection_id: "conn-1".into(),
                heartbeat_ms: 30_000,
            },
            ServerEvent::IncomingCall {
                caller: "u1".into(),
                caller_name: "Alice".into(),
                caller_avatar: None,
                payload: json!({"sdp": "offer"}),
                room_id: Some("room:1".into()),
            },
            ServerEvent::CallRejected {},
            ServerEvent::SessionReplaced {},
            ServerEvent::notify("message-received", json!({"text": "hi"})),
        ];

        for event in events {
            let encoded = encode(&event).unwrap();
            let decoded: ServerEvent = decode(&encoded).unwrap();
            assert_eq!(event, decoded);
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let signal = ClientSignal::Join { room_id: "r1".into() };
        let encoded = encode(&signal).unwrap();

        let partial = &encoded[..3];
        match decode::<ClientSignal>(partial) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large() {
        let payload = json!({"blob": "x".repeat(MAX_FRAME_SIZE + 1)});
        let signal = ClientSignal::CallNegotiation {
            peer: "u2".into(),
            payload,
        };

        match encode(&signal) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_streaming_decode() {
        let s1 = ClientSignal::Join { room_id: "r1".into() };
        let s2 = ClientSignal::Leave { room_id: "r1".into() };

        let mut buf = BytesMut::new();
        encode_into(&s1, &mut buf).unwrap();
        encode_into(&s2, &mut buf).unwrap();

        let d1: ClientSignal = decode_from(&mut buf).unwrap().unwrap();
        let d2: ClientSignal = decode_from(&mut buf).unwrap().unwrap();

        assert_eq!(s1, d1);
        assert_eq!(s2, d2);
        assert!(buf.is_empty());

        // Nothing left to decode
        assert!(decode_from::<ClientSignal>(&mut buf).unwrap().is_none());
    }
}
