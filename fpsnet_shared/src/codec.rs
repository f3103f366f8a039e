//! Frame codec.
//!
//! Every message on the wire is one length-prefixed frame:
//!
//! ```text
//! +--------------------+---------------------------+
//! | length (4 bytes)   | body (length bytes)       |
//! | u32 big-endian     | JSON envelope             |
//! +--------------------+---------------------------+
//! ```
//!
//! The length does not include the prefix itself and may not exceed
//! [`MAX_BODY_LEN`]. The body is a self-describing envelope:
//! `{"kind": u32, "player_id": u32, "timestamp": u64, "payload": ...}` where
//! `payload` is `null` for kinds without one.
//!
//! This is the only framing the protocol speaks (see
//! [`crate::protocol::PROTOCOL_VERSION`]).

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    config::PlayerId,
    protocol::{Message, MessageKind, Payload, PlayerAttributes, PlayerSnapshot, PlayerState},
};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Largest body a frame may declare (1 MiB).
pub const MAX_BODY_LEN: usize = 1024 * 1024;

/// Errors produced while framing or parsing messages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame declares (or would need) a body above [`MAX_BODY_LEN`].
    #[error("frame body of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// The peer closed the stream cleanly between frames.
    #[error("connection closed")]
    Closed,

    /// The peer closed the stream in the middle of a frame.
    #[error("connection closed mid-frame ({got} of {expected} bytes)")]
    Truncated { expected: usize, got: usize },

    /// The body is not a valid envelope for its kind.
    #[error("malformed message body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// True for violations of the framing rules, as opposed to socket faults.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            CodecError::FrameTooLarge { .. } | CodecError::Truncated { .. } | CodecError::Malformed(_)
        )
    }
}

#[derive(Serialize)]
struct OutgoingEnvelope<'a> {
    kind: u32,
    player_id: PlayerId,
    timestamp: u64,
    payload: OutgoingPayload<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum OutgoingPayload<'a> {
    Empty,
    State(&'a PlayerState),
    Snapshot(&'a PlayerSnapshot),
    Attributes(&'a PlayerAttributes),
}

#[derive(Deserialize)]
struct IncomingEnvelope {
    kind: u32,
    player_id: PlayerId,
    timestamp: u64,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Serializes a message into its envelope body (no length prefix).
pub fn encode_body(msg: &Message) -> Result<Vec<u8>, CodecError> {
    let payload = match &msg.payload {
        Payload::Heartbeat | Payload::PlayerJoinRequest | Payload::Unknown { .. } => {
            OutgoingPayload::Empty
        }
        Payload::PlayerJoinReply(state) | Payload::PlayerState(state) => {
            OutgoingPayload::State(state)
        }
        Payload::PlayerUpdate(snapshot) => OutgoingPayload::Snapshot(snapshot),
        Payload::PlayerAttributeUpdate(attrs) => OutgoingPayload::Attributes(attrs),
    };
    let envelope = OutgoingEnvelope {
        kind: msg.payload.kind_id(),
        player_id: msg.player_id,
        timestamp: msg.timestamp,
        payload,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Parses an envelope body. Unknown kinds become [`Payload::Unknown`].
pub fn decode_message(body: &[u8]) -> Result<Message, CodecError> {
    let envelope: IncomingEnvelope = serde_json::from_slice(body)?;
    let payload = match MessageKind::from_id(envelope.kind) {
        Some(MessageKind::Heartbeat) => Payload::Heartbeat,
        Some(MessageKind::PlayerJoinRequest) => Payload::PlayerJoinRequest,
        Some(MessageKind::PlayerJoinReply) => {
            Payload::PlayerJoinReply(serde_json::from_value(envelope.payload)?)
        }
        Some(MessageKind::PlayerUpdate) => {
            Payload::PlayerUpdate(serde_json::from_value(envelope.payload)?)
        }
        Some(MessageKind::PlayerAttributeUpdate) => {
            Payload::PlayerAttributeUpdate(serde_json::from_value(envelope.payload)?)
        }
        Some(MessageKind::PlayerState) => {
            Payload::PlayerState(serde_json::from_value(envelope.payload)?)
        }
        None => Payload::Unknown {
            kind: envelope.kind,
        },
    };
    Ok(Message {
        player_id: envelope.player_id,
        timestamp: envelope.timestamp,
        payload,
    })
}

/// Prefixes `body` with its big-endian length.
pub fn encode_frame(body: &[u8]) -> Result<Bytes, CodecError> {
    if body.len() > MAX_BODY_LEN {
        return Err(CodecError::FrameTooLarge {
            len: body.len(),
            max: MAX_BODY_LEN,
        });
    }
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(body);
    Ok(buf.freeze())
}

/// Encodes a message into one complete frame, ready for a single write.
pub fn encode_message(msg: &Message) -> Result<Bytes, CodecError> {
    encode_frame(&encode_body(msg)?)
}

/// Reads one frame and returns its body.
///
/// The declared length is checked before any body byte is read, so an
/// oversized frame leaves the body untouched in the stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes, CodecError> {
    let mut header = [0u8; HEADER_LEN];
    let got = read_up_to(reader, &mut header).await?;
    if got == 0 {
        return Err(CodecError::Closed);
    }
    if got < HEADER_LEN {
        return Err(CodecError::Truncated {
            expected: HEADER_LEN,
            got,
        });
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_BODY_LEN {
        return Err(CodecError::FrameTooLarge {
            len,
            max: MAX_BODY_LEN,
        });
    }

    let mut body = vec![0u8; len];
    let got = read_up_to(reader, &mut body).await?;
    if got < len {
        return Err(CodecError::Truncated { expected: len, got });
    }
    Ok(Bytes::from(body))
}

/// Reads and decodes one message.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, CodecError> {
    let body = read_frame(reader).await?;
    decode_message(&body)
}

/// Encodes and writes one message with a single `write_all`.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &Message,
) -> Result<(), CodecError> {
    let frame = encode_message(msg)?;
    writer.write_all(&frame).await?;
    Ok(())
}

/// Fills `buf` until it is full or the stream ends; returns bytes read.
async fn read_up_to<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;

    fn sample_state() -> PlayerState {
        PlayerState {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Vec3::new(0.0, 90.0, 0.0),
            velocity: Vec3::new(0.5, 0.0, 0.0),
            grounded: true,
            attributes: PlayerAttributes {
                health: 80.0,
                max_health: 100.0,
            },
            alive: true,
        }
    }

    #[tokio::test]
    async fn messages_survive_the_wire() {
        let messages = vec![
            Message::heartbeat(1),
            Message::join_request(1),
            Message::join_reply(1, sample_state()),
            Message::player_update(
                2,
                PlayerSnapshot {
                    position: Vec3::new(4.0, 0.0, -1.5),
                    rotation: Vec3::new(0.0, 45.0, 0.0),
                    velocity: Vec3::new(1.0, 0.0, 0.0),
                    grounded: true,
                    health: 55.0,
                },
            ),
            Message::attribute_update(
                3,
                PlayerAttributes {
                    health: 10.0,
                    max_health: 150.0,
                },
            ),
            Message::now(4, Payload::PlayerState(sample_state())),
        ];

        let mut wire = Vec::new();
        for msg in &messages {
            wire.extend_from_slice(&encode_message(msg).unwrap());
        }

        let mut reader = &wire[..];
        for expected in &messages {
            let got = read_message(&mut reader).await.unwrap();
            assert_eq!(&got, expected);
        }
        assert!(matches!(
            read_message(&mut reader).await,
            Err(CodecError::Closed)
        ));
    }

    #[test]
    fn header_is_big_endian_body_length() {
        let frame = encode_frame(b"hello").unwrap();
        assert_eq!(&frame[..HEADER_LEN], &[0, 0, 0, 5]);
        assert_eq!(&frame[HEADER_LEN..], b"hello");
    }

    #[test]
    fn envelope_is_self_describing() {
        let msg = Message {
            player_id: 9,
            timestamp: 1_700_000_000,
            payload: Payload::Heartbeat,
        };
        let body = encode_body(&msg).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["kind"], 1);
        assert_eq!(value["player_id"], 9);
        assert_eq!(value["timestamp"], 1_700_000_000u64);
        assert!(value["payload"].is_null());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_reading_body() {
        let declared = (MAX_BODY_LEN + 1) as u32;
        let mut wire = declared.to_be_bytes().to_vec();
        wire.extend_from_slice(&[0xAB; 16]);

        let mut reader = &wire[..];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(
            err,
            CodecError::FrameTooLarge { len, max } if len == MAX_BODY_LEN + 1 && max == MAX_BODY_LEN
        ));
        assert!(err.is_protocol_violation());
        // Body bytes were left in place.
        assert_eq!(reader.len(), 16);
    }

    #[test]
    fn oversized_body_cannot_be_encoded() {
        let body = vec![0u8; MAX_BODY_LEN + 1];
        assert!(matches!(
            encode_frame(&body),
            Err(CodecError::FrameTooLarge { .. })
        ));
        assert!(encode_frame(&body[..MAX_BODY_LEN]).is_ok());
    }

    #[tokio::test]
    async fn truncated_header_is_terminal() {
        let mut reader = &[0u8, 0][..];
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(CodecError::Truncated {
                expected: HEADER_LEN,
                got: 2
            })
        ));
    }

    #[tokio::test]
    async fn truncated_body_is_terminal() {
        let mut wire = 10u32.to_be_bytes().to_vec();
        wire.extend_from_slice(b"abc");
        let mut reader = &wire[..];
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(CodecError::Truncated {
                expected: 10,
                got: 3
            })
        ));
    }

    #[tokio::test]
    async fn peer_close_mid_frame_does_not_hang() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            client.write_all(&[0, 0, 0, 20, b'{']).await.unwrap();
            drop(client);
        });
        let err = read_frame(&mut server).await.unwrap_err();
        writer.await.unwrap();
        assert!(matches!(err, CodecError::Truncated { expected: 20, got: 1 }));
    }

    #[tokio::test]
    async fn frames_split_across_reads_stay_in_order() {
        let (mut client, mut server) = tokio::io::duplex(8);
        let sent: Vec<Message> = (1..=3).map(Message::join_request).collect();

        let mut wire = Vec::new();
        for msg in &sent {
            wire.extend_from_slice(&encode_message(msg).unwrap());
        }
        let writer = tokio::spawn(async move {
            // Dribble bytes out in uneven slices.
            for chunk in wire.chunks(3) {
                client.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        for expected in &sent {
            assert_eq!(&read_message(&mut server).await.unwrap(), expected);
        }
        writer.await.unwrap();
    }

    #[test]
    fn unknown_kind_decodes_as_unknown() {
        let body = br#"{"kind": 77, "player_id": 3, "timestamp": 5, "payload": {"anything": [1, 2]}}"#;
        let msg = decode_message(body).unwrap();
        assert_eq!(msg.payload, Payload::Unknown { kind: 77 });
        assert_eq!(msg.player_id, 3);
    }

    #[test]
    fn mismatched_payload_is_malformed() {
        let body = br#"{"kind": 3, "player_id": 1, "timestamp": 5, "payload": "not a state"}"#;
        let err = decode_message(body).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));

        let err = decode_message(b"\x00\x01garbage").unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn empty_body_frame_is_malformed_not_fatal_to_reader() {
        let mut wire = encode_frame(b"").unwrap().to_vec();
        wire.extend_from_slice(&encode_message(&Message::heartbeat(1)).unwrap());

        let mut reader = &wire[..];
        let body = read_frame(&mut reader).await.unwrap();
        assert!(body.is_empty());
        assert!(decode_message(&body).is_err());
        assert_eq!(
            read_message(&mut reader).await.unwrap().payload,
            Payload::Heartbeat
        );
    }
}
