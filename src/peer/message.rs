use super::bitfield::Bitfield;
use super::config::PeerConfig;
use super::error::PeerError;
use crate::constants::LENGTH_PREFIX_LEN;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;

/// Size of the piece index carried by `Have`, `Request` and `Piece`.
const PIECE_INDEX_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            _ => Err(PeerError::InvalidMessageType(value)),
        }
    }
}

/// A peer wire message.
///
/// On the wire every message is one frame:
/// `[u32 total length][u8 type][payload]`, where the length counts the
/// whole frame including its own four bytes. All integers are big-endian.
///
/// # Examples
///
/// ```
/// use peerlink::peer::Message;
///
/// let have = Message::Have { piece: 1 };
/// assert_eq!(&have.encode()[..], &[0, 0, 0, 9, 4, 0, 0, 0, 1]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { piece: u32 },
    Bitfield(Bitfield),
    Request { piece: u32 },
    Piece { index: u32, data: Bytes },
}

impl Message {
    pub fn id(&self) -> MessageId {
        match self {
            Message::Choke => MessageId::Choke,
            Message::Unchoke => MessageId::Unchoke,
            Message::Interested => MessageId::Interested,
            Message::NotInterested => MessageId::NotInterested,
            Message::Have { .. } => MessageId::Have,
            Message::Bitfield(_) => MessageId::Bitfield,
            Message::Request { .. } => MessageId::Request,
            Message::Piece { .. } => MessageId::Piece,
        }
    }

    /// Encodes the message as one complete frame.
    ///
    /// The length prefix is a `u32`, so a frame must stay below 4 GiB.
    /// Connections only send what passes [`try_encode`](Self::try_encode)
    /// against their `max_frame_len`.
    pub fn encode(&self) -> Bytes {
        debug_assert!(self.encoded_len() <= u32::MAX as usize);
        let mut buf = BytesMut::with_capacity(self.encoded_len());

        // Backfilled once the payload is written.
        buf.put_u32(0);
        buf.put_u8(self.id() as u8);

        match self {
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => {}
            Message::Have { piece } | Message::Request { piece } => {
                buf.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                buf.put_slice(bits.as_bytes());
            }
            Message::Piece { index, data } => {
                buf.put_u32(*index);
                buf.put_slice(data);
            }
        }

        let total = buf.len() as u32;
        buf[..LENGTH_PREFIX_LEN].copy_from_slice(&total.to_be_bytes());
        buf.freeze()
    }

    /// Encodes the message, refusing frames longer than `max_len` bytes.
    ///
    /// The bound is clamped to what the `u32` length prefix can express.
    pub fn try_encode(&self, max_len: usize) -> Result<Bytes, PeerError> {
        let len = self.encoded_len();
        if len > max_len || u32::try_from(len).is_err() {
            return Err(PeerError::FrameTooLarge(len));
        }
        Ok(self.encode())
    }

    /// Length of the encoded frame, prefix included.
    pub fn encoded_len(&self) -> usize {
        let payload = match self {
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => 0,
            Message::Have { .. } | Message::Request { .. } => PIECE_INDEX_LEN,
            Message::Bitfield(bits) => bits.as_bytes().len(),
            Message::Piece { data, .. } => PIECE_INDEX_LEN + data.len(),
        };
        LENGTH_PREFIX_LEN + 1 + payload
    }

    /// Decodes the payload that follows the type byte of a frame.
    pub fn decode_payload(id: MessageId, mut payload: Bytes) -> Result<Self, PeerError> {
        match id {
            MessageId::Choke => {
                expect_payload_len(id, &payload, 0)?;
                Ok(Message::Choke)
            }
            MessageId::Unchoke => {
                expect_payload_len(id, &payload, 0)?;
                Ok(Message::Unchoke)
            }
            MessageId::Interested => {
                expect_payload_len(id, &payload, 0)?;
                Ok(Message::Interested)
            }
            MessageId::NotInterested => {
                expect_payload_len(id, &payload, 0)?;
                Ok(Message::NotInterested)
            }
            MessageId::Have => {
                expect_payload_len(id, &payload, PIECE_INDEX_LEN)?;
                Ok(Message::Have {
                    piece: payload.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield(Bitfield::from(payload))),
            MessageId::Request => {
                expect_payload_len(id, &payload, PIECE_INDEX_LEN)?;
                Ok(Message::Request {
                    piece: payload.get_u32(),
                })
            }
            MessageId::Piece => {
                if payload.remaining() < PIECE_INDEX_LEN {
                    return Err(PeerError::InvalidPayloadLength {
                        id,
                        expected: PIECE_INDEX_LEN,
                        actual: payload.remaining(),
                    });
                }
                let index = payload.get_u32();
                Ok(Message::Piece {
                    index,
                    data: payload,
                })
            }
        }
    }
}

/// Fails unless the payload is exactly `expected` bytes long.
fn expect_payload_len(id: MessageId, payload: &Bytes, expected: usize) -> Result<(), PeerError> {
    if payload.len() != expected {
        return Err(PeerError::InvalidPayloadLength {
            id,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Choke => write!(f, "choke"),
            Message::Unchoke => write!(f, "unchoke"),
            Message::Interested => write!(f, "interested"),
            Message::NotInterested => write!(f, "not interested"),
            Message::Have { piece } => write!(f, "have piece {}", piece),
            Message::Bitfield(bits) => write!(f, "bitfield {:02x?}", bits.as_bytes()),
            Message::Request { piece } => write!(f, "request piece {}", piece),
            Message::Piece { index, data } => {
                write!(f, "piece {} ({} bytes)", index, data.len())
            }
        }
    }
}

/// A message together with the peer it came from or is going to.
///
/// The peer is not part of the wire encoding but does take part in
/// equality: the same `Have` from two different peers compares unequal.
/// Compare [`PeerMessage::message`] alone for content equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMessage {
    pub peer: Arc<PeerConfig>,
    pub message: Message,
}

impl PeerMessage {
    pub fn new(peer: Arc<PeerConfig>, message: Message) -> Self {
        Self { peer, message }
    }

    pub fn encode(&self) -> Bytes {
        self.message.encode()
    }
}

impl fmt::Display for PeerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (peer {})", self.message, self.peer.id)
    }
}
