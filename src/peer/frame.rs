//! Turning raw frames into messages and back.
//!
//! [`decode_frame`] is total: any byte input yields either a message or a
//! [`PeerError`], never a panic.

use super::config::PeerConfig;
use super::error::PeerError;
use super::message::{Message, MessageId, PeerMessage};
use crate::codec::{bytes_to_text, text_to_bytes};
use crate::constants::{LENGTH_PREFIX_LEN, MIN_FRAME_LEN};
use bytes::{Buf, Bytes};
use std::sync::Arc;

/// Decodes one complete frame, length prefix included.
///
/// Fails with [`PeerError::InvalidFrameLength`] if the declared length is
/// not exactly `frame.len()`, with [`PeerError::FrameTooShort`] if there is
/// no room for the type byte, with [`PeerError::InvalidPayloadLength`] if
/// the payload does not fit the message type, and with
/// [`PeerError::InvalidMessageType`] for an unknown type code.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use peerlink::peer::{decode_frame, Message, PeerConfig};
/// use std::sync::Arc;
///
/// let peer = Arc::new(PeerConfig::new(1011, "localhost", 6008, false));
/// let frame = Bytes::from_static(&[0, 0, 0, 9, 6, 0, 0, 0, 1]);
///
/// let msg = decode_frame(frame, peer).unwrap();
/// assert_eq!(msg.message, Message::Request { piece: 1 });
/// ```
pub fn decode_frame(mut frame: Bytes, peer: Arc<PeerConfig>) -> Result<PeerMessage, PeerError> {
    let actual = frame.len();
    if actual < LENGTH_PREFIX_LEN {
        return Err(PeerError::FrameTooShort(actual));
    }

    let declared = frame.get_u32() as usize;
    if declared != actual {
        return Err(PeerError::InvalidFrameLength { declared, actual });
    }
    if declared < MIN_FRAME_LEN {
        return Err(PeerError::FrameTooShort(declared));
    }

    let id = MessageId::try_from(frame.get_u8())?;
    let message = Message::decode_payload(id, frame)?;
    Ok(PeerMessage::new(peer, message))
}

/// Encodes a message as one frame.
pub fn encode_frame(message: &Message) -> Bytes {
    message.encode()
}

/// Legacy text view of a frame: one `char` per byte.
pub fn encode_text(message: &Message) -> String {
    bytes_to_text(&message.encode())
}

/// Decodes a frame held in its text view.
///
/// Text with a character above `U+00FF` cannot be a frame and is reported
/// as [`PeerError::InvalidText`].
pub fn decode_text(text: &str, peer: Arc<PeerConfig>) -> Result<PeerMessage, PeerError> {
    let bytes = text_to_bytes(text).ok_or(PeerError::InvalidText)?;
    decode_frame(Bytes::from(bytes), peer)
}
