//! Peer connection layer.
//!
//! This module implements the peer wire protocol: the 32-byte identity
//! handshake, the length-prefixed message frames, and [`PeerConnection`],
//! which runs both over one TCP link.

mod bitfield;
mod config;
mod connection;
mod error;
mod frame;
mod handshake;
mod message;
mod transport;

pub use bitfield::Bitfield;
pub use config::{ConnectionConfig, PeerConfig, Role, SendMode};
pub use connection::{ConnectionState, PeerConnection, PeerSender};
pub use error::PeerError;
pub use frame::{decode_frame, decode_text, encode_frame, encode_text};
pub use handshake::Handshake;
pub use message::{Message, MessageId, PeerMessage};
pub use transport::{FrameReader, FrameWriter, PeerTransport};
