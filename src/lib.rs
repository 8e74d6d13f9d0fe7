//! peerlink - peer connections for a P2P file sharing protocol
//!
//! This library provides the connection layer between two peers of a
//! BitTorrent-like swarm: TCP setup, a fixed 32-byte handshake, and a small
//! vocabulary of length-prefixed messages exchanged by background tasks.
//!
//! # Modules
//!
//! - [`peer`] - Handshake, message frames and [`PeerConnection`]
//! - [`codec`] - Lossless byte/text conversion for the legacy text view
//! - [`event_log`] - Timestamped per-peer event log
//! - [`constants`] - Protocol constants and tuning defaults
//!
//! # Wire format
//!
//! ```text
//! handshake: "P2PFILESHARINGPROJ" | 10 x 0x00 | peer id (u32 BE)
//! frame:     total length (u32 BE, includes itself) | type (u8) | payload
//! ```

pub mod codec;
pub mod constants;
pub mod event_log;
pub mod peer;

pub use event_log::{EventLog, PeerEvent};
pub use peer::{
    Bitfield, ConnectionConfig, ConnectionState, Handshake, Message, MessageId, PeerConfig,
    PeerConnection, PeerError, PeerMessage, PeerSender, Role, SendMode,
};
