//! Protocol constants and tuning parameters.
//!
//! Wire-level values are fixed by the protocol and must not change. The
//! tuning values are the defaults used by [`ConnectionConfig`] and can be
//! overridden per connection.
//!
//! [`ConnectionConfig`]: crate::peer::ConnectionConfig

use std::time::Duration;

// ============================================================================
// Handshake
// ============================================================================

/// ASCII header that opens every handshake.
pub const HANDSHAKE_HEADER: &[u8; 18] = b"P2PFILESHARINGPROJ";

/// Number of zero bytes between the header and the peer id.
pub const HANDSHAKE_PADDING_LEN: usize = 10;

/// Total handshake size: header + padding + 4-byte big-endian peer id.
pub const HANDSHAKE_LEN: usize = 32;

// ============================================================================
// Framing
// ============================================================================

/// Size of the big-endian length prefix that starts every frame.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Smallest valid frame: length prefix plus the type byte.
pub const MIN_FRAME_LEN: usize = LENGTH_PREFIX_LEN + 1;

/// Upper bound on a frame sent or received (prefix included).
///
/// A declared length above this is treated as a malformed stream rather
/// than an allocation request.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Initial capacity of the per-connection read buffer.
pub const READ_BUFFER_CAPACITY: usize = 32 * 1024;

// ============================================================================
// Connection tuning
// ============================================================================

/// Outbound frames that may wait for the writer task before `send` applies
/// backpressure.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// How long `stop` waits for queued frames to drain before aborting the
/// writer task.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Event log
// ============================================================================

/// Timestamp format for event log lines.
pub const EVENT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// File name prefix for per-peer event logs (`log_peer_<id>.log`).
pub const EVENT_LOG_PREFIX: &str = "log_peer_";
