use super::message::MessageId;
use thiserror::Error;

/// Errors that can occur during peer communication.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The remote hostname did not resolve to any address.
    #[error("could not resolve {host}: {source}")]
    AddressResolution {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// The outbound TCP connect failed.
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The socket could not be prepared for framed I/O.
    #[error("stream setup failed: {0}")]
    StreamInit(#[source] std::io::Error),

    /// The stream closed before a full handshake arrived.
    #[error("handshake truncated: got {0} bytes")]
    HandshakeTruncated(usize),

    /// The configured read timeout elapsed while waiting for the handshake.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The handshake did not start with the protocol header.
    #[error("handshake header mismatch")]
    HandshakeHeaderMismatch,

    /// One of the handshake padding bytes was not zero.
    #[error("handshake padding is not zero")]
    HandshakeNonZeroPadding,

    /// The handshake carried a different peer id than expected.
    #[error("handshake id mismatch: expected {expected}, got {actual}")]
    HandshakeIdMismatch { expected: u32, actual: u32 },

    /// A frame's declared length disagrees with the bytes supplied.
    #[error("invalid frame length: declared {declared}, actual {actual}")]
    InvalidFrameLength { declared: usize, actual: usize },

    /// A frame too short to hold its length prefix and type byte.
    #[error("frame too short: {0} bytes")]
    FrameTooShort(usize),

    /// The payload size does not fit the message type. For `Piece`,
    /// `expected` is the minimum.
    #[error("invalid {id:?} payload: {actual} bytes, expected {expected}")]
    InvalidPayloadLength {
        id: MessageId,
        expected: usize,
        actual: usize,
    },

    /// A frame carried an unknown type code.
    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    /// A frame's text view held a character with no single-byte form.
    #[error("frame text is not single-byte")]
    InvalidText,

    /// A frame longer than the configured maximum, inbound or outbound.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Reading from the socket failed or timed out.
    #[error("read failed: {0}")]
    TransportRead(#[source] std::io::Error),

    /// Writing to the socket failed or timed out.
    #[error("write failed: {0}")]
    TransportWrite(#[source] std::io::Error),

    /// The stream ended in the middle of a frame.
    #[error("connection closed")]
    ConnectionClosed,

    /// `start` was called on a connection that already left `Idle`.
    #[error("connection already started")]
    AlreadyStarted,

    /// The operation needs an open connection.
    #[error("not connected")]
    NotConnected,

    /// Releasing the socket did not complete cleanly.
    #[error("close failed: {0}")]
    Close(String),
}

impl PeerError {
    /// Returns true for errors raised while validating a handshake.
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            PeerError::HandshakeTruncated(_)
                | PeerError::HandshakeTimeout
                | PeerError::HandshakeHeaderMismatch
                | PeerError::HandshakeNonZeroPadding
                | PeerError::HandshakeIdMismatch { .. }
        )
    }

    /// Returns true for frames rejected because of their length or the
    /// length of their payload.
    pub fn is_invalid_length(&self) -> bool {
        matches!(
            self,
            PeerError::InvalidFrameLength { .. }
                | PeerError::FrameTooShort(_)
                | PeerError::InvalidPayloadLength { .. }
        )
    }
}
