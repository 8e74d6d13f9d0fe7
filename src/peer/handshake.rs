use super::error::PeerError;
use crate::constants::{HANDSHAKE_HEADER, HANDSHAKE_LEN, HANDSHAKE_PADDING_LEN};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

const PADDING_START: usize = HANDSHAKE_HEADER.len();
const ID_START: usize = PADDING_START + HANDSHAKE_PADDING_LEN;

/// The 32-byte identity exchange that opens every connection.
///
/// Layout: the ASCII header `P2PFILESHARINGPROJ`, ten zero bytes, then the
/// sender's peer id as a big-endian `u32`.
///
/// # Examples
///
/// ```
/// use peerlink::peer::Handshake;
///
/// let bytes = Handshake::new(1001).encode();
/// assert_eq!(bytes.len(), 32);
/// assert!(Handshake::is_valid(&bytes, 1001));
/// assert!(!Handshake::is_valid(&bytes, 1002));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub peer_id: u32,
}

impl Handshake {
    pub fn new(peer_id: u32) -> Self {
        Self { peer_id }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_slice(HANDSHAKE_HEADER);
        buf.put_bytes(0, HANDSHAKE_PADDING_LEN);
        buf.put_u32(self.peer_id);
        buf.freeze()
    }

    /// Parses a handshake, checking length, header and padding.
    ///
    /// Bytes past the first 32 are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() < HANDSHAKE_LEN {
            return Err(PeerError::HandshakeTruncated(data.len()));
        }

        if &data[..PADDING_START] != HANDSHAKE_HEADER {
            return Err(PeerError::HandshakeHeaderMismatch);
        }

        if data[PADDING_START..ID_START].iter().any(|&b| b != 0) {
            return Err(PeerError::HandshakeNonZeroPadding);
        }

        let mut id = [0u8; 4];
        id.copy_from_slice(&data[ID_START..HANDSHAKE_LEN]);

        Ok(Self {
            peer_id: u32::from_be_bytes(id),
        })
    }

    /// Parses a handshake and checks that it came from `expected_id`.
    pub fn validate(data: &[u8], expected_id: u32) -> Result<Self, PeerError> {
        let handshake = Self::decode(data)?;
        if handshake.peer_id != expected_id {
            return Err(PeerError::HandshakeIdMismatch {
                expected: expected_id,
                actual: handshake.peer_id,
            });
        }
        Ok(handshake)
    }

    /// Boolean form of [`validate`](Self::validate). The rejection reason is
    /// logged at debug level.
    pub fn is_valid(data: &[u8], expected_id: u32) -> bool {
        match Self::validate(data, expected_id) {
            Ok(_) => true,
            Err(e) => {
                debug!(expected = expected_id, error = %e, "rejected handshake");
                false
            }
        }
    }
}
