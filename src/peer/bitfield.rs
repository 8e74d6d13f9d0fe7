use bytes::Bytes;

/// A bitfield representing which pieces a peer has.
///
/// Bit `j` of byte `i` (bit 0 being the least significant) stands for piece
/// `i * 8 + j`; a set bit means the piece is available. So the byte `0x04`
/// at index 0 marks piece 2, and `0xff` at index 1 marks pieces 8 through
/// 15.
///
/// Equality compares the raw bytes, so a bitfield built from booleans equals
/// one built from the bytes it encodes to.
///
/// # Examples
///
/// ```
/// use peerlink::peer::Bitfield;
///
/// let bf = Bitfield::from_bytes(&[4, 255]);
/// assert!(!bf.has_piece(0));
/// assert!(bf.has_piece(2));
/// assert!((8..16).all(|i| bf.has_piece(i)));
///
/// let mut flags = [false; 13];
/// flags[0] = true;
/// flags[10] = true;
/// assert_eq!(Bitfield::from_bools(&flags), Bitfield::from_bytes(&[1, 4]));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Bitfield {
    bits: Vec<u8>,
}

impl Bitfield {
    /// Creates an empty bitfield with room for `piece_count` pieces.
    pub fn new(piece_count: usize) -> Self {
        Self {
            bits: vec![0; piece_count.div_ceil(8)],
        }
    }

    /// Creates a bitfield from its wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bits: bytes.to_vec(),
        }
    }

    /// Creates a bitfield where `flags[k]` sets piece `k`.
    ///
    /// The result is `flags.len()` rounded up to whole bytes; trailing bits
    /// are zero.
    pub fn from_bools(flags: &[bool]) -> Self {
        let mut bf = Self::new(flags.len());
        for (index, &set) in flags.iter().enumerate() {
            if set {
                bf.set_piece(index);
            }
        }
        bf
    }

    /// Creates a full bitfield (all `piece_count` pieces available).
    pub fn full(piece_count: usize) -> Self {
        let mut bf = Self {
            bits: vec![0xFF; piece_count.div_ceil(8)],
        };
        bf.clear_spare_bits(piece_count);
        bf
    }

    /// Returns true if the piece at the given index is available.
    ///
    /// Indices past the end of the bitfield are reported as missing.
    pub fn has_piece(&self, index: usize) -> bool {
        match self.bits.get(index / 8) {
            Some(byte) => (byte >> (index % 8)) & 1 == 1,
            None => false,
        }
    }

    /// Sets the bit for the piece at the given index. Out-of-range indices
    /// are ignored.
    pub fn set_piece(&mut self, index: usize) {
        if let Some(byte) = self.bits.get_mut(index / 8) {
            *byte |= 1 << (index % 8);
        }
    }

    /// Clears the bit for the piece at the given index.
    pub fn clear_piece(&mut self, index: usize) {
        if let Some(byte) = self.bits.get_mut(index / 8) {
            *byte &= !(1 << (index % 8));
        }
    }

    /// Returns the number of pieces that are available.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Returns true if the first `piece_count` pieces are all available.
    pub fn is_complete(&self, piece_count: usize) -> bool {
        (0..piece_count).all(|i| self.has_piece(i))
    }

    /// Returns true if no pieces are available.
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    /// Number of piece slots, i.e. eight per byte.
    pub fn capacity(&self) -> usize {
        self.bits.len() * 8
    }

    /// Returns the raw bytes of the bitfield.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Converts the bitfield to owned bytes.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    /// Returns indices of pieces that this bitfield has but `ours` doesn't.
    pub fn missing_pieces(&self, ours: &Bitfield) -> Vec<usize> {
        (0..self.capacity())
            .filter(|&i| self.has_piece(i) && !ours.has_piece(i))
            .collect()
    }

    /// Returns indices of all available pieces.
    pub fn available_pieces(&self) -> Vec<usize> {
        (0..self.capacity()).filter(|&i| self.has_piece(i)).collect()
    }

    /// Clears the bits in the last byte that lie past `piece_count`.
    fn clear_spare_bits(&mut self, piece_count: usize) {
        let spare = self.capacity() - piece_count;
        if spare > 0 && spare < 8 {
            if let Some(last) = self.bits.last_mut() {
                *last &= 0xFFu8 >> spare;
            }
        }
    }
}

impl From<Bytes> for Bitfield {
    fn from(bytes: Bytes) -> Self {
        Self {
            bits: bytes.to_vec(),
        }
    }
}
