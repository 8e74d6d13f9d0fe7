//! Lossless conversion between raw bytes and text.
//!
//! Every byte maps to the `char` with the same code point (ISO-8859-1), so
//! all values `0..=255`, including NUL and bytes above `0x7f`, survive a
//! round trip unchanged. UTF-8 is not used: a byte such as
//! `0xff` is not valid UTF-8 on its own and would be lost or replaced.
//!
//! This backs the legacy whole-frame text view. Connections never go
//! through text; they move [`Bytes`](bytes::Bytes) end to end.

/// Maps each byte to the `char` with the same code point.
pub fn bytes_to_text(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Inverse of [`bytes_to_text`].
///
/// Returns `None` if `text` contains a character above `U+00FF`, which
/// has no single-byte form and therefore cannot have come from
/// [`bytes_to_text`].
pub fn text_to_bytes(text: &str) -> Option<Vec<u8>> {
    text.chars().map(|c| u8::try_from(c).ok()).collect()
}
