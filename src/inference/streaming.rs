//! Streaming output
//!
//! Messages sent from a generation worker, and the UTF-8 accumulator that turns
//! raw token pieces into printable text.

use crate::inference::engine::GenerationStats;

/// A message from a streaming generation
#[derive(Debug, Clone)]
pub enum StreamToken {
    /// A decoded text fragment
    Token(String),
    /// Generation finished
    Done(GenerationStats),
    /// Generation failed; no further messages follow
    Error(String),
}

/// Buffers token bytes until they form valid UTF-8.
///
/// A single character can be split across several tokens, so pieces are only
/// released once the accumulated bytes decode cleanly.
#[derive(Debug, Default)]
pub struct TokenUtf8Buffer(Vec<u8>);

impl TokenUtf8Buffer {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Add a token's bytes. Returns text once the buffer holds complete UTF-8.
    pub fn push(&mut self, piece: &[u8]) -> Option<String> {
        self.0.extend_from_slice(piece);
        match std::str::from_utf8(&self.0) {
            Ok(s) => {
                let out = s.to_owned();
                self.0.clear();
                if out.is_empty() {
                    None
                } else {
                    Some(out)
                }
            }
            Err(e) if e.error_len().is_some() => {
                // Invalid rather than incomplete: nothing later can repair it.
                let out = String::from_utf8_lossy(&self.0).into_owned();
                self.0.clear();
                Some(out)
            }
            Err(_) => None,
        }
    }

    /// Release whatever is left, replacing an incomplete tail.
    pub fn flush(&mut self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        let out = String::from_utf8_lossy(&self.0).into_owned();
        self.0.clear();
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut buf = TokenUtf8Buffer::new();
        assert_eq!(buf.push(b"Hello").as_deref(), Some("Hello"));
        assert_eq!(buf.push(b" world").as_deref(), Some(" world"));
        assert_eq!(buf.flush(), None);
    }

    #[test]
    fn test_split_multibyte_character() {
        // "é" is 0xC3 0xA9
        let mut buf = TokenUtf8Buffer::new();
        assert_eq!(buf.push(&[0xC3]), None);
        assert_eq!(buf.push(&[0xA9]).as_deref(), Some("é"));
    }

    #[test]
    fn test_split_emoji_across_three_tokens() {
        let bytes = "🦀".as_bytes();
        let mut buf = TokenUtf8Buffer::new();
        assert_eq!(buf.push(&bytes[..1]), None);
        assert_eq!(buf.push(&bytes[1..3]), None);
        assert_eq!(buf.push(&bytes[3..]).as_deref(), Some("🦀"));
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut buf = TokenUtf8Buffer::new();
        assert_eq!(buf.push(&[0xFF, b'a']).as_deref(), Some("\u{FFFD}a"));
    }

    #[test]
    fn test_flush_incomplete_tail() {
        let mut buf = TokenUtf8Buffer::new();
        assert_eq!(buf.push(&[0xE2, 0x82]), None);
        assert_eq!(buf.flush().as_deref(), Some("\u{FFFD}"));
        assert_eq!(buf.flush(), None);
    }
}
