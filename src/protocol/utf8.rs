//! Incremental UTF-8 validation for fragmented text messages.
//!
//! A multi-byte sequence may straddle a fragment boundary; the validator
//! carries at most three bytes of an unfinished sequence into the next call.

use crate::error::{Error, Result};

/// Width of the sequence introduced by a valid lead byte.
const fn sequence_width(lead: u8) -> usize {
    match lead {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => 1,
    }
}

/// Incremental UTF-8 validator.
#[derive(Debug, Clone, Default)]
pub struct Utf8Validator {
    pending: [u8; 4],
    pending_len: usize,
}

impl Utf8Validator {
    /// Create a validator with no carried bytes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the next fragment.
    ///
    /// With `is_final` false an unfinished trailing sequence is carried over;
    /// with `is_final` true everything must be complete.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUtf8` as soon as the bytes seen so far cannot be
    /// the prefix of valid UTF-8.
    pub fn feed(&mut self, data: &[u8], is_final: bool) -> Result<()> {
        let mut rest = data;

        if self.pending_len > 0 {
            let need = sequence_width(self.pending[0]) - self.pending_len;
            let take = need.min(rest.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&rest[..take]);
            self.pending_len += take;
            rest = &rest[take..];

            match std::str::from_utf8(&self.pending[..self.pending_len]) {
                Ok(_) => self.pending_len = 0,
                Err(e) if e.error_len().is_none() && !is_final => return Ok(()),
                Err(_) => return Err(Error::InvalidUtf8),
            }
        }

        match std::str::from_utf8(rest) {
            Ok(_) => Ok(()),
            Err(e) if e.error_len().is_none() && !is_final => {
                let tail = &rest[e.valid_up_to()..];
                self.pending[..tail.len()].copy_from_slice(tail);
                self.pending_len = tail.len();
                Ok(())
            }
            Err(_) => Err(Error::InvalidUtf8),
        }
    }

    /// Discard any carried bytes.
    pub fn reset(&mut self) {
        self.pending_len = 0;
    }

    /// Whether an unfinished sequence is being carried.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending_len > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_ascii_and_multibyte() {
        let mut v = Utf8Validator::new();
        assert!(v.feed("héllo wörld 🎉".as_bytes(), true).is_ok());
        assert!(!v.has_pending());
    }

    #[test]
    fn test_sequence_split_across_fragments() {
        let bytes = "🎉".as_bytes();
        let mut v = Utf8Validator::new();
        assert!(v.feed(&bytes[..1], false).is_ok());
        assert!(v.has_pending());
        assert!(v.feed(&bytes[1..3], false).is_ok());
        assert!(v.has_pending());
        assert!(v.feed(&bytes[3..], true).is_ok());
        assert!(!v.has_pending());
    }

    #[test]
    fn test_split_then_more_text() {
        let mut v = Utf8Validator::new();
        assert!(v.feed(&[b'a', 0xc3], false).is_ok());
        assert!(v.feed(&[0xa9, b'b', b'c'], true).is_ok());
    }

    #[test]
    fn test_truncated_final_fragment() {
        let mut v = Utf8Validator::new();
        assert!(v.feed(&[0xe2, 0x82], false).is_ok());
        assert_eq!(v.feed(&[], true), Err(Error::InvalidUtf8));
    }

    #[test]
    fn test_invalid_continuation_after_carry() {
        let mut v = Utf8Validator::new();
        assert!(v.feed(&[0xe2], false).is_ok());
        assert_eq!(v.feed(&[0x41], false), Err(Error::InvalidUtf8));
    }

    #[test]
    fn test_invalid_bytes_fail_immediately() {
        let mut v = Utf8Validator::new();
        assert_eq!(v.feed(&[0x80, 0x81], false), Err(Error::InvalidUtf8));
        let mut v = Utf8Validator::new();
        assert_eq!(v.feed(&[0xed, 0xa0, 0x80], false), Err(Error::InvalidUtf8));
    }

    #[test]
    fn test_reset() {
        let mut v = Utf8Validator::new();
        v.feed(&[0xf0, 0x9f], false).unwrap();
        v.reset();
        assert!(!v.has_pending());
        assert!(v.feed(b"ok", true).is_ok());
    }
}
