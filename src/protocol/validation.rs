//! Header validation for incoming frames (RFC 6455).
//!
//! Runs on the header alone, before the payload is buffered:
//! - Masking rules per RFC 6455 Section 5.1
//! - RSV bits (no extensions are ever negotiated)
//! - Control frame shape per Section 5.5
//! - Frame size limits

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::frame::{FrameHeader, MAX_CONTROL_FRAME_PAYLOAD};

/// Validator for incoming frame headers.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    limits: Limits,
    /// Frames from a server are unmasked; reading client frames (loopback
    /// tooling) flips this.
    expect_masked: bool,
}

impl FrameValidator {
    /// Validator for frames sent by a server.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            expect_masked: false,
        }
    }

    /// Require masked frames instead of rejecting them.
    #[must_use]
    pub fn expect_masked(mut self, expect: bool) -> Self {
        self.expect_masked = expect;
        self
    }

    /// Validate a decoded header.
    ///
    /// # Errors
    ///
    /// - `Error::MaskedServerFrame` - a server frame carried a masking key
    /// - `Error::InvalidFrame` - an unmasked frame where masking is required
    /// - `Error::ReservedBitsSet` - RSV bits set without negotiated extension
    /// - `Error::FragmentedControlFrame` / `Error::ControlFrameTooLarge`
    /// - `Error::FrameTooLarge` - declared length exceeds the limit
    pub fn validate_header(&self, header: &FrameHeader) -> Result<()> {
        self.validate_masking(header.mask.is_some())?;
        Self::validate_rsv_bits(header.rsv1, header.rsv2, header.rsv3)?;

        if header.opcode.is_control() {
            if !header.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if header.payload_len > MAX_CONTROL_FRAME_PAYLOAD as u64 {
                return Err(Error::ControlFrameTooLarge(header.payload_len as usize));
            }
        }

        self.limits.check_frame_size(header.payload_len)
    }

    fn validate_masking(&self, masked: bool) -> Result<()> {
        match (self.expect_masked, masked) {
            (false, true) => Err(Error::MaskedServerFrame),
            (true, false) => Err(Error::InvalidFrame("unmasked client frame".into())),
            _ => Ok(()),
        }
    }

    fn validate_rsv_bits(rsv1: bool, rsv2: bool, rsv3: bool) -> Result<()> {
        if rsv1 || rsv2 || rsv3 {
            return Err(Error::ReservedBitsSet);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;

    fn header(opcode: OpCode, fin: bool, masked: bool, payload_len: u64) -> FrameHeader {
        FrameHeader {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask: masked.then_some([0; 4]),
            payload_len,
            header_len: 2,
        }
    }

    #[test]
    fn test_accepts_unmasked_server_frame() {
        let validator = FrameValidator::new(Limits::default());
        assert!(validator
            .validate_header(&header(OpCode::Text, true, false, 10))
            .is_ok());
    }

    #[test]
    fn test_rejects_masked_server_frame() {
        let validator = FrameValidator::new(Limits::default());
        let result = validator.validate_header(&header(OpCode::Text, true, true, 10));
        assert!(matches!(result, Err(Error::MaskedServerFrame)));
    }

    #[test]
    fn test_expect_masked_rejects_unmasked() {
        let validator = FrameValidator::new(Limits::default()).expect_masked(true);
        assert!(validator
            .validate_header(&header(OpCode::Binary, true, true, 10))
            .is_ok());
        assert!(matches!(
            validator.validate_header(&header(OpCode::Binary, true, false, 10)),
            Err(Error::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_rsv_bits_rejected() {
        let validator = FrameValidator::new(Limits::default());
        for (r1, r2, r3) in [(true, false, false), (false, true, false), (false, false, true)] {
            let mut h = header(OpCode::Text, true, false, 0);
            h.rsv1 = r1;
            h.rsv2 = r2;
            h.rsv3 = r3;
            assert!(matches!(
                validator.validate_header(&h),
                Err(Error::ReservedBitsSet)
            ));
        }
    }

    #[test]
    fn test_control_frame_rules() {
        let validator = FrameValidator::new(Limits::default());
        assert!(validator
            .validate_header(&header(OpCode::Ping, true, false, 125))
            .is_ok());
        assert!(matches!(
            validator.validate_header(&header(OpCode::Pong, true, false, 126)),
            Err(Error::ControlFrameTooLarge(126))
        ));
        assert!(matches!(
            validator.validate_header(&header(OpCode::Close, false, false, 0)),
            Err(Error::FragmentedControlFrame)
        ));
    }

    #[test]
    fn test_frame_size_limit() {
        let validator = FrameValidator::new(Limits::new(1000, 4000, 4, 1024));
        assert!(validator
            .validate_header(&header(OpCode::Binary, true, false, 1000))
            .is_ok());
        assert!(matches!(
            validator.validate_header(&header(OpCode::Binary, true, false, 1001)),
            Err(Error::FrameTooLarge { size: 1001, max: 1000 })
        ));
    }
}
