//! WebSocket frame encoding and resumable decoding (RFC 6455 Section 5.2).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask;
use crate::protocol::validation::FrameValidator;

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Decoded fixed part of a frame, available before the payload arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bit 1.
    pub rsv1: bool,
    /// Reserved bit 2.
    pub rsv2: bool,
    /// Reserved bit 3.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key, if the MASK bit is set.
    pub mask: Option<[u8; 4]>,
    /// Declared payload length.
    pub payload_len: u64,
    /// Header length including extended length and masking key.
    pub header_len: usize,
}

enum HeaderParse {
    Header(FrameHeader),
    Incomplete(usize),
}

fn parse_header(buf: &[u8]) -> Result<HeaderParse> {
    if buf.len() < 2 {
        return Ok(HeaderParse::Incomplete(2 - buf.len()));
    }

    let byte0 = buf[0];
    let byte1 = buf[1];
    let opcode = OpCode::from_u8(byte0 & 0x0F)?;
    let masked = (byte1 & 0x80) != 0;

    let (payload_len, len_size) = match byte1 & 0x7F {
        len @ 0..=125 => (u64::from(len), 0),
        126 => {
            if buf.len() < 4 {
                return Ok(HeaderParse::Incomplete(4 - buf.len()));
            }
            (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 2)
        }
        _ => {
            if buf.len() < 10 {
                return Ok(HeaderParse::Incomplete(10 - buf.len()));
            }
            let mut len = [0u8; 8];
            len.copy_from_slice(&buf[2..10]);
            let len = u64::from_be_bytes(len);
            if len >> 63 != 0 {
                return Err(Error::InvalidFrame(
                    "64-bit payload length has its most significant bit set".into(),
                ));
            }
            (len, 8)
        }
    };

    let mask_offset = 2 + len_size;
    let header_len = if masked { mask_offset + 4 } else { mask_offset };
    if buf.len() < header_len {
        return Ok(HeaderParse::Incomplete(header_len - buf.len()));
    }

    let mask = masked.then(|| {
        [
            buf[mask_offset],
            buf[mask_offset + 1],
            buf[mask_offset + 2],
            buf[mask_offset + 3],
        ]
    });

    Ok(HeaderParse::Header(FrameHeader {
        fin: (byte0 & 0x80) != 0,
        rsv1: (byte0 & 0x40) != 0,
        rsv2: (byte0 & 0x20) != 0,
        rsv3: (byte0 & 0x10) != 0,
        opcode,
        mask,
        payload_len,
        header_len,
    }))
}

/// Outcome of a decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame and the number of bytes it occupied.
    Frame {
        /// The decoded frame, payload already unmasked.
        frame: Frame,
        /// Bytes consumed from the front of the buffer.
        consumed: usize,
    },
    /// The buffer holds a prefix of a frame; retry once `needed` more bytes
    /// (at least) have arrived.
    Incomplete {
        /// Minimum number of additional bytes required.
        needed: usize,
    },
}

/// A WebSocket frame.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                     Masking key (if present)                  |
/// +---------------------------------------------------------------+
/// |                          Payload data                         |
/// +---------------------------------------------------------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bit 1. Must be 0, no extensions are negotiated.
    pub rsv1: bool,
    /// Reserved bit 2.
    pub rsv2: bool,
    /// Reserved bit 3.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            payload: payload.into(),
        }
    }

    /// Final text frame.
    #[must_use]
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, data)
    }

    /// Final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, data)
    }

    /// Close frame with a raw payload (see [`CloseFrame::encode`](crate::CloseFrame::encode)).
    #[must_use]
    pub fn close(payload: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Close, payload)
    }

    /// Ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, data)
    }

    /// Pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, data)
    }

    /// Payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// The header is validated as soon as it is available, so an oversized or
    /// malformed frame is rejected before its payload is buffered. Never
    /// blocks: a short buffer yields [`Decoded::Incomplete`].
    ///
    /// # Errors
    ///
    /// - `Error::InvalidOpcode` / `Error::ReservedOpcode` for unknown opcodes
    /// - `Error::ReservedBitsSet`, `Error::MaskedServerFrame`,
    ///   `Error::FragmentedControlFrame`, `Error::ControlFrameTooLarge`,
    ///   `Error::FrameTooLarge` from the validator
    /// - `Error::InvalidFrame` for a malformed length field
    pub fn decode(buf: &[u8], validator: &FrameValidator) -> Result<Decoded> {
        let header = match parse_header(buf)? {
            HeaderParse::Header(header) => header,
            HeaderParse::Incomplete(needed) => return Ok(Decoded::Incomplete { needed }),
        };
        validator.validate_header(&header)?;

        // The validator bounds payload_len by a usize limit.
        let total = header.header_len + header.payload_len as usize;
        if buf.len() < total {
            return Ok(Decoded::Incomplete {
                needed: total - buf.len(),
            });
        }

        let mut payload = BytesMut::from(&buf[header.header_len..total]);
        if let Some(mask) = header.mask {
            apply_mask(&mut payload, mask);
        }

        Ok(Decoded::Frame {
            frame: Self::from_header(&header, payload.freeze()),
            consumed: total,
        })
    }

    /// Decode one frame and split it off the front of `buf`.
    ///
    /// Unmasked payloads share `buf`'s allocation instead of being copied.
    /// Returns `Ok(None)` when more bytes are needed; `buf` is untouched then.
    ///
    /// # Errors
    ///
    /// Same as [`Frame::decode`].
    pub fn decode_from(buf: &mut BytesMut, validator: &FrameValidator) -> Result<Option<Self>> {
        let header = match parse_header(buf)? {
            HeaderParse::Header(header) => header,
            HeaderParse::Incomplete(_) => return Ok(None),
        };
        validator.validate_header(&header)?;

        let total = header.header_len + header.payload_len as usize;
        if buf.len() < total {
            return Ok(None);
        }

        let mut raw = buf.split_to(total);
        let payload = match header.mask {
            Some(mask) => {
                let mut payload = raw.split_off(header.header_len);
                apply_mask(&mut payload, mask);
                payload.freeze()
            }
            None => raw.freeze().slice(header.header_len..),
        };

        Ok(Some(Self::from_header(&header, payload)))
    }

    fn from_header(header: &FrameHeader, payload: Bytes) -> Self {
        Self {
            fin: header.fin,
            rsv1: header.rsv1,
            rsv2: header.rsv2,
            rsv3: header.rsv3,
            opcode: header.opcode,
            payload,
        }
    }

    /// Check an outgoing frame against RFC 6455 structural rules.
    ///
    /// # Errors
    ///
    /// - `Error::ReservedBitsSet` if RSV bits are set
    /// - `Error::FragmentedControlFrame` if a control frame has FIN=0
    /// - `Error::ControlFrameTooLarge` if a control payload exceeds 125 bytes
    pub fn validate(&self) -> Result<()> {
        if self.rsv1 || self.rsv2 || self.rsv3 {
            return Err(Error::ReservedBitsSet);
        }
        if self.opcode.is_control() {
            if !self.fin {
                return Err(Error::FragmentedControlFrame);
            }
            if self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(self.payload.len()));
            }
        }
        Ok(())
    }

    /// Number of bytes this frame occupies on the wire.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let payload_len = self.payload.len();
        let extended_len_size = if payload_len <= 125 {
            0
        } else if payload_len <= 65535 {
            2
        } else {
            8
        };
        let mask_size = if masked { 4 } else { 0 };
        2 + extended_len_size + mask_size + payload_len
    }

    /// Append the wire encoding of this frame to `dst`.
    ///
    /// With `Some(mask)` the MASK bit is set and the payload is XORed with
    /// the key; the frame's own payload is left unmasked.
    pub fn encode_into(&self, dst: &mut BytesMut, mask: Option<[u8; 4]>) {
        dst.reserve(self.wire_size(mask.is_some()));

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= 0x80;
        }
        if self.rsv1 {
            byte0 |= 0x40;
        }
        if self.rsv2 {
            byte0 |= 0x20;
        }
        if self.rsv3 {
            byte0 |= 0x10;
        }
        dst.put_u8(byte0);

        let mask_bit = if mask.is_some() { 0x80 } else { 0 };
        let payload_len = self.payload.len();
        if payload_len <= 125 {
            dst.put_u8(mask_bit | payload_len as u8);
        } else if payload_len <= 65535 {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(payload_len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(payload_len as u64);
        }

        match mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&self.payload);
                apply_mask(&mut dst[start..], key);
            }
            None => dst.put_slice(&self.payload),
        }
    }

    /// Encode this frame into a fresh buffer.
    #[must_use]
    pub fn encode(&self, mask: Option<[u8; 4]>) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.wire_size(mask.is_some()));
        self.encode_into(&mut buf, mask);
        buf.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;

    fn server_frames() -> FrameValidator {
        FrameValidator::new(Limits::default())
    }

    fn decode_complete(data: &[u8]) -> (Frame, usize) {
        match Frame::decode(data, &server_frames()).unwrap() {
            Decoded::Frame { frame, consumed } => (frame, consumed),
            Decoded::Incomplete { needed } => panic!("incomplete, need {needed}"),
        }
    }

    #[test]
    fn test_decode_unmasked_text_frame() {
        let data = &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f];
        let (frame, len) = decode_complete(data);
        assert_eq!(len, 7);
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload(), b"Hello");
    }

    #[test]
    fn test_decode_fragment_and_continuation() {
        let (first, _) = decode_complete(&[0x01, 0x03, 0x48, 0x65, 0x6c]);
        assert!(!first.fin);
        assert_eq!(first.opcode, OpCode::Text);

        let (last, _) = decode_complete(&[0x80, 0x02, 0x6c, 0x6f]);
        assert!(last.fin);
        assert_eq!(last.opcode, OpCode::Continuation);
        assert_eq!(last.payload(), b"lo");
    }

    #[test]
    fn test_decode_extended_length_16() {
        let mut data = vec![0x82, 0x7e, 0x01, 0x00];
        data.extend(vec![0xab; 256]);

        let (frame, len) = decode_complete(&data);
        assert_eq!(len, 4 + 256);
        assert_eq!(frame.payload().len(), 256);
        assert!(frame.payload().iter().all(|&b| b == 0xab));
    }

    #[test]
    fn test_decode_extended_length_64() {
        let mut data = vec![0x82, 0x7f];
        data.extend(65536u64.to_be_bytes());
        data.extend(vec![0xcd; 65536]);

        let (frame, len) = decode_complete(&data);
        assert_eq!(len, 10 + 65536);
        assert_eq!(frame.payload().len(), 65536);
    }

    #[test]
    fn test_decode_reports_incomplete() {
        let validator = server_frames();
        assert_eq!(
            Frame::decode(&[], &validator).unwrap(),
            Decoded::Incomplete { needed: 2 }
        );
        assert_eq!(
            Frame::decode(&[0x82, 0x7e, 0x01], &validator).unwrap(),
            Decoded::Incomplete { needed: 1 }
        );
        assert_eq!(
            Frame::decode(&[0x81, 0x05, b'H', b'e'], &validator).unwrap(),
            Decoded::Incomplete { needed: 3 }
        );
    }

    #[test]
    fn test_decode_leaves_following_bytes() {
        let data = [0x8a, 0x01, b'x', 0x81, 0x00];
        let (frame, consumed) = decode_complete(&data);
        assert_eq!(frame.opcode, OpCode::Pong);
        assert_eq!(consumed, 3);
        let (next, _) = decode_complete(&data[consumed..]);
        assert_eq!(next.opcode, OpCode::Text);
    }

    #[test]
    fn test_decode_rejects_reserved_bits() {
        let result = Frame::decode(&[0xc1, 0x00], &server_frames());
        assert!(matches!(result, Err(Error::ReservedBitsSet)));
    }

    #[test]
    fn test_decode_rejects_masked_server_frame() {
        let data = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let result = Frame::decode(&data, &server_frames());
        assert!(matches!(result, Err(Error::MaskedServerFrame)));
    }

    #[test]
    fn test_decode_masked_when_expected() {
        let data = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let validator = FrameValidator::new(Limits::default()).expect_masked(true);
        match Frame::decode(&data, &validator).unwrap() {
            Decoded::Frame { frame, consumed } => {
                assert_eq!(consumed, 11);
                assert_eq!(frame.payload(), b"Hello");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_oversized_before_payload() {
        let validator = FrameValidator::new(Limits::new(16, 1024, 4, 1024));
        // Header alone announces 256 bytes; no payload buffered yet.
        let result = Frame::decode(&[0x82, 0x7e, 0x01, 0x00], &validator);
        assert!(matches!(result, Err(Error::FrameTooLarge { size: 256, max: 16 })));
    }

    #[test]
    fn test_decode_rejects_64bit_msb() {
        let mut data = vec![0x82, 0x7f];
        data.extend((1u64 << 63).to_be_bytes());
        let result = Frame::decode(&data, &server_frames());
        assert!(matches!(result, Err(Error::InvalidFrame(_))));
    }

    #[test]
    fn test_decode_rejects_reserved_opcode() {
        let result = Frame::decode(&[0x83, 0x00], &server_frames());
        assert!(matches!(result, Err(Error::ReservedOpcode(0x3))));
    }

    #[test]
    fn test_decode_rejects_fragmented_ping() {
        let result = Frame::decode(&[0x09, 0x00], &server_frames());
        assert!(matches!(result, Err(Error::FragmentedControlFrame)));
    }

    #[test]
    fn test_decode_from_splits_buffer() {
        let mut buf = BytesMut::from(&[0x82, 0x02, 1, 2, 0x81][..]);
        let frame = Frame::decode_from(&mut buf, &server_frames())
            .unwrap()
            .unwrap();
        assert_eq!(frame.payload(), &[1, 2]);
        assert_eq!(&buf[..], &[0x81]);
        assert!(Frame::decode_from(&mut buf, &server_frames()).unwrap().is_none());
        assert_eq!(&buf[..], &[0x81]);
    }

    #[test]
    fn test_encode_masked_rfc_example() {
        let frame = Frame::text(&b"Hello"[..]);
        let bytes = frame.encode(Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(
            bytes,
            vec![0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
        assert_eq!(frame.payload(), b"Hello");
    }

    #[test]
    fn test_encode_length_tiers() {
        let f = Frame::binary(vec![0u8; 125]);
        assert_eq!(f.encode(None)[1], 125);

        let f = Frame::binary(vec![0u8; 126]);
        let bytes = f.encode(None);
        assert_eq!(bytes[1], 126);
        assert_eq!(&bytes[2..4], &126u16.to_be_bytes());

        let f = Frame::binary(vec![0u8; 65536]);
        let bytes = f.encode(Some([1, 2, 3, 4]));
        assert_eq!(bytes[1], 0x80 | 127);
        assert_eq!(&bytes[2..10], &65536u64.to_be_bytes());
        assert_eq!(bytes.len(), f.wire_size(true));
    }

    #[test]
    fn test_validate_outgoing_control() {
        assert!(Frame::ping(vec![0u8; 125]).validate().is_ok());
        assert!(matches!(
            Frame::ping(vec![0u8; 126]).validate(),
            Err(Error::ControlFrameTooLarge(126))
        ));
        assert!(matches!(
            Frame::new(false, OpCode::Close, Vec::new()).validate(),
            Err(Error::FragmentedControlFrame)
        ));
    }
}
