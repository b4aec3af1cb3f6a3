//! WebSocket protocol core (RFC 6455): framing, masking, validation,
//! reassembly and the opening handshake.

pub mod assembler;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod utf8;
pub mod validation;

pub use assembler::MessageAssembler;
pub use frame::{Decoded, Frame, FrameHeader, MAX_CONTROL_FRAME_PAYLOAD};
pub use handshake::{
    HandshakeRequest, HandshakeResponse, Negotiated, WS_GUID, compute_accept_key, generate_key,
    negotiate,
};
pub use mask::{apply_mask, generate_mask};
pub use opcode::OpCode;
pub use utf8::Utf8Validator;
pub use validation::FrameValidator;
