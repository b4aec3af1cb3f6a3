//! Reassembly of fragmented data frames into messages (RFC 6455 Section 5.4).

use bytes::BytesMut;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::utf8::Utf8Validator;
use crate::protocol::{Frame, OpCode};

/// Reassembles data frames into complete messages.
///
/// Holds at most one in-progress message. Control frames must be routed
/// elsewhere; pushing one is a programming error reported as a violation.
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    fragment_count: usize,
    opcode: Option<OpCode>,
    utf8: Utf8Validator,
    limits: Limits,
}

impl MessageAssembler {
    /// Create an empty assembler enforcing `limits`.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: BytesMut::new(),
            fragment_count: 0,
            opcode: None,
            utf8: Utf8Validator::new(),
            limits,
        }
    }

    /// Add a data frame.
    ///
    /// Returns `Some(message)` when the frame carries FIN, `None` while the
    /// message is still in progress.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a continuation with nothing in
    ///   progress, or a new Text/Binary frame while a message is in progress
    /// - `Error::TooManyFragments` / `Error::MessageTooLarge` past the limits
    /// - `Error::InvalidUtf8` for a text message that is not UTF-8
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        match (frame.opcode, self.opcode) {
            (OpCode::Continuation, None) => {
                return Err(Error::ProtocolViolation(
                    "continuation frame with no message in progress".into(),
                ));
            }
            (OpCode::Continuation, Some(_)) => {}
            (OpCode::Text | OpCode::Binary, None) => self.opcode = Some(frame.opcode),
            (OpCode::Text | OpCode::Binary, Some(_)) => {
                return Err(Error::ProtocolViolation(
                    "new data frame while a fragmented message is in progress".into(),
                ));
            }
            (opcode, _) => {
                return Err(Error::ProtocolViolation(format!(
                    "control frame {opcode} routed to the assembler"
                )));
            }
        }

        self.fragment_count += 1;
        self.limits.check_fragment_count(self.fragment_count)?;
        self.limits
            .check_message_size(self.buffer.len() + frame.payload().len())?;

        if self.opcode == Some(OpCode::Text) {
            self.utf8.feed(frame.payload(), frame.fin)?;
        }

        self.buffer.extend_from_slice(frame.payload());

        if !frame.fin {
            return Ok(None);
        }

        let payload = self.buffer.split().to_vec();
        let opcode = self.opcode.take();
        self.fragment_count = 0;
        self.utf8.reset();

        let message = match opcode {
            // Validated incrementally above.
            Some(OpCode::Text) => {
                Message::Text(String::from_utf8(payload).map_err(|_| Error::InvalidUtf8)?)
            }
            _ => Message::Binary(payload),
        };
        Ok(Some(message))
    }

    /// Whether a fragmented message is in progress.
    #[must_use]
    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    /// Drop any in-progress message.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.fragment_count = 0;
        self.opcode = None;
        self.utf8.reset();
    }
}
