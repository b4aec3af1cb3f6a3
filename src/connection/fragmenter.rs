//! Message fragmentation for outgoing WebSocket messages (RFC 6455).

use bytes::Bytes;

use crate::protocol::{Frame, OpCode};

/// Splits one outgoing message into frames of at most `fragment_size` bytes.
///
/// The first frame carries the message opcode and every later frame is a
/// continuation. Only the last frame has `fin` set. Chunks are carved off the
/// payload with [`Bytes::split_to`], so no frame copies data.
pub struct MessageFragmenter {
    rest: Bytes,
    fragment_size: usize,
    // `None` once the final frame has been produced.
    next_opcode: Option<OpCode>,
}

impl MessageFragmenter {
    #[inline]
    #[must_use]
    pub fn new(payload: Bytes, opcode: OpCode, fragment_size: usize) -> Self {
        Self {
            rest: payload,
            fragment_size: fragment_size.max(1),
            next_opcode: Some(opcode),
        }
    }

    /// True when the message will need more than one frame.
    #[inline]
    #[must_use]
    pub fn needs_fragmentation(&self) -> bool {
        self.rest.len() > self.fragment_size
    }

    /// Payload bytes not yet handed out in a frame.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}

impl Iterator for MessageFragmenter {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        let opcode = self.next_opcode.take()?;
        let take = self.rest.len().min(self.fragment_size);
        let chunk = self.rest.split_to(take);
        let fin = self.rest.is_empty();
        if !fin {
            self.next_opcode = Some(OpCode::Continuation);
        }
        Some(Frame::new(fin, opcode, chunk))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = match self.next_opcode {
            None => 0,
            Some(_) => self.rest.len().div_ceil(self.fragment_size).max(1),
        };
        (n, Some(n))
    }
}
