//! Packet framing over a byte stream.
//!
//! `FrameBuffer` is a pure accumulator: the session's read loop pushes
//! whatever the socket produced and drains complete packets. A length field
//! outside `9..=max_packet` poisons the buffer -- framing cannot resynchronize
//! inside a corrupt stream, so the connection must be dropped.

use crate::packet::{HEADER_LEN, MAX_PACKET_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame length {0} below minimum {HEADER_LEN}")]
    LengthBelowMinimum(u16),
    #[error("frame length {length} exceeds maximum {max}")]
    LengthAboveMaximum { length: u16, max: usize },
}

#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    max_packet: usize,
    poisoned: Option<FrameError>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_max_packet(MAX_PACKET_LEN)
    }

    /// Cap the accepted frame size below the protocol maximum.
    pub fn with_max_packet(max_packet: usize) -> Self {
        FrameBuffer {
            buf: Vec::new(),
            max_packet,
            poisoned: None,
        }
    }

    /// Append bytes read from the peer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet emitted as frames.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete packet, or `None` if more bytes are needed.
    ///
    /// Once a length violation is seen the buffer is poisoned and every
    /// subsequent call returns the same error.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        if let Some(err) = self.poisoned {
            return Err(err);
        }
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let length = u16::from_be_bytes([self.buf[3], self.buf[4]]);
        if (length as usize) < HEADER_LEN {
            return Err(self.poison(FrameError::LengthBelowMinimum(length)));
        }
        if length as usize > self.max_packet {
            return Err(self.poison(FrameError::LengthAboveMaximum {
                length,
                max: self.max_packet,
            }));
        }
        if self.buf.len() < length as usize {
            return Ok(None);
        }
        let frame: Vec<u8> = self.buf.drain(..length as usize).collect();
        Ok(Some(frame))
    }

    fn poison(&mut self, err: FrameError) -> FrameError {
        self.poisoned = Some(err);
        err
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
