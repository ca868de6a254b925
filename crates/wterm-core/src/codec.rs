//! Fixed binary framing for the wterm socket.
//!
//! Wire format: `[2-byte LE opcode][2-byte LE session id][payload]`.
//! The socket is message oriented, so a frame is always one whole message.

use crate::error::{WtermError, WtermResult};

/// Size of the opcode + session id header.
pub const HEADER_LEN: usize = 4;

/// One undecoded frame: header fields plus the opcode-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u16,
    pub session_id: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: u16, session_id: u16, payload: Vec<u8>) -> Self {
        Self {
            opcode,
            session_id,
            payload,
        }
    }

    /// Serialize into a single socket message.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.opcode.to_le_bytes());
        buf.extend_from_slice(&self.session_id.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a socket message. Fails only when the header is truncated.
    pub fn decode(data: &[u8]) -> WtermResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(WtermError::Codec(format!(
                "frame too short: {} bytes (need at least {HEADER_LEN})",
                data.len()
            )));
        }
        Ok(Self {
            opcode: u16::from_le_bytes([data[0], data[1]]),
            session_id: u16::from_le_bytes([data[2], data[3]]),
            payload: data[HEADER_LEN..].to_vec(),
        })
    }
}
