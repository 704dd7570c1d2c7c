//! Length-prefixed CBOR framing for tunnel streams.
//!
//! Wire format: `[4-byte big-endian length][CBOR frame]`

use std::io::Cursor;

use crate::error::CommsResult;
use crate::messages::Frame;

/// Encode a frame into a length-prefixed CBOR block.
pub fn frame_encode(frame: &Frame) -> CommsResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(frame, &mut payload)?;

    let len = payload.len() as u32;
    let mut block = Vec::with_capacity(4 + payload.len());
    block.extend_from_slice(&len.to_be_bytes());
    block.extend(payload);
    Ok(block)
}

/// Decode a CBOR payload (without the length prefix) into a frame.
pub fn frame_decode(data: &[u8]) -> CommsResult<Frame> {
    let frame: Frame = ciborium::from_reader(Cursor::new(data))?;
    Ok(frame)
}

/// Streaming decoder: accumulates bytes and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed bytes in and return every frame that is now complete.
    pub fn feed(&mut self, data: &[u8]) -> CommsResult<Vec<Frame>> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            if self.buffer.len() < 4 {
                break;
            }
            let len =
                u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                    as usize;

            if self.buffer.len() < 4 + len {
                break;
            }

            frames.push(frame_decode(&self.buffer[4..4 + len])?);
            self.buffer.drain(..4 + len);
        }

        Ok(frames)
    }

    /// Drop any partially accumulated frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
