//! Length-prefix frame codec.
//!
//! Wire format:
//! ```text
//! ┌────────────┬───────────────────────────┐
//! │ Length (4B)│ postcard payload (N B)    │
//! │ LE u32     │                           │
//! └────────────┴───────────────────────────┘
//! ```
//!
//! The decoder accumulates incoming bytes and queues complete frames.  A
//! single `read` may return part of the header, part of the payload, or
//! several frames back to back; bytes past the end of one frame are kept
//! for the next.

use std::collections::VecDeque;

use crate::error::{ProtocolError, Result};

use super::IpcMessage;

/// Maximum frame payload size (protects against memory exhaustion).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Frame header size (4-byte little-endian length).
const HEADER_SIZE: usize = 4;

/// Decoder state machine.
enum DecoderState {
    /// Waiting for header bytes.
    ReadingHeader { collected: usize },
    /// Header received, reading payload.
    ReadingPayload { expected: usize },
}

/// Streaming frame decoder.
pub struct FrameDecoder {
    state: DecoderState,
    header_buf: [u8; HEADER_SIZE],
    payload: Vec<u8>,
    ready: VecDeque<Vec<u8>>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::ReadingHeader { collected: 0 },
            header_buf: [0; HEADER_SIZE],
            payload: Vec::new(),
            ready: VecDeque::new(),
        }
    }

    /// Feed bytes into the decoder, queueing every frame they complete.
    ///
    /// A bad length prefix is fatal: the stream cannot be resynchronised.
    pub fn feed(&mut self, data: &[u8]) -> core::result::Result<(), ProtocolError> {
        let mut offset = 0;

        while offset < data.len() {
            match &mut self.state {
                DecoderState::ReadingHeader { collected } => {
                    let needed = HEADER_SIZE - *collected;
                    let to_copy = needed.min(data.len() - offset);

                    self.header_buf[*collected..*collected + to_copy]
                        .copy_from_slice(&data[offset..offset + to_copy]);

                    *collected += to_copy;
                    offset += to_copy;

                    if *collected == HEADER_SIZE {
                        let expected = u32::from_le_bytes(self.header_buf) as usize;
                        if expected == 0 {
                            return Err(ProtocolError::EmptyFrame);
                        }
                        if expected > MAX_FRAME_SIZE {
                            return Err(ProtocolError::FrameTooLarge(expected));
                        }
                        self.payload = Vec::with_capacity(expected);
                        self.state = DecoderState::ReadingPayload { expected };
                    }
                }

                DecoderState::ReadingPayload { expected } => {
                    let needed = *expected - self.payload.len();
                    let to_copy = needed.min(data.len() - offset);

                    self.payload
                        .extend_from_slice(&data[offset..offset + to_copy]);
                    offset += to_copy;

                    if self.payload.len() == *expected {
                        self.ready.push_back(std::mem::take(&mut self.payload));
                        self.state = DecoderState::ReadingHeader { collected: 0 };
                    }
                }
            }
        }
        Ok(())
    }

    /// Next complete frame payload, if any.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.ready.pop_front()
    }

    /// Drop partial input and queued frames.
    pub fn reset(&mut self) {
        self.state = DecoderState::ReadingHeader { collected: 0 };
        self.payload.clear();
        self.ready.clear();
    }
}

/// Wrap a payload into a length-prefixed frame.
pub fn encode_frame(payload: &[u8]) -> core::result::Result<Vec<u8>, ProtocolError> {
    if payload.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Serialise and frame one message.
pub fn encode_message(msg: &IpcMessage) -> Result<Vec<u8>> {
    let payload = postcard::to_allocvec(msg).map_err(ProtocolError::Encode)?;
    Ok(encode_frame(&payload)?)
}

/// Decode one frame payload and check its args match its command.
///
/// An unknown command tag fails here as a decode error.
pub fn decode_message(payload: &[u8]) -> Result<IpcMessage> {
    let msg: IpcMessage = postcard::from_bytes(payload).map_err(ProtocolError::Decode)?;
    msg.validate()?;
    Ok(msg)
}
