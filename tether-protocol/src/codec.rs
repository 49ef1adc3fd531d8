//! Signal codec for connection framing
//!
//! Each signal travels as a 4-byte big-endian length prefix followed by its
//! bincode encoding.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::signal::Signal;

/// Maximum signal size (16 MB)
pub const MAX_SIGNAL_SIZE: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// A complete frame whose payload is not a valid signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedSignal {
    /// Payload length of the rejected frame
    pub len: usize,
    pub reason: String,
}

impl std::fmt::Display for MalformedSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed signal ({} bytes): {}", self.len, self.reason)
    }
}

/// Strict codec: a malformed payload is a stream error
///
/// Used by clients, where a garbled server frame is not worth recovering from.
#[derive(Debug, Default)]
pub struct SignalCodec;

impl SignalCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for SignalCodec {
    type Item = Signal;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match take_frame(src)? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }
}

impl Encoder<Signal> for SignalCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Signal, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_signal(&item, dst)
    }
}

/// Lenient codec: a malformed payload is yielded as an item
///
/// The frame is consumed either way, so the stream stays aligned and the
/// server can report the fault and keep reading. Only framing problems
/// (IO, oversized length prefix) surface as errors.
#[derive(Debug, Default)]
pub struct LenientSignalCodec;

impl LenientSignalCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for LenientSignalCodec {
    type Item = Result<Signal, MalformedSignal>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(data) = take_frame(src)? else {
            return Ok(None);
        };
        let decoded = bincode::deserialize::<Signal>(&data).map_err(|e| MalformedSignal {
            len: data.len(),
            reason: e.to_string(),
        });
        Ok(Some(decoded))
    }
}

impl Encoder<Signal> for LenientSignalCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Signal, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_signal(&item, dst)
    }
}

/// Split one length-prefixed frame off the buffer
fn take_frame(src: &mut BytesMut) -> Result<Option<BytesMut>, CodecError> {
    // Need at least 4 bytes for length prefix
    if src.len() < LEN_PREFIX {
        return Ok(None);
    }

    // Peek at length without consuming
    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

    if len > MAX_SIGNAL_SIZE {
        return Err(CodecError::MessageTooLarge {
            size: len,
            max: MAX_SIGNAL_SIZE,
        });
    }

    if src.len() < LEN_PREFIX + len {
        // Reserve space for the rest of the frame
        src.reserve(LEN_PREFIX + len - src.len());
        return Ok(None);
    }

    src.advance(LEN_PREFIX);
    Ok(Some(src.split_to(len)))
}

fn encode_signal(item: &Signal, dst: &mut BytesMut) -> Result<(), CodecError> {
    let data = bincode::serialize(item)?;

    if data.len() > MAX_SIGNAL_SIZE {
        return Err(CodecError::MessageTooLarge {
            size: data.len(),
            max: MAX_SIGNAL_SIZE,
        });
    }

    dst.reserve(LEN_PREFIX + data.len());
    dst.put_u32(data.len() as u32);
    dst.put_slice(&data);
    Ok(())
}
