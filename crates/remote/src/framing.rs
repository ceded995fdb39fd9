//! Length-delimited framing over a session's raw byte stream.
//!
//! Wire format: a 4-byte big-endian payload length followed by exactly that
//! many payload bytes. There is no type tag, magic number or checksum.
//!
//! By default the declared length is trusted as-is, so a peer can make the
//! reader buffer an arbitrarily large frame. Set
//! [`FramingConfig::max_frame_size`] to bound it.

use crate::error::{Error, ProtocolError, Result};
use crate::layer::{Deliver, Transmit};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Most capacity reserved ahead of a partially received payload.
const RESERVE_CHUNK: usize = 64 * 1024;

/// Frame header size (4 bytes length).
pub const FRAME_HEADER_SIZE: usize = 4;

/// Configuration for the framing layer.
#[derive(Debug, Clone, Default)]
pub struct FramingConfig {
    /// Largest payload accepted from the peer. `None` accepts any length.
    pub max_frame_size: Option<usize>,
}

/// Codec for encoding/decoding length-prefixed frames.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    max_frame_size: Option<usize>,
}

impl FrameCodec {
    /// Create a codec that accepts any declared length.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: None,
        }
    }

    /// Create a codec with a maximum inbound payload size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    /// Create a codec from configuration.
    #[must_use]
    pub const fn from_config(config: &FramingConfig) -> Self {
        Self {
            max_frame_size: config.max_frame_size,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Parse header without consuming
        let mut header = &buf[..FRAME_HEADER_SIZE];
        let payload_len = header.get_u32() as usize;

        if let Some(max) = self.max_frame_size {
            if payload_len > max {
                return Err(ProtocolError::FrameTooLarge {
                    size: payload_len,
                    max,
                }
                .into());
            }
        }

        let frame_len = FRAME_HEADER_SIZE.checked_add(payload_len).ok_or(
            ProtocolError::FrameTooLarge {
                size: payload_len,
                max: usize::MAX - FRAME_HEADER_SIZE,
            },
        )?;
        if buf.len() < frame_len {
            // Grow with the bytes actually received, not the declared length.
            buf.reserve((frame_len - buf.len()).min(RESERVE_CHUNK));
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        Ok(Some(buf.split_to(payload_len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, payload: Bytes, buf: &mut BytesMut) -> Result<()> {
        let payload_len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        })?;

        buf.reserve(FRAME_HEADER_SIZE + payload.len());
        buf.put_u32(payload_len);
        buf.put(payload);

        Ok(())
    }
}

/// Downward half of the framing layer: prefixes each message with its length.
pub struct FrameWriter<T> {
    codec: FrameCodec,
    lower: T,
}

impl<T: Transmit> FrameWriter<T> {
    /// Wrap the layer below.
    pub const fn new(lower: T) -> Self {
        Self {
            codec: FrameCodec::new(),
            lower,
        }
    }
}

impl<T: Transmit> Transmit for FrameWriter<T> {
    fn send(&self, data: Bytes) -> Result<()> {
        let mut buf = BytesMut::new();
        self.codec.clone().encode(data, &mut buf)?;
        self.lower.send(buf.freeze())
    }

    fn close(&self) -> bool {
        self.lower.close()
    }

    fn is_closed(&self) -> bool {
        self.lower.is_closed()
    }
}

/// Upward half of the framing layer: accumulates raw reads and delivers
/// every complete frame payload, in order, exactly once.
pub struct FrameReader<U> {
    codec: FrameCodec,
    buffer: BytesMut,
    upper: U,
}

impl<U: Deliver> FrameReader<U> {
    /// Deliver decoded payloads to `upper`.
    pub fn new(codec: FrameCodec, upper: U) -> Self {
        Self {
            codec,
            buffer: BytesMut::new(),
            upper,
        }
    }

    /// Bytes received but not yet forming a complete frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl<U: Deliver> Deliver for FrameReader<U> {
    fn deliver(&mut self, data: Bytes) -> Result<()> {
        self.buffer.extend_from_slice(&data);
        while let Some(payload) = self.codec.decode(&mut self.buffer)? {
            self.upper.deliver(payload)?;
        }
        Ok(())
    }

    fn closed(&mut self) {
        self.upper.closed();
    }
}
