//! Length-prefixed compressed JSON framing.
//!
//! Every frame is a 4-byte big-endian length followed by that many bytes of
//! zlib-compressed UTF-8 JSON. The length prefix is the only message
//! boundary; a corrupt prefix cannot be resynchronized and kills the
//! connection, while a corrupt payload only loses that one frame.

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{Read, Write};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default cap on a single frame body.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    /// The stream ended cleanly or mid-frame.
    #[error("connection closed")]
    ConnectionClosed,

    /// The frame body failed to inflate or parse. The stream itself is
    /// still framed correctly, so the reader may continue.
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// The length prefix claims a body larger than the configured cap.
    /// Treated as prefix corruption: there is no way to find the next
    /// frame boundary.
    #[error("frame of {length} bytes exceeds the {limit} byte cap")]
    FrameTooLarge { length: u32, limit: u32 },

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// True when the receive loop may keep reading after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

/// Encode a packet into a complete frame (prefix + compressed body).
pub fn encode_bytes<T: Serialize>(packet: &T) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_vec(packet).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let body = encoder.finish()?;

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a complete frame produced by [`encode_bytes`].
pub fn decode_bytes<T: DeserializeOwned>(frame: &[u8]) -> Result<T, CodecError> {
    if frame.len() < 4 {
        return Err(CodecError::ConnectionClosed);
    }
    let length = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let body = &frame[4..];
    if body.len() < length {
        return Err(CodecError::ConnectionClosed);
    }
    inflate_parse(&body[..length])
}

fn inflate_parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, CodecError> {
    let mut json = String::new();
    ZlibDecoder::new(body)
        .read_to_string(&mut json)
        .map_err(|e| CodecError::Malformed(format!("inflate failed: {e}")))?;
    serde_json::from_str(&json).map_err(|e| CodecError::Malformed(format!("bad JSON: {e}")))
}

/// Reads framed packets from an async byte stream.
pub struct FrameReader<R> {
    reader: R,
    max_frame: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, max_frame: u32) -> Self {
        Self { reader, max_frame }
    }

    /// Read the next frame, blocking until a full frame is available or the
    /// stream closes.
    pub async fn read_packet<T: DeserializeOwned>(&mut self) -> Result<T, CodecError> {
        let mut header = [0u8; 4];
        read_exact_or_closed(&mut self.reader, &mut header).await?;

        let length = u32::from_be_bytes(header);
        if length > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                length,
                limit: self.max_frame,
            });
        }

        let mut body = vec![0u8; length as usize];
        read_exact_or_closed(&mut self.reader, &mut body).await?;
        inflate_parse(&body)
    }
}

async fn read_exact_or_closed<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<(), CodecError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(CodecError::ConnectionClosed),
        Err(e) => Err(CodecError::Io(e)),
    }
}

/// Writes framed packets to an async byte stream.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_packet<T: Serialize>(&mut self, packet: &T) -> Result<(), CodecError> {
        let frame = encode_bytes(packet)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shut down the underlying stream's write side.
    pub async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}
