//! Adaptive response encoding.
//!
//! Each payload is sent one of three ways, chosen from its size and content
//! type: plain bytes, gzip-compressed bytes, or a length-framed binary
//! envelope (optionally compressed). Decoding dispatches on the leading
//! bytes, so a decoder needs no out-of-band knowledge of the chosen
//! encoding.
//!
//! Frame layout: 4-byte magic, 1-byte version, 1-byte flags (bit 0 =
//! compressed), 2 reserved bytes, 8-byte little-endian payload length,
//! payload.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{EngineError, Result};

pub const FRAME_MAGIC: [u8; 4] = *b"FWRD";
pub const FRAME_VERSION: u8 = 1;
pub const FLAG_COMPRESSED: u8 = 0b0000_0001;
pub const FRAME_HEADER_LEN: usize = 16;

/// Leading bytes of a gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// How much of the payload the compression test samples.
const COMPRESSION_SAMPLE_BYTES: usize = 8 * 1024;

/// The sample must shrink to at most this percentage of its size for
/// compression to be considered worthwhile.
const COMPRESSION_WORTHWHILE_PERCENT: usize = 80;

/// Coarse payload classification driving the compression decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Text,
    Binary,
}

impl PayloadKind {
    /// Classifies a payload by UTF-8 validity of its leading sample.
    pub fn detect(payload: &[u8]) -> Self {
        let sample = &payload[..payload.len().min(COMPRESSION_SAMPLE_BYTES)];
        match std::str::from_utf8(sample) {
            Ok(_) => Self::Text,
            // A multi-byte character cut off at the sample boundary is
            // still text.
            Err(error) if error.valid_up_to() + 3 >= sample.len() => Self::Text,
            Err(_) => Self::Binary,
        }
    }
}

/// The encoding chosen for one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Plain,
    Compressed,
    Binary { compressed: bool },
}

/// Chooses and applies the wire representation for response payloads.
#[derive(Debug, Clone)]
pub struct ProtocolAdapter {
    binary_threshold: usize,
}

impl ProtocolAdapter {
    pub fn new(binary_threshold: usize) -> Self {
        Self { binary_threshold }
    }

    /// Picks an encoding for the payload.
    pub fn select_encoding(&self, payload: &[u8], kind: PayloadKind) -> Encoding {
        let compressible = kind == PayloadKind::Text && sample_compresses(payload);

        if payload.len() > self.binary_threshold {
            return Encoding::Binary {
                compressed: compressible,
            };
        }

        // A plain payload that happens to begin with the frame or gzip
        // magic must be framed, otherwise decode becomes ambiguous.
        if payload.starts_with(&FRAME_MAGIC) || payload.starts_with(&GZIP_MAGIC) {
            return Encoding::Binary { compressed: false };
        }

        if compressible {
            Encoding::Compressed
        } else {
            Encoding::Plain
        }
    }

    /// Encodes the payload for the wire.
    pub fn encode(&self, payload: &[u8], kind: PayloadKind) -> Result<Vec<u8>> {
        match self.select_encoding(payload, kind) {
            Encoding::Plain => Ok(payload.to_vec()),
            Encoding::Compressed => gzip(payload),
            Encoding::Binary { compressed } => {
                let (body, flags) = if compressed {
                    (gzip(payload)?, FLAG_COMPRESSED)
                } else {
                    (payload.to_vec(), 0)
                };
                Ok(frame(&body, flags))
            }
        }
    }

    /// Decodes wire bytes back into the original payload, dispatching on
    /// the leading bytes.
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.starts_with(&FRAME_MAGIC) {
            return decode_frame(bytes);
        }
        if bytes.starts_with(&GZIP_MAGIC) {
            return gunzip(bytes);
        }
        Ok(bytes.to_vec())
    }
}

fn frame(body: &[u8], flags: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.extend_from_slice(&FRAME_MAGIC);
    out.push(FRAME_VERSION);
    out.push(flags);
    out.extend_from_slice(&[0u8; 2]);
    out.extend_from_slice(&(body.len() as u64).to_le_bytes());
    out.extend_from_slice(body);
    out
}

fn decode_frame(bytes: &[u8]) -> Result<Vec<u8>> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(EngineError::FrameTooShort);
    }

    let version = bytes[4];
    if version != FRAME_VERSION {
        return Err(EngineError::UnsupportedVersion(version));
    }

    let flags = bytes[5];
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[8..16]);
    let declared = u64::from_le_bytes(len_bytes);

    let available = (bytes.len() - FRAME_HEADER_LEN) as u64;
    if declared > available {
        return Err(EngineError::FrameTooShort);
    }
    let body = &bytes[FRAME_HEADER_LEN..FRAME_HEADER_LEN + declared as usize];

    if flags & FLAG_COMPRESSED != 0 {
        gunzip(body)
    } else {
        Ok(body.to_vec())
    }
}

/// Compresses an 8 KiB prefix and checks whether the reduction clears the
/// worthwhile bar.
fn sample_compresses(payload: &[u8]) -> bool {
    let sample = &payload[..payload.len().min(COMPRESSION_SAMPLE_BYTES)];
    if sample.is_empty() {
        return false;
    }
    match gzip(sample) {
        Ok(compressed) => {
            compressed.len() * 100 <= sample.len() * COMPRESSION_WORTHWHILE_PERCENT
        }
        Err(_) => false,
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Chunked streaming
// ---------------------------------------------------------------------------

/// One slice of a chunked payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub index: usize,
    pub last: bool,
    pub data: &'a [u8],
}

/// Splits a payload into constant-size chunks ending in an explicit
/// last-chunk marker. An empty payload yields a single empty last chunk.
pub fn chunks(payload: &[u8], chunk_size: usize) -> ChunkIter<'_> {
    ChunkIter {
        payload,
        chunk_size: chunk_size.max(1),
        index: 0,
        done: false,
    }
}

pub struct ChunkIter<'a> {
    payload: &'a [u8],
    chunk_size: usize,
    index: usize,
    done: bool,
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        if self.done {
            return None;
        }

        let start = self.index * self.chunk_size;
        let remaining = self.payload.len().saturating_sub(start);
        let take = remaining.min(self.chunk_size);
        let last = start + take >= self.payload.len();

        let chunk = Chunk {
            index: self.index,
            last,
            data: &self.payload[start..start + take],
        };
        self.index += 1;
        self.done = last;
        Some(chunk)
    }
}
