//! Optional payload transforms: LZ4 compression and a pluggable cipher.
//!
//! Outbound payloads are compressed, then encrypted. Inbound payloads are
//! decrypted, then decompressed. The length header is never transformed; it
//! is rewritten to match the transformed payload.
//!
//! A compressed payload starts with a flag byte:
//!
//! ```text
//! 0x00 | raw bytes
//! 0x01 | u32 LE original size | LZ4 block
//! ```

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use lz4_flex::block::{compress_prepend_size, decompress};

use crate::framing::FramedView;
use crate::msg::{HEADER_SIZE, Msg};

/// Compression flag: payload is uncompressed.
pub const COMPRESSION_FLAG_NONE: u8 = 0x00;

/// Compression flag: payload is LZ4-compressed.
pub const COMPRESSION_FLAG_LZ4: u8 = 0x01;

/// Symmetric, length-preserving payload transform.
///
/// Any state the transform needs (keys, rolling counters) lives in the
/// implementor. Calls for one direction of one connection are serialized.
pub trait Cipher: Send + Sync {
    /// Transform an outbound payload in place.
    fn encrypt(&self, buf: &mut [u8]);
    /// Reverse [`Cipher::encrypt`] on an inbound payload in place.
    fn decrypt(&self, buf: &mut [u8]);
}

/// The identity cipher.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Cipher for Passthrough {
    fn encrypt(&self, _buf: &mut [u8]) {}
    fn decrypt(&self, _buf: &mut [u8]) {}
}

/// Controls when payloads are compressed.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Minimum payload size (bytes) before compression is attempted. Default: 256.
    pub threshold: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { threshold: 256 }
    }
}

/// Errors raised while undoing the inbound transforms.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The payload was empty, so no compression flag is present.
    #[error("empty payload, no compression flag")]
    EmptyPayload,
    /// The declared decompressed size is over the message limit.
    #[error("decompressed size {size} exceeds limit {max}")]
    TooLarge {
        /// Declared size.
        size: usize,
        /// Message limit.
        max: usize,
    },
    /// LZ4 decompression failed.
    #[error("LZ4 decompression failed: {0}")]
    DecompressFailed(String),
    /// An unknown compression flag byte was encountered.
    #[error("unknown compression flag: 0x{0:02X}")]
    UnknownFlag(u8),
}

/// Wrap a payload with a compression flag, compressing when it pays off.
pub fn compress_payload(data: &[u8], config: &CompressionConfig) -> Vec<u8> {
    if data.len() >= config.threshold {
        let compressed = compress_prepend_size(data);
        if compressed.len() < data.len() {
            let mut out = Vec::with_capacity(1 + compressed.len());
            out.push(COMPRESSION_FLAG_LZ4);
            out.extend_from_slice(&compressed);
            return out;
        }
    }
    let mut out = Vec::with_capacity(1 + data.len());
    out.push(COMPRESSION_FLAG_NONE);
    out.extend_from_slice(data);
    out
}

/// Unwrap a flagged payload, refusing to inflate past `max` bytes.
pub fn decompress_payload(data: &[u8], max: usize) -> Result<Vec<u8>, PipelineError> {
    let (&flag, body) = data.split_first().ok_or(PipelineError::EmptyPayload)?;
    match flag {
        COMPRESSION_FLAG_NONE => Ok(body.to_vec()),
        COMPRESSION_FLAG_LZ4 => {
            if body.len() < 4 {
                return Err(PipelineError::DecompressFailed(
                    "missing size prefix".to_string(),
                ));
            }
            let mut size = [0u8; 4];
            size.copy_from_slice(&body[..4]);
            let size = u32::from_le_bytes(size) as usize;
            if size > max {
                return Err(PipelineError::TooLarge { size, max });
            }
            decompress(&body[4..], size)
                .map_err(|e| PipelineError::DecompressFailed(e.to_string()))
        }
        flag => Err(PipelineError::UnknownFlag(flag)),
    }
}

/// Per-connection transform settings.
#[derive(Clone)]
pub struct Pipeline {
    compress: bool,
    uncompress: bool,
    encrypt: bool,
    decrypt: bool,
    cipher: Arc<dyn Cipher>,
    compression: CompressionConfig,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            compress: false,
            uncompress: false,
            encrypt: false,
            decrypt: false,
            cipher: Arc::new(Passthrough),
            compression: CompressionConfig::default(),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("compress", &self.compress)
            .field("uncompress", &self.uncompress)
            .field("encrypt", &self.encrypt)
            .field("decrypt", &self.decrypt)
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// All transforms off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compress outbound payloads.
    pub fn use_compress(&mut self) {
        self.compress = true;
    }

    /// Decompress inbound payloads.
    pub fn use_uncompress(&mut self) {
        self.uncompress = true;
    }

    /// Encrypt outbound payloads with the installed cipher.
    pub fn use_encrypt(&mut self) {
        self.encrypt = true;
    }

    /// Decrypt inbound payloads with the installed cipher.
    pub fn use_decrypt(&mut self) {
        self.decrypt = true;
    }

    /// Install the cipher used by both directions.
    pub fn set_cipher(&mut self, cipher: Arc<dyn Cipher>) {
        self.cipher = cipher;
    }

    /// Append the wire form of `view` to `out`.
    pub fn encode_into(&self, view: &FramedView<'_>, out: &mut BytesMut) {
        if !self.compress && !self.encrypt {
            let (base, trailing) = view.payload_parts();
            out.reserve(view.length());
            debug_assert!(u32::try_from(view.length()).is_ok());
            out.put_u32_le(view.length() as u32);
            out.extend_from_slice(base);
            out.extend_from_slice(trailing);
            return;
        }

        let mut payload = view.payload_to_vec();
        if self.compress {
            payload = compress_payload(&payload, &self.compression);
        }
        if self.encrypt {
            self.cipher.encrypt(&mut payload);
        }
        out.reserve(HEADER_SIZE + payload.len());
        out.put_u32_le((HEADER_SIZE + payload.len()) as u32);
        out.extend_from_slice(&payload);
    }

    /// Turn a received frame back into a message.
    pub fn decode_frame(&self, mut frame: BytesMut, max: usize) -> Result<Msg, PipelineError> {
        if self.decrypt {
            self.cipher.decrypt(&mut frame[HEADER_SIZE..]);
        }
        if !self.uncompress {
            return Ok(Msg::from_frame(frame.to_vec()));
        }

        let payload = decompress_payload(&frame[HEADER_SIZE..], max.saturating_sub(HEADER_SIZE))?;
        let mut msg = Msg::with_capacity(payload.len());
        msg.push(&payload);
        Ok(msg)
    }
}
