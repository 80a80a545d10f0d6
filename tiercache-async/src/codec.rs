//! Payload compression for the distributed layer.
//!
//! Gzip (via `flate2`) is used for every compressed payload. The configured
//! threshold is a soft boundary: a value above it is compressed, but the
//! compressed form is only kept when it is actually smaller. A caller can
//! force or forbid compression per write.

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use tiercache_core::{CacheError, Result};

/// Bytes ready for the store, plus whether they are gzip data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub bytes: Bytes,
    pub compressed: bool,
}

pub fn compress(data: &[u8]) -> Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// Inflates `data`, reading at most `limit + 1` bytes.
///
/// # Errors
///
/// `Serialization` if the data is not gzip or inflates past `limit`.
pub fn decompress(data: &[u8], limit: usize) -> Result<Bytes> {
    let mut decoder = GzDecoder::new(data).take(limit as u64 + 1);
    let mut out = Vec::with_capacity(limit.min(data.len().saturating_mul(2)));
    decoder.read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(CacheError::Serialization(format!(
            "payload inflates past its recorded size of {limit} bytes"
        )));
    }
    Ok(Bytes::from(out))
}

/// Chooses the stored form of `value`.
///
/// * `Some(true)` - always compress
/// * `Some(false)` - never compress
/// * `None` - compress when `value.len() > threshold` and the result is smaller
pub fn encode_payload(value: &Bytes, threshold: usize, force: Option<bool>) -> Result<EncodedPayload> {
    let attempt = match force {
        Some(force) => force,
        None => value.len() > threshold,
    };
    if !attempt {
        return Ok(EncodedPayload {
            bytes: value.clone(),
            compressed: false,
        });
    }

    let packed = compress(value)?;
    if force.is_none() && packed.len() >= value.len() {
        return Ok(EncodedPayload {
            bytes: value.clone(),
            compressed: false,
        });
    }
    Ok(EncodedPayload {
        bytes: packed,
        compressed: true,
    })
}

/// Recovers the value from its stored form. `original_size` bounds how far
/// a compressed payload may inflate.
pub fn decode_payload(bytes: &Bytes, compressed: bool, original_size: usize) -> Result<Bytes> {
    if compressed {
        decompress(bytes, original_size)
    } else {
        Ok(bytes.clone())
    }
}
