//! Wire format transforms between the credential string and the signed
//! message bytes: prefix, base45, optional zlib.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::Error;

/// Context identifier prepended to health certificate payloads.
pub const CREDENTIAL_PREFIX: &str = "HC1:";

/// First byte of a zlib stream using the deflate method with a 32K window.
const ZLIB_HEADER: u8 = 0x78;

/// Upper bound for inflated messages. Real credentials are a few hundred bytes.
const MAX_INFLATED_LEN: u64 = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base45 data")]
    Base45,

    #[error("failed to inflate message: {0}")]
    Inflate(String),
}

/// Remove the credential prefix if present. Matching is case-sensitive.
pub fn strip_prefix(credential: &str) -> &str {
    credential
        .strip_prefix(CREDENTIAL_PREFIX)
        .unwrap_or(credential)
}

/// Decode a credential string into the raw signed-message bytes.
///
/// The prefix is optional. A message whose first byte is a zlib header is
/// inflated; anything else is returned as decoded.
pub fn decode_credential(credential: &str) -> Result<Vec<u8>, DecodeError> {
    let body = strip_prefix(credential);
    let bytes = base45::decode(body).map_err(|_| DecodeError::Base45)?;

    match bytes.first() {
        Some(&ZLIB_HEADER) => inflate(&bytes),
        _ => Ok(bytes),
    }
}

fn inflate(compressed: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(compressed.len() * 2);
    ZlibDecoder::new(compressed)
        .take(MAX_INFLATED_LEN + 1)
        .read_to_end(&mut out)
        .map_err(|e| DecodeError::Inflate(e.to_string()))?;

    if out.len() as u64 > MAX_INFLATED_LEN {
        return Err(DecodeError::Inflate(format!(
            "inflated message exceeds {} bytes",
            MAX_INFLATED_LEN
        )));
    }
    Ok(out)
}

/// Encode signed-message bytes as a prefixed, compressed credential string.
pub fn encode_credential(message: &[u8]) -> Result<String, Error> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(message)?;
    let compressed = encoder.finish()?;
    Ok(format!("{}{}", CREDENTIAL_PREFIX, base45::encode(compressed)))
}
