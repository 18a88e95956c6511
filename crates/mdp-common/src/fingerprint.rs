//! Content fingerprints for record identity and deduplication
//!
//! Every record flowing through the pipeline is identified by a SHA-256
//! fingerprint, hex-encoded to 64 characters. Raw records hash the source id
//! plus the captured payload; normalized records hash their natural-identity
//! fields. The deduplication stage and the record sink both key on these
//! fingerprints.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::io::Read;

/// Length in characters of a hex-encoded fingerprint
pub const FINGERPRINT_LEN: usize = 64;

/// Separator inserted between parts so that ("ab","c") and ("a","bc")
/// hash differently
const PART_SEPARATOR: u8 = 0x1f;

/// Fingerprint a byte slice
pub fn fingerprint_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Fingerprint an ordered sequence of string parts
///
/// Used for composite identities such as (source id, payload) or
/// (entity id, occurred-on date).
pub fn fingerprint_parts<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            hasher.update([PART_SEPARATOR]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Fingerprint any readable source without loading it into memory
pub fn fingerprint_reader<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
