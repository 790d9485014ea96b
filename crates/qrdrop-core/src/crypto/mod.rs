//! Cryptographic primitives for QrDrop.
//!
//! This module provides:
//! - SHA-256 for chunk and file integrity
//! - Truncated-prefix checksum matching, as senders often ship only the
//!   first 16 hex characters of a digest
//! - The AES-256-GCM envelope used by encrypted transfers (see [`envelope`])
//!
//! ## Security Model
//!
//! - Checksums detect accidental corruption only; they are not signatures
//! - Encrypted transfers authenticate the whole payload with GCM
//! - Keys are derived with HKDF-SHA256 from out-of-band key material

pub mod envelope;

pub use envelope::{derive_key, open, seal, KeyMaterial};

use std::fmt::Write as _;

/// Length of a full SHA-256 digest in hex characters.
pub const SHA256_HEX_LEN: usize = 64;

/// Compute SHA-256 hash of data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute SHA-256 of data as lowercase hex.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    to_hex(&sha256(data))
}

/// Encode bytes as lowercase hex.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Check an expected checksum against a full hex digest.
///
/// The expected value may be a truncated prefix of the digest. Comparison is
/// case-insensitive. An empty or over-long expectation never matches.
#[must_use]
pub fn checksum_matches(expected: &str, actual_hex: &str) -> bool {
    let expected = expected.trim().to_ascii_lowercase();
    if expected.is_empty() || expected.len() > actual_hex.len() {
        return false;
    }
    let actual = actual_hex.to_ascii_lowercase();
    constant_time_eq(expected.as_bytes(), &actual.as_bytes()[..expected.len()])
}

/// Returns the digest prefix with the same length as `expected`, for
/// reporting mismatches.
#[must_use]
pub fn matching_prefix<'a>(expected: &str, actual_hex: &'a str) -> &'a str {
    let len = expected.trim().len().min(actual_hex.len());
    &actual_hex[..len]
}

/// Constant-time comparison of two byte slices.
///
/// Returns `true` if the slices are equal, `false` otherwise.
/// This function takes the same amount of time regardless of where
/// the first difference occurs.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Generate cryptographically secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;

    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
