//! Compression support for received payloads.
//!
//! Senders compress the whole file once before chunking, so decompression
//! runs a single time per session on the reassembled (and decrypted) buffer.
//!
//! ## Features
//!
//! - **Closed algorithm set**: store, gzip, bz2, lzma (xz), brotli, zstd, lz4
//! - **Bounded output**: every decoder stops at a caller-supplied ceiling, so
//!   a tiny compressed stream cannot expand without limit
//! - **Statistics tracking**: compression ratios for the sending side
//!
//! ## Example
//!
//! ```rust,ignore
//! use qrdrop_core::compression::{self, CompressionAlgorithm};
//!
//! let algo = CompressionAlgorithm::from_name("gzip").unwrap();
//! let packed = compression::compress(algo, b"hello")?;
//! let unpacked = compression::decompress(algo, &packed, 1024)?;
//! ```

mod codecs;
mod stats;

pub use stats::CompressionStats;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, StageError};

/// Compression algorithm declared by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// No compression
    #[default]
    Store,
    /// gzip (RFC 1952)
    Gzip,
    /// bzip2
    Bz2,
    /// LZMA in an xz container; legacy `.lzma` streams are also accepted
    Lzma,
    /// Brotli
    Brotli,
    /// Zstandard
    Zstd,
    /// LZ4 frame format
    Lz4,
}

impl CompressionAlgorithm {
    /// All supported algorithms.
    pub const ALL: [Self; 7] = [
        Self::Store,
        Self::Gzip,
        Self::Bz2,
        Self::Lzma,
        Self::Brotli,
        Self::Zstd,
        Self::Lz4,
    ];

    /// Look up an algorithm by its wire name.
    ///
    /// Matching is case-insensitive and accepts common aliases.
    /// An empty name means no compression.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "store" | "none" | "identity" => Some(Self::Store),
            "gzip" | "gz" => Some(Self::Gzip),
            "bz2" | "bzip2" => Some(Self::Bz2),
            "lzma" | "xz" => Some(Self::Lzma),
            "brotli" | "br" => Some(Self::Brotli),
            "zstd" | "zstandard" => Some(Self::Zstd),
            "lz4" => Some(Self::Lz4),
            _ => None,
        }
    }

    /// Canonical wire name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Gzip => "gzip",
            Self::Bz2 => "bz2",
            Self::Lzma => "lzma",
            Self::Brotli => "brotli",
            Self::Zstd => "zstd",
            Self::Lz4 => "lz4",
        }
    }

    /// Whether this algorithm transforms the data at all.
    #[must_use]
    pub const fn is_store(self) -> bool {
        matches!(self, Self::Store)
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for CompressionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
            .ok_or_else(|| Error::Compression(format!("unknown compression algorithm '{s}'")))
    }
}

/// Compress data with the given algorithm.
///
/// # Errors
///
/// Returns an error if the encoder fails.
pub fn compress(algorithm: CompressionAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    let result = match algorithm {
        CompressionAlgorithm::Store => Ok(data.to_vec()),
        CompressionAlgorithm::Gzip => codecs::gzip_encode(data),
        CompressionAlgorithm::Bz2 => codecs::bz2_encode(data),
        CompressionAlgorithm::Lzma => codecs::xz_encode(data),
        CompressionAlgorithm::Brotli => codecs::brotli_encode(data),
        CompressionAlgorithm::Zstd => codecs::zstd_encode(data),
        CompressionAlgorithm::Lz4 => codecs::lz4_encode(data),
    };
    result.map_err(|e| Error::Compression(format!("{algorithm} compress failed: {e}")))
}

/// Decompress data, refusing to produce more than `limit` bytes.
///
/// # Errors
///
/// Returns [`StageError::Decompress`] for corrupt streams and
/// [`StageError::OutputTooLarge`] when the output would exceed `limit`.
pub fn decompress(
    algorithm: CompressionAlgorithm,
    data: &[u8],
    limit: u64,
) -> std::result::Result<Vec<u8>, StageError> {
    let result = match algorithm {
        CompressionAlgorithm::Store => codecs::store_decode(data, limit),
        CompressionAlgorithm::Gzip => codecs::gzip_decode(data, limit),
        CompressionAlgorithm::Bz2 => codecs::bz2_decode(data, limit),
        CompressionAlgorithm::Lzma => codecs::lzma_decode(data, limit),
        CompressionAlgorithm::Brotli => codecs::brotli_decode(data, limit),
        CompressionAlgorithm::Zstd => codecs::zstd_decode(data, limit),
        CompressionAlgorithm::Lz4 => codecs::lz4_decode(data, limit),
    };

    match result {
        Ok(out) => Ok(out),
        Err(codecs::DecodeError::TooLarge) => Err(StageError::OutputTooLarge { limit }),
        Err(codecs::DecodeError::Corrupt(reason)) => Err(StageError::Decompress {
            algorithm: algorithm.name().to_string(),
            reason,
        }),
    }
}
