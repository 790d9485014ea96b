//! Error types for QrDrop.
//!
//! This module provides a unified error type for all QrDrop operations,
//! with specific error variants for the different failure classes of the
//! reception core:
//!
//! - **Parse**: a payload could not be turned into a frame (non-fatal)
//! - **Integrity**: a chunk or file checksum did not match
//! - **Stage**: a reconstruction stage failed
//! - **Capacity**: a declared size or count exceeds configured ceilings

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::ParseError;

/// A specialized `Result` type for QrDrop operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for QrDrop.
#[derive(Error, Debug)]
pub enum Error {
    /// Payload could not be parsed into a frame (Q001)
    #[error("invalid frame: {0}")]
    Parse(#[from] ParseError),

    /// Chunk checksum mismatch (Q002)
    #[error("checksum mismatch for chunk {chunk} of '{file}'")]
    ChecksumMismatch {
        /// The file being received
        file: String,
        /// The chunk index that failed
        chunk: usize,
    },

    /// Reconstructed file checksum mismatch (Q003)
    #[error("file checksum mismatch for '{file}': expected {expected}, got {actual}")]
    FileChecksumMismatch {
        /// The file being received
        file: String,
        /// Expected (possibly truncated) checksum
        expected: String,
        /// Actual checksum prefix of the same length
        actual: String,
    },

    /// A reconstruction stage failed (Q004)
    #[error("{0}")]
    Stage(#[from] StageError),

    /// A declared size or count exceeds the configured ceiling (Q005)
    #[error("capacity exceeded: {limit} is {requested}, maximum is {max}")]
    Capacity {
        /// Which ceiling was hit
        limit: &'static str,
        /// The requested value
        requested: u64,
        /// The configured maximum
        max: u64,
    },

    /// Session has been idle for too long (Q006)
    #[error("session expired after {0} seconds without activity")]
    SessionExpired(u64),

    /// Session not found
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    /// Saving the reconstructed file failed
    #[error("failed to save '{file}': {reason}")]
    Output {
        /// File name
        file: String,
        /// Reason for failure
        reason: String,
    },

    /// Compression failed (sender side)
    #[error("compression error: {0}")]
    Compression(String),

    /// Encryption or key derivation failed (sender side)
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Forward error correction encoding failed (sender side)
    #[error("FEC error: {0}")]
    Fec(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors raised by individual reconstruction stages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// Encryption is declared but no key material was supplied
    #[error("payload is encrypted but no key material is available")]
    MissingKey,

    /// Decryption failed (wrong key, truncated or tampered ciphertext)
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// The declared compression algorithm is not supported
    #[error("unsupported compression algorithm: {0}")]
    UnsupportedCompression(String),

    /// The compressed stream could not be decoded
    #[error("{algorithm} decompression failed: {reason}")]
    Decompress {
        /// Algorithm name
        algorithm: String,
        /// Reason for failure
        reason: String,
    },

    /// A stage produced more output than allowed
    #[error("stage output exceeds the {limit} byte limit")]
    OutputTooLarge {
        /// The configured limit
        limit: u64,
    },

    /// Forward error correction could not decode the payload
    #[error("error correction failed: {0}")]
    Fec(String),
}

/// Coarse error classification carried in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or unknown frame
    Parse,
    /// Checksum mismatch
    Integrity,
    /// Reconstruction stage failure
    Stage,
    /// Ceiling exceeded
    Capacity,
    /// Configuration problem
    Config,
    /// Filesystem problem
    Io,
    /// Anything else
    Internal,
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern QXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::Parse(_) => Some("Q001"),
            Self::ChecksumMismatch { .. } => Some("Q002"),
            Self::FileChecksumMismatch { .. } => Some("Q003"),
            Self::Stage(_) => Some("Q004"),
            Self::Capacity { .. } => Some("Q005"),
            Self::SessionExpired(_) => Some("Q006"),
            _ => None,
        }
    }

    /// Returns the coarse classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse(_) => ErrorKind::Parse,
            Self::ChecksumMismatch { .. } | Self::FileChecksumMismatch { .. } => {
                ErrorKind::Integrity
            }
            Self::Stage(_) | Self::Compression(_) | Self::Crypto(_) | Self::Fec(_) => {
                ErrorKind::Stage
            }
            Self::Capacity { .. } => ErrorKind::Capacity,
            Self::ConfigError(_) | Self::InvalidConfig { .. } => ErrorKind::Config,
            Self::Io(_) | Self::Output { .. } => ErrorKind::Io,
            Self::SessionExpired(_)
            | Self::SessionNotFound(_)
            | Self::Serialization(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns whether the sender can fix this by retransmitting.
    ///
    /// Dropped frames and rejected chunks only cost a rescan; file-level
    /// failures need a fresh transfer.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::ChecksumMismatch { .. } | Self::Capacity { .. }
        )
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Stage(StageError::MissingKey) => Some(
                "Supply the transfer passphrase with --passphrase, the\n\
                 QRDROP_PASSPHRASE environment variable, or crypto.key_file",
            ),
            Self::Stage(StageError::Decrypt(_)) => {
                Some("Check that the passphrase matches the one used by the sender")
            }
            Self::Capacity { .. } => Some(
                "Raise the limits in the [reception] section of the configuration\n\
                 if the sender is trusted",
            ),
            Self::FileChecksumMismatch { .. } => {
                Some("Ask the sender to restart the transfer; the payload was corrupted")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = Error::Parse(ParseError::Empty);
        assert_eq!(err.code(), Some("Q001"));
        assert_eq!(err.kind(), ErrorKind::Parse);

        let err = Error::Capacity {
            limit: "total chunks",
            requested: 20_000,
            max: 10_000,
        };
        assert_eq!(err.code(), Some("Q005"));
        assert_eq!(err.kind(), ErrorKind::Capacity);
        assert!(err.to_string().contains("20000"));

        let err = Error::SessionNotFound("abc".to_string());
        assert_eq!(err.code(), None);
    }

    #[test]
    fn test_stage_error_is_fatal() {
        let err = Error::from(StageError::MissingKey);
        assert_eq!(err.kind(), ErrorKind::Stage);
        assert!(!err.is_recoverable());
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_chunk_mismatch_is_recoverable() {
        let err = Error::ChecksumMismatch {
            file: "a.bin".to_string(),
            chunk: 3,
        };
        assert!(err.is_recoverable());
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert_eq!(err.to_string(), "checksum mismatch for chunk 3 of 'a.bin'");
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::Capacity).unwrap();
        assert_eq!(json, "\"capacity\"");
    }
}
