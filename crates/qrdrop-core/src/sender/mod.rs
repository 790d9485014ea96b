//! Reference sender.
//!
//! Encodes a file into the payload strings a transmitter would show as QR
//! codes. The stages mirror reception in reverse: compress, encrypt, add
//! Reed-Solomon parity, then split into chunks.
//!
//! Only `qrfile/v2` frames can announce compression, encryption and FEC;
//! v1 and simple frames carry the file as is.
//!
//! ## Example
//!
//! ```rust,ignore
//! use qrdrop_core::sender::{encode, SenderOptions};
//!
//! let transfer = encode(&bytes, &SenderOptions::default().named("report.pdf"))?;
//! for payload in transfer.payloads() {
//!     println!("{payload}");
//! }
//! ```

use crate::compression::{self, CompressionAlgorithm, CompressionStats};
use crate::crypto::{self, KeyMaterial};
use crate::error::{Error, Result};
use crate::fec::{self, FecParams};
use crate::frame::{FileMetadata, Frame, WireFormat};

/// Length of the truncated chunk checksums senders attach.
pub const CHUNK_CHECKSUM_LEN: usize = 16;

/// Encoder settings.
#[derive(Debug, Clone)]
pub struct SenderOptions {
    /// Wire format of every frame
    pub format: WireFormat,
    /// Bytes per chunk; picked from the payload size when unset
    pub chunk_size: Option<usize>,
    /// Compression applied before encryption
    pub compression: CompressionAlgorithm,
    /// Encrypt with this key material
    pub key: Option<KeyMaterial>,
    /// Reed-Solomon layout
    pub fec: Option<FecParams>,
    /// Filename announced to the receiver
    pub name: Option<String>,
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self {
            format: WireFormat::V2,
            chunk_size: None,
            compression: CompressionAlgorithm::Store,
            key: None,
            fec: None,
            name: None,
        }
    }
}

impl SenderOptions {
    /// Announce `name` as the filename.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn validate(&self) -> Result<()> {
        let needs_v2 = !self.compression.is_store() || self.key.is_some() || self.fec.is_some();
        if needs_v2 && self.format != WireFormat::V2 {
            return Err(Error::InvalidConfig {
                key: "format".to_string(),
                reason: format!(
                    "{} frames cannot announce compression, encryption or error correction",
                    self.format
                ),
            });
        }
        if self.chunk_size == Some(0) {
            return Err(Error::InvalidConfig {
                key: "chunk_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Chunk size suited to phone scanners: smaller chunks for bigger files.
#[must_use]
pub const fn optimal_chunk_size(payload_len: usize) -> usize {
    const KB: usize = 1024;
    if payload_len <= 100 * KB {
        120
    } else if payload_len <= 1024 * KB {
        100
    } else if payload_len <= 4 * 1024 * KB {
        80
    } else {
        60
    }
}

/// An encoded file.
#[derive(Debug, Clone)]
pub struct EncodedTransfer {
    /// Frames in index order
    pub frames: Vec<Frame>,
    /// Compression outcome, when compression ran
    pub compression: Option<CompressionStats>,
    /// Size of the original file
    pub original_len: usize,
    /// Size of the chunked payload after all stages
    pub payload_len: usize,
}

impl EncodedTransfer {
    /// Payload strings in index order.
    #[must_use]
    pub fn payloads(&self) -> Vec<String> {
        self.frames.iter().map(Frame::to_payload).collect()
    }

    /// Number of frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether there are no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Encode `data` into frames.
///
/// # Errors
///
/// Returns an error if the options are inconsistent or a stage fails.
pub fn encode(data: &[u8], options: &SenderOptions) -> Result<EncodedTransfer> {
    options.validate()?;

    let mut payload = data.to_vec();
    let mut stats = None;
    if !options.compression.is_store() {
        payload = compression::compress(options.compression, &payload)?;
        stats = Some(CompressionStats::new(
            options.compression,
            data.len() as u64,
            payload.len() as u64,
        ));
    }
    if let Some(key) = &options.key {
        payload = crypto::seal(&payload, key)?;
    }
    if let Some(params) = options.fec {
        payload = fec::encode(&payload, params)?;
    }

    let chunk_size = options
        .chunk_size
        .unwrap_or_else(|| optimal_chunk_size(payload.len()));
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![payload.as_slice()]
    } else {
        payload.chunks(chunk_size).collect()
    };
    let total = chunks.len();

    let meta = metadata(data, options, stats.as_ref());
    let frames = chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| Frame {
            format: options.format,
            index,
            total,
            data: chunk.to_vec(),
            chunk_checksum: match options.format {
                WireFormat::Simple => None,
                _ => Some(crypto::sha256_hex(chunk)[..CHUNK_CHECKSUM_LEN].to_string()),
            },
            meta: meta.clone(),
        })
        .collect();

    tracing::debug!(
        format = %options.format,
        total,
        chunk_size,
        original = data.len(),
        payload = payload.len(),
        "Encoded transfer"
    );

    Ok(EncodedTransfer {
        frames,
        compression: stats,
        original_len: data.len(),
        payload_len: payload.len(),
    })
}

fn metadata(
    data: &[u8],
    options: &SenderOptions,
    stats: Option<&CompressionStats>,
) -> FileMetadata {
    match options.format {
        WireFormat::Simple => FileMetadata {
            name: options.name.clone(),
            ..FileMetadata::default()
        },
        WireFormat::V1 => FileMetadata {
            name: options.name.clone(),
            size: Some(data.len() as u64),
            ..FileMetadata::default()
        },
        WireFormat::V2 => FileMetadata {
            name: options.name.clone(),
            size: Some(data.len() as u64),
            checksum: Some(crypto::sha256_hex(data)),
            compression: stats.map(|s| s.algorithm.name().to_string()),
            compression_ratio: stats.map(CompressionStats::ratio),
            encrypted: options.key.is_some(),
            fec: options.fec,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::parse_payload;

    #[test]
    fn test_optimal_chunk_size() {
        assert_eq!(optimal_chunk_size(10), 120);
        assert_eq!(optimal_chunk_size(500 * 1024), 100);
        assert_eq!(optimal_chunk_size(2 * 1024 * 1024), 80);
        assert_eq!(optimal_chunk_size(10 * 1024 * 1024), 60);
    }

    #[test]
    fn test_simple_frames_parse_back() {
        let options = SenderOptions {
            format: WireFormat::Simple,
            chunk_size: Some(4),
            ..SenderOptions::default()
        };
        let transfer = encode(b"0123456789", &options).unwrap();
        assert_eq!(transfer.len(), 3);

        let payloads = transfer.payloads();
        assert_eq!(payloads[0], "F:0:3:MDEyMw==");
        let last = parse_payload(&payloads[2]).unwrap();
        assert_eq!(last.data, b"89");
    }

    #[test]
    fn test_v1_carries_chunk_checksums() {
        let options = SenderOptions {
            format: WireFormat::V1,
            chunk_size: Some(3),
            ..SenderOptions::default()
        }
        .named("abc.txt");
        let transfer = encode(b"ABCDEF", &options).unwrap();

        let frame = parse_payload(&transfer.payloads()[1]).unwrap();
        assert_eq!(frame.format, WireFormat::V1);
        assert_eq!(
            frame.chunk_checksum.as_deref(),
            Some(&crypto::sha256_hex(b"DEF")[..16])
        );
        assert_eq!(frame.meta.size, Some(6));
    }

    #[test]
    fn test_v2_metadata() {
        let options = SenderOptions {
            compression: CompressionAlgorithm::Zstd,
            key: Some(KeyMaterial::Passphrase("pw".to_string())),
            fec: Some(FecParams::new(4, 2).unwrap()),
            chunk_size: Some(32),
            ..SenderOptions::default()
        };
        let data = b"repetitive ".repeat(40);
        let transfer = encode(&data, &options).unwrap();

        let frame = parse_payload(&transfer.payloads()[0]).unwrap();
        assert_eq!(frame.meta.compression.as_deref(), Some("zstd"));
        assert!(frame.meta.encrypted);
        assert_eq!(frame.meta.fec, options.fec);
        assert_eq!(frame.meta.checksum, Some(crypto::sha256_hex(&data)));
        assert!(transfer.compression.unwrap().ratio() < 1.0);
        assert_eq!(transfer.payload_len % 6, 0);
    }

    #[test]
    fn test_empty_file_single_frame() {
        let transfer = encode(b"", &SenderOptions::default()).unwrap();
        assert_eq!(transfer.len(), 1);
        assert!(transfer.frames[0].data.is_empty());
        assert_eq!(transfer.frames[0].total, 1);
    }

    #[test]
    fn test_v1_rejects_pipeline_options() {
        let options = SenderOptions {
            format: WireFormat::V1,
            compression: CompressionAlgorithm::Gzip,
            ..SenderOptions::default()
        };
        assert!(matches!(
            encode(b"data", &options),
            Err(Error::InvalidConfig { .. })
        ));

        let options = SenderOptions {
            chunk_size: Some(0),
            ..SenderOptions::default()
        };
        assert!(encode(b"data", &options).is_err());
    }
}
