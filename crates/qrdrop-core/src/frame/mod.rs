//! Frame parsing for scanned QR payloads.
//!
//! Every QR code carries one text payload. This module detects which wire
//! format the payload uses and turns it into a [`Frame`]: one chunk of a
//! file plus whatever metadata the format carries.
//!
//! ## Wire formats
//!
//! | Format | Shape | Metadata |
//! |--------|-------|----------|
//! | `qrfile/v2` | JSON object | name, size, checksums, compression, encryption, FEC |
//! | `qrfile/v1` | JSON object | name, size, chunk checksum |
//! | simple | `F:<index>:<total>:<b64>` or `F:<name>:I:<i>:T:<t>:D:<b64>` | name (keyed form only) |
//!
//! Parse failures are typed [`ParseError`]s. They never affect sessions;
//! the frame is dropped and counted in [`ParserStats`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use qrdrop_core::frame::FrameParser;
//!
//! let parser = FrameParser::default();
//! let frame = parser.parse("F:0:1:SGVsbG8=")?;
//! assert_eq!(frame.data, b"Hello");
//! ```

mod json;
mod simple;
mod stats;

pub use stats::ParserStats;

use std::fmt;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fec::FecParams;

/// Standard alphabet, padding optional.
const B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Wire format of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// `qrfile/v2` JSON
    V2,
    /// `qrfile/v1` JSON
    V1,
    /// Colon-delimited text
    Simple,
}

impl WireFormat {
    /// Short name used in statistics and configuration.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::V2 => "v2",
            Self::V1 => "v1",
            Self::Simple => "simple",
        }
    }

    /// Value of the JSON `fmt` field, if the format has one.
    #[must_use]
    pub const fn fmt_tag(self) -> Option<&'static str> {
        match self {
            Self::V2 => Some("qrfile/v2"),
            Self::V1 => Some("qrfile/v1"),
            Self::Simple => None,
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for WireFormat {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, ParseError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v2" | "qrfile/v2" => Ok(Self::V2),
            "v1" | "qrfile/v1" => Ok(Self::V1),
            "simple" => Ok(Self::Simple),
            _ => Err(ParseError::UnknownFormat),
        }
    }
}

/// Why a payload was not turned into a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Payload was empty or whitespace
    #[error("empty payload")]
    Empty,

    /// Payload looked like JSON but was not a valid object
    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    /// Payload matched no known format
    #[error("unknown payload format")]
    UnknownFormat,

    /// Payload is a known format that this receiver has disabled
    #[error("format {0} is disabled")]
    UnsupportedFormat(WireFormat),

    /// A required field is absent
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// A field is present but has the wrong type or value
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// Field name
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// Chunk index is not below the total
    #[error("chunk index {index} is out of range for {total} chunks")]
    IndexOutOfRange {
        /// Declared index
        index: usize,
        /// Declared total
        total: usize,
    },

    /// Chunk payload is not valid base64
    #[error("invalid base64 chunk data: {0}")]
    InvalidBase64(String),

    /// Digest algorithm other than sha256
    #[error("unsupported digest algorithm '{0}'")]
    UnsupportedDigest(String),
}

impl ParseError {
    /// Stable identifier used as a statistics key.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::MalformedJson(_) => "malformed_json",
            Self::UnknownFormat => "unknown_format",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::MissingField(_) => "missing_field",
            Self::InvalidField { .. } => "invalid_field",
            Self::IndexOutOfRange { .. } => "index_out_of_range",
            Self::InvalidBase64(_) => "invalid_base64",
            Self::UnsupportedDigest(_) => "unsupported_digest",
        }
    }

    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// File-level metadata a frame may carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Original filename
    pub name: Option<String>,
    /// Size of the final file in bytes
    pub size: Option<u64>,
    /// SHA-256 of the final file, possibly a truncated hex prefix
    pub checksum: Option<String>,
    /// Declared compression algorithm name, resolved when decompressing
    pub compression: Option<String>,
    /// Advisory compressed/original ratio
    pub compression_ratio: Option<f64>,
    /// Payload is an encryption envelope
    pub encrypted: bool,
    /// Reed-Solomon layout, when FEC is enabled
    pub fec: Option<FecParams>,
}

/// One parsed QR payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Wire format the frame arrived in
    pub format: WireFormat,
    /// Zero-based chunk index
    pub index: usize,
    /// Total number of chunks in the transfer
    pub total: usize,
    /// Decoded chunk bytes
    pub data: Vec<u8>,
    /// SHA-256 of the chunk, possibly a truncated hex prefix
    pub chunk_checksum: Option<String>,
    /// File metadata
    pub meta: FileMetadata,
}

impl Frame {
    /// Serialize this frame back into a payload string in its wire format.
    ///
    /// The simple format uses the keyed form when a filename is present.
    #[must_use]
    pub fn to_payload(&self) -> String {
        match self.format {
            WireFormat::V2 | WireFormat::V1 => json::encode(self),
            WireFormat::Simple => simple::encode(self),
        }
    }
}

/// Decode a base64 chunk, ignoring embedded whitespace.
pub(crate) fn decode_base64(text: &str) -> Result<Vec<u8>, ParseError> {
    let cleaned: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    B64.decode(cleaned.as_bytes())
        .map_err(|e| ParseError::InvalidBase64(e.to_string()))
}

/// Encode chunk bytes as padded standard base64.
pub(crate) fn encode_base64(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Check index/total consistency shared by every format.
pub(crate) fn check_range(index: usize, total: usize) -> Result<(), ParseError> {
    if total == 0 {
        return Err(ParseError::invalid("total", "must be positive"));
    }
    if index >= total {
        return Err(ParseError::IndexOutOfRange { index, total });
    }
    Ok(())
}

/// Treat empty checksum strings as absent.
pub(crate) fn normalize_checksum(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Detected envelope of a payload, before field extraction.
enum Envelope<'a> {
    Json(WireFormat, serde_json::Map<String, serde_json::Value>),
    Simple(&'a str),
}

fn detect(payload: &str) -> Result<Envelope<'_>, ParseError> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        let value: serde_json::Value = serde_json::from_str(trimmed)
            .map_err(|e| ParseError::MalformedJson(e.to_string()))?;
        let serde_json::Value::Object(map) = value else {
            return Err(ParseError::MalformedJson("expected an object".to_string()));
        };
        let format = match map
            .get("fmt")
            .and_then(serde_json::Value::as_str)
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("qrfile/v2") => WireFormat::V2,
            Some("qrfile/v1") => WireFormat::V1,
            _ => return Err(ParseError::UnknownFormat),
        };
        return Ok(Envelope::Json(format, map));
    }

    if let Some(rest) = trimmed.strip_prefix("F:") {
        return Ok(Envelope::Simple(rest));
    }

    Err(ParseError::UnknownFormat)
}

/// Parse one payload, accepting every wire format.
///
/// # Errors
///
/// Returns a [`ParseError`] describing why the payload is not a valid frame.
pub fn parse_payload(payload: &str) -> Result<Frame, ParseError> {
    FrameParser::default().parse(payload)
}

/// Stateful parser with format filtering and statistics.
#[derive(Debug)]
pub struct FrameParser {
    supported: Vec<WireFormat>,
    stats: Mutex<ParserStats>,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(&[WireFormat::V2, WireFormat::V1, WireFormat::Simple])
    }
}

impl FrameParser {
    /// Create a parser that accepts the given formats.
    #[must_use]
    pub fn new(supported: &[WireFormat]) -> Self {
        Self {
            supported: supported.to_vec(),
            stats: Mutex::new(ParserStats::default()),
        }
    }

    /// Formats this parser accepts.
    #[must_use]
    pub fn supported_formats(&self) -> &[WireFormat] {
        &self.supported
    }

    /// Whether a format is enabled.
    #[must_use]
    pub fn is_supported(&self, format: WireFormat) -> bool {
        self.supported.contains(&format)
    }

    /// Parse one payload into a frame.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] describing why the payload is not a valid frame.
    pub fn parse(&self, payload: &str) -> Result<Frame, ParseError> {
        let mut detected = None;
        let result = detect(payload).and_then(|envelope| {
            let format = match &envelope {
                Envelope::Json(format, _) => *format,
                Envelope::Simple(_) => WireFormat::Simple,
            };
            detected = Some(format);
            if !self.is_supported(format) {
                return Err(ParseError::UnsupportedFormat(format));
            }
            match envelope {
                Envelope::Json(format, map) => json::parse(format, map),
                Envelope::Simple(rest) => simple::parse(rest),
            }
        });

        let mut stats = self.stats.lock();
        stats.record(detected, &result);
        drop(stats);

        match &result {
            Ok(frame) => tracing::trace!(
                format = %frame.format,
                index = frame.index,
                total = frame.total,
                bytes = frame.data.len(),
                "Parsed frame"
            ),
            Err(e) => tracing::debug!(error = %e, "Dropped payload"),
        }
        result
    }

    /// Snapshot of the parser statistics.
    #[must_use]
    pub fn stats(&self) -> ParserStats {
        self.stats.lock().clone()
    }

    /// Reset the parser statistics.
    pub fn reset_stats(&self) {
        *self.stats.lock() = ParserStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_each_format() {
        let parser = FrameParser::default();

        let v2 = parser
            .parse(r#"{"fmt":"qrfile/v2","index":0,"total":1,"data_b64":"QUJD"}"#)
            .unwrap();
        assert_eq!(v2.format, WireFormat::V2);

        let v1 = parser
            .parse(r#"{"fmt":"QRFILE/V1","index":0,"total":1,"data_b64":"QUJD"}"#)
            .unwrap();
        assert_eq!(v1.format, WireFormat::V1);

        let simple = parser.parse("F:0:1:QUJD").unwrap();
        assert_eq!(simple.format, WireFormat::Simple);
        assert_eq!(simple.data, b"ABC");
    }

    #[test]
    fn test_rejects_unknown_and_empty() {
        let parser = FrameParser::default();

        assert_eq!(parser.parse(""), Err(ParseError::Empty));
        assert_eq!(parser.parse("   \n"), Err(ParseError::Empty));
        assert_eq!(parser.parse("hello world"), Err(ParseError::UnknownFormat));
        assert_eq!(
            parser.parse(r#"{"fmt":"qrfile/v9","index":0}"#),
            Err(ParseError::UnknownFormat)
        );
        assert_eq!(parser.parse(r#"{"index":0}"#), Err(ParseError::UnknownFormat));
        assert!(matches!(
            parser.parse("{not json}"),
            Err(ParseError::MalformedJson(_))
        ));
    }

    #[test]
    fn test_disabled_format() {
        let parser = FrameParser::new(&[WireFormat::V2]);
        assert_eq!(
            parser.parse("F:0:1:QUJD"),
            Err(ParseError::UnsupportedFormat(WireFormat::Simple))
        );
        assert!(!parser.is_supported(WireFormat::V1));
    }

    #[test]
    fn test_base64_padding_optional() {
        assert_eq!(decode_base64("SGVsbG8=").unwrap(), b"Hello");
        assert_eq!(decode_base64("SGVsbG8").unwrap(), b"Hello");
        assert_eq!(decode_base64("SGVs\nbG8=").unwrap(), b"Hello");
        assert_eq!(decode_base64("").unwrap(), b"");
        assert!(matches!(
            decode_base64("SGV:sbG8"),
            Err(ParseError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_stats_recorded() {
        let parser = FrameParser::default();
        parser.parse("F:0:2:QUJD").unwrap();
        parser.parse("F:1:2:QUJDREVG").unwrap();
        let _ = parser.parse("garbage");
        let _ = parser.parse("F:5:2:QUJD");

        let stats = parser.stats();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.formats.get("simple"), Some(&3));
        assert_eq!(stats.errors.get("unknown_format"), Some(&1));
        assert_eq!(stats.errors.get("index_out_of_range"), Some(&1));
        assert!((stats.average_chunk_size - 4.5).abs() < f64::EPSILON);

        parser.reset_stats();
        assert_eq!(parser.stats().total, 0);
    }

    #[test]
    fn test_wire_format_names() {
        assert_eq!("qrfile/v2".parse::<WireFormat>().unwrap(), WireFormat::V2);
        assert_eq!("simple".parse::<WireFormat>().unwrap(), WireFormat::Simple);
        assert!("v3".parse::<WireFormat>().is_err());
        assert_eq!(WireFormat::V1.fmt_tag(), Some("qrfile/v1"));
        assert_eq!(WireFormat::Simple.fmt_tag(), None);
    }

    #[test]
    fn test_payload_reencodes() {
        let frame = parse_payload("F:report.txt:I:1:T:3:D:QUJD").unwrap();
        assert_eq!(frame.to_payload(), "F:report.txt:I:1:T:3:D:QUJD");
        assert_eq!(parse_payload(&frame.to_payload()).unwrap(), frame);
    }
}
