//! Parser statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Frame, ParseError, WireFormat};

/// Counters kept by a [`FrameParser`](super::FrameParser).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParserStats {
    /// Payloads seen
    pub total: u64,
    /// Payloads that produced a frame
    pub succeeded: u64,
    /// Payloads that were dropped
    pub failed: u64,
    /// Detected format counts, keyed by format name
    pub formats: BTreeMap<String, u64>,
    /// Failure counts, keyed by error kind
    pub errors: BTreeMap<String, u64>,
    /// Running average of decoded chunk sizes
    pub average_chunk_size: f64,
}

impl ParserStats {
    pub(super) fn record(
        &mut self,
        detected: Option<WireFormat>,
        result: &Result<Frame, ParseError>,
    ) {
        self.total += 1;
        if let Some(format) = detected {
            *self.formats.entry(format.name().to_string()).or_default() += 1;
        }

        match result {
            Ok(frame) => {
                self.succeeded += 1;
                #[allow(clippy::cast_precision_loss)]
                {
                    let n = self.succeeded as f64;
                    self.average_chunk_size += (frame.data.len() as f64 - self.average_chunk_size) / n;
                }
            }
            Err(e) => {
                self.failed += 1;
                *self.errors.entry(e.kind_name().to_string()).or_default() += 1;
            }
        }
    }

    /// Percentage of payloads that parsed.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64 * 100.0
        }
    }

    /// The format seen most often, if any.
    #[must_use]
    pub fn most_common_format(&self) -> Option<&str> {
        self.formats
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::parse_payload;

    #[test]
    fn test_running_average() {
        let mut stats = ParserStats::default();
        for payload in ["F:0:3:QQ==", "F:1:3:QUI=", "F:2:3:QUJD"] {
            let result = parse_payload(payload);
            stats.record(Some(WireFormat::Simple), &result);
        }
        assert!((stats.average_chunk_size - 2.0).abs() < 1e-9);
        assert!((stats.success_rate() - 100.0).abs() < 1e-9);
        assert_eq!(stats.most_common_format(), Some("simple"));
    }

    #[test]
    fn test_empty_stats() {
        let stats = ParserStats::default();
        assert!(stats.success_rate().abs() < f64::EPSILON);
        assert_eq!(stats.most_common_format(), None);
    }

    #[test]
    fn test_failures_by_kind() {
        let mut stats = ParserStats::default();
        stats.record(None, &Err(ParseError::Empty));
        stats.record(None, &Err(ParseError::Empty));
        stats.record(Some(WireFormat::V2), &Err(ParseError::MissingField("index")));

        assert_eq!(stats.failed, 3);
        assert_eq!(stats.errors.get("empty"), Some(&2));
        assert_eq!(stats.errors.get("missing_field"), Some(&1));
        assert_eq!(stats.formats.get("v2"), Some(&1));
    }
}
