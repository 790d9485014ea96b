//! Compression statistics tracking.
//!
//! Records how much a compression pass saved, both on the sending side
//! (where the ratio is advertised in v2 frames) and after decompression.

use serde::{Deserialize, Serialize};

use super::CompressionAlgorithm;

/// Statistics for one compression pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressionStats {
    /// Algorithm used
    pub algorithm: CompressionAlgorithm,
    /// Uncompressed size
    pub original_bytes: u64,
    /// Compressed size
    pub compressed_bytes: u64,
}

impl CompressionStats {
    /// Record a pass from its two sizes.
    #[must_use]
    pub const fn new(
        algorithm: CompressionAlgorithm,
        original_bytes: u64,
        compressed_bytes: u64,
    ) -> Self {
        Self {
            algorithm,
            original_bytes,
            compressed_bytes,
        }
    }

    /// Compressed size as a fraction of the original (the wire ratio).
    ///
    /// Returns 1.0 for empty input.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self) -> f64 {
        if self.original_bytes == 0 {
            1.0
        } else {
            self.compressed_bytes as f64 / self.original_bytes as f64
        }
    }

    /// Get bytes saved by compression.
    #[must_use]
    pub const fn bytes_saved(&self) -> u64 {
        self.original_bytes.saturating_sub(self.compressed_bytes)
    }

    /// Get a human-readable display of savings.
    ///
    /// Returns a string like "70% saved" or empty string if no significant savings.
    #[must_use]
    pub fn savings_display(&self) -> String {
        let saved = 1.0 - self.ratio();
        if saved > 0.01 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let percentage = (saved * 100.0) as u32;
            format!("{percentage}% saved")
        } else {
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_ratio() {
        let stats = CompressionStats::new(CompressionAlgorithm::Gzip, 1000, 300);
        assert!((stats.ratio() - 0.3).abs() < 0.001);
        assert_eq!(stats.bytes_saved(), 700);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_compression_ratio_zero_original() {
        let stats = CompressionStats::default();
        assert_eq!(stats.ratio(), 1.0);
        assert_eq!(stats.bytes_saved(), 0);
    }

    #[test]
    fn test_savings_display() {
        let stats = CompressionStats::new(CompressionAlgorithm::Zstd, 1000, 300);
        assert_eq!(stats.savings_display(), "70% saved");

        // Less than 1% savings
        let stats = CompressionStats::new(CompressionAlgorithm::Zstd, 1000, 995);
        assert!(stats.savings_display().is_empty());

        // Expansion
        let stats = CompressionStats::new(CompressionAlgorithm::Lz4, 10, 30);
        assert!(stats.savings_display().is_empty());
    }

    #[test]
    fn test_stats_serialization() {
        let stats = CompressionStats::new(CompressionAlgorithm::Brotli, 1000, 300);
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"brotli\""));

        let deserialized: CompressionStats = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.original_bytes, 1000);
        assert_eq!(deserialized.compressed_bytes, 300);
    }
}
