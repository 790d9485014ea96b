//! QR code rendering for sender payloads.
//!
//! Lets the reference sender show its frames as QR codes, so a transfer can
//! be tested end to end with a phone or webcam scanner.
//!
//! ## Features
//!
//! - Unicode block QR for terminal display
//! - SVG QR for saving or embedding
//!
//! ## Example
//!
//! ```rust,ignore
//! use qrdrop_core::qr;
//!
//! let ascii = qr::generate_ascii("F:0:1:SGVsbG8=")?;
//! println!("{}", ascii);
//! ```

use qrcode::render::{svg, unicode};
use qrcode::{EcLevel, QrCode};

use crate::error::{Error, Result};

/// Configuration for QR code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QrConfig {
    /// Error correction level (default: Medium)
    pub error_correction: EcLevel,
    /// Draw the quiet zone around the symbol
    pub quiet_zone: bool,
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            error_correction: EcLevel::M,
            quiet_zone: true,
        }
    }
}

fn build(payload: &str, config: QrConfig) -> Result<QrCode> {
    QrCode::with_error_correction_level(payload.as_bytes(), config.error_correction).map_err(|e| {
        Error::Internal(format!(
            "Failed to generate QR code for a {} byte payload: {e}",
            payload.len()
        ))
    })
}

/// Generate a QR code for terminal display.
///
/// Uses Unicode half-block characters, two modules per character row.
///
/// # Errors
///
/// Returns an error if the payload does not fit in a QR code.
pub fn generate_ascii(payload: &str) -> Result<String> {
    generate_ascii_with(payload, QrConfig::default())
}

/// Generate a terminal QR code with explicit settings.
///
/// # Errors
///
/// Returns an error if the payload does not fit in a QR code.
pub fn generate_ascii_with(payload: &str, config: QrConfig) -> Result<String> {
    let rendered = build(payload, config)?
        .render::<unicode::Dense1x2>()
        .quiet_zone(config.quiet_zone)
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build();

    Ok(rendered)
}

/// Generate an SVG QR code.
///
/// # Errors
///
/// Returns an error if the payload does not fit in a QR code.
pub fn generate_svg(payload: &str) -> Result<String> {
    let svg_string = build(payload, QrConfig::default())?
        .render::<svg::Color>()
        .min_dimensions(200, 200)
        .dark_color(svg::Color("#000000"))
        .light_color(svg::Color("#ffffff"))
        .build();

    Ok(svg_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ascii_not_empty() {
        let qr = generate_ascii("F:0:1:SGVsbG8=").unwrap();
        assert!(!qr.is_empty());
        assert!(qr.contains('█') || qr.contains('▀') || qr.contains('▄'));
        assert!(qr.lines().count() > 5);
    }

    #[test]
    fn test_generate_svg_valid_xml() {
        let svg = generate_svg("F:0:1:SGVsbG8=").unwrap();
        assert!(svg.starts_with("<?xml") || svg.starts_with("<svg"));
        assert!(svg.contains("</svg>"));
    }

    #[test]
    fn test_different_payloads_produce_different_qrs() {
        let qr1 = generate_ascii("F:0:2:QUJD").unwrap();
        let qr2 = generate_ascii("F:1:2:REVG").unwrap();
        assert_ne!(qr1, qr2);
    }

    #[test]
    fn test_quiet_zone_toggle() {
        let with = generate_ascii("F:0:1:QQ==").unwrap();
        let without = generate_ascii_with(
            "F:0:1:QQ==",
            QrConfig {
                quiet_zone: false,
                ..QrConfig::default()
            },
        )
        .unwrap();
        assert!(without.lines().count() < with.lines().count());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let huge = "A".repeat(8000);
        assert!(matches!(generate_ascii(&huge), Err(Error::Internal(_))));
    }
}
