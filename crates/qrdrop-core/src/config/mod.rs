//! Configuration management for QrDrop.
//!
//! This module handles loading, saving, and validating QrDrop configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/qrdrop/config.toml` |
//! | macOS | `~/Library/Application Support/com.qrdrop.QrDrop/config.toml` |
//! | Windows | `%APPDATA%\qrdrop\QrDrop\config\config.toml` |
//!
//! Durations are written as `"30s"`, `"5m"`, `"24h"` and sizes as `"64KB"`,
//! `"500MB"` or plain byte counts.
//!
//! ## Example
//!
//! ```rust,ignore
//! use qrdrop_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Max chunks: {}", config.reception.max_chunks);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::KeyMaterial;
use crate::error::{Error, Result};
use crate::frame::WireFormat;

/// Main configuration struct for QrDrop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Frame acceptance limits
    pub reception: ReceptionConfig,
    /// Reconstruction pipeline settings
    pub pipeline: PipelineConfig,
    /// Session lifetime settings
    pub sessions: SessionConfig,
    /// Where completed files go
    pub output: OutputConfig,
    /// Key material sources
    pub crypto: CryptoConfig,
}

/// Limits applied when frames arrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceptionConfig {
    /// Wire formats the parser accepts
    pub supported_formats: Vec<WireFormat>,
    /// Largest declared chunk count a new session may have
    pub max_chunks: usize,
    /// Largest declared file size a new session may have
    #[serde(with = "bytesize_serde")]
    pub max_file_size: u64,
    /// Largest decoded chunk accepted
    #[serde(with = "bytesize_serde")]
    pub max_chunk_bytes: u64,
    /// Maximum number of sessions receiving at the same time
    pub max_active_sessions: usize,
}

impl Default for ReceptionConfig {
    fn default() -> Self {
        Self {
            supported_formats: vec![WireFormat::V2, WireFormat::V1, WireFormat::Simple],
            max_chunks: 10_000,
            max_file_size: 500 * 1024 * 1024,
            max_chunk_bytes: 64 * 1024,
            max_active_sessions: 10,
        }
    }
}

/// Reconstruction pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run Reed-Solomon correction when a frame declares it
    pub fec_enabled: bool,
    /// Upper bound on erasure combinations tried while locating bad shards
    pub max_fec_trials: usize,
    /// Ceiling for the assembled buffer and each decompression output
    #[serde(with = "bytesize_serde")]
    pub max_output_size: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fec_enabled: true,
            max_fec_trials: 4096,
            max_output_size: 1024 * 1024 * 1024,
        }
    }
}

/// Session lifetime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long finished sessions stay queryable
    #[serde(with = "humantime_serde")]
    pub finished_retention: Duration,
    /// Active sessions without frames for this long are failed
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Interval of the background maintenance task
    #[serde(with = "humantime_serde")]
    pub maintenance_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            finished_retention: Duration::from_secs(24 * 3600),
            idle_timeout: Duration::from_secs(3600),
            maintenance_interval: Duration::from_secs(60),
        }
    }
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Keep completed files in memory instead of writing them
    pub memory_only: bool,
    /// Directory for saved files
    pub download_directory: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            memory_only: true,
            download_directory: None,
        }
    }
}

impl OutputConfig {
    /// Returns the configured download directory, or
    /// `~/Downloads/QR_Transfers` when none is set.
    #[must_use]
    pub fn resolved_directory(&self) -> PathBuf {
        self.download_directory.clone().unwrap_or_else(|| {
            dirs::download_dir()
                .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
                .unwrap_or_else(|| PathBuf::from("."))
                .join("QR_Transfers")
        })
    }
}

/// Key material sources for encrypted transfers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// File holding raw key bytes
    pub key_file: Option<PathBuf>,
    /// Environment variable holding a passphrase
    pub passphrase_env: String,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            key_file: None,
            passphrase_env: "QRDROP_PASSPHRASE".to_string(),
        }
    }
}

impl CryptoConfig {
    /// Resolve key material: the key file wins over the passphrase variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the key file cannot be read or is empty.
    pub fn key_material(&self) -> Result<Option<KeyMaterial>> {
        if let Some(path) = &self.key_file {
            return KeyMaterial::from_file(path).map(Some);
        }
        Ok(std::env::var(&self.passphrase_env)
            .ok()
            .filter(|p| !p.is_empty())
            .map(KeyMaterial::Passphrase))
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Check that limits are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, reason: &str| {
            Err(Error::InvalidConfig {
                key: key.to_string(),
                reason: reason.to_string(),
            })
        };

        if self.reception.supported_formats.is_empty() {
            return invalid("reception.supported_formats", "at least one format is required");
        }
        if self.reception.max_chunks == 0 {
            return invalid("reception.max_chunks", "must be greater than zero");
        }
        if self.reception.max_chunk_bytes == 0 {
            return invalid("reception.max_chunk_bytes", "must be greater than zero");
        }
        if self.reception.max_active_sessions == 0 {
            return invalid("reception.max_active_sessions", "must be greater than zero");
        }
        if self.pipeline.max_output_size < self.reception.max_file_size {
            return invalid(
                "pipeline.max_output_size",
                "must not be smaller than reception.max_file_size",
            );
        }
        if self.sessions.maintenance_interval.is_zero() {
            return invalid("sessions.maintenance_interval", "must be greater than zero");
        }
        Ok(())
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "qrdrop", "QrDrop")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let secs = duration.as_secs();
        let text = if secs > 0 && secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs > 0 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        };
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();
        let (digits, multiplier) = if let Some(n) = s.strip_suffix('s') {
            (n, 1)
        } else if let Some(n) = s.strip_suffix('m') {
            (n, 60)
        } else if let Some(n) = s.strip_suffix('h') {
            (n, 3600)
        } else if let Some(n) = s.strip_suffix('d') {
            (n, 86_400)
        } else {
            return Err(serde::de::Error::custom("invalid duration format"));
        };
        let n = digits
            .trim()
            .parse::<u64>()
            .map_err(serde::de::Error::custom)?;
        n.checked_mul(multiplier)
            .map(Duration::from_secs)
            .ok_or_else(|| serde::de::Error::custom("duration out of range"))
    }
}

mod bytesize_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    const UNITS: [(&str, u64); 4] = [
        ("GB", 1024 * 1024 * 1024),
        ("MB", 1024 * 1024),
        ("KB", 1024),
        ("B", 1),
    ];

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bytes(u64),
        Text(String),
    }

    pub fn serialize<S>(bytes: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let (unit, size) = UNITS
            .iter()
            .find(|(_, size)| *bytes > 0 && bytes % size == 0)
            .copied()
            .unwrap_or(("B", 1));
        serializer.serialize_str(&format!("{}{unit}", bytes / size))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Bytes(n) => Ok(n),
            Raw::Text(text) => parse(&text).map_err(serde::de::Error::custom),
        }
    }

    pub(super) fn parse(text: &str) -> Result<u64, String> {
        let upper = text.trim().to_ascii_uppercase();
        for (unit, size) in UNITS {
            if let Some(digits) = upper.strip_suffix(unit) {
                return digits
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| format!("invalid size '{text}': {e}"))?
                    .checked_mul(size)
                    .ok_or_else(|| format!("size '{text}' overflows"));
            }
        }
        upper
            .parse::<u64>()
            .map_err(|e| format!("invalid size '{text}': {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Helper to create a temp config environment for testing
    fn setup_temp_config(dir: &TempDir) -> PathBuf {
        let config_dir = dir.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        config_dir.join("config.toml")
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.reception.max_chunks, 10_000);
        assert_eq!(config.reception.max_file_size, 500 * 1024 * 1024);
        assert_eq!(config.reception.supported_formats.len(), 3);
        assert!(config.pipeline.fec_enabled);
        assert!(config.output.memory_only);
        assert_eq!(config.sessions.idle_timeout, Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_key_file_wins() {
        let temp_dir = TempDir::new().unwrap();
        let key_path = temp_dir.path().join("transfer.key");
        std::fs::write(&key_path, b"raw key bytes").unwrap();

        let crypto = CryptoConfig {
            key_file: Some(key_path),
            passphrase_env: "QRDROP_TEST_UNSET_PASSPHRASE".to_string(),
        };
        assert_eq!(
            crypto.key_material().unwrap(),
            Some(KeyMaterial::Raw(b"raw key bytes".to_vec()))
        );

        let crypto = CryptoConfig {
            key_file: None,
            passphrase_env: "QRDROP_TEST_UNSET_PASSPHRASE".to_string(),
        };
        assert_eq!(crypto.key_material().unwrap(), None);
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = setup_temp_config(&temp_dir);

        let mut original = Config::default();
        original.reception.max_chunks = 42;
        original.reception.max_chunk_bytes = 3000;
        original.reception.supported_formats = vec![WireFormat::V2];
        original.sessions.finished_retention = Duration::from_secs(90);
        original.output.memory_only = false;
        original.output.download_directory = Some(temp_dir.path().join("out"));

        original.save_to(&config_path).expect("save");
        let loaded = Config::load_from(&config_path).expect("load");

        assert_eq!(loaded.reception.max_chunks, 42);
        assert_eq!(loaded.reception.max_chunk_bytes, 3000);
        assert_eq!(loaded.reception.supported_formats, vec![WireFormat::V2]);
        assert_eq!(loaded.sessions.finished_retention, Duration::from_secs(90));
        assert!(!loaded.output.memory_only);
        assert_eq!(
            loaded.output.download_directory,
            Some(temp_dir.path().join("out"))
        );
    }

    #[test]
    fn test_config_serialization() {
        let toml_str = toml::to_string_pretty(&Config::default()).expect("serialize");

        assert!(toml_str.contains("[reception]"));
        assert!(toml_str.contains("[pipeline]"));
        assert!(toml_str.contains("[sessions]"));
        assert!(toml_str.contains("max_file_size = \"500MB\""));
        assert!(toml_str.contains("finished_retention = \"24h\""));
        assert!(toml_str.contains("supported_formats = [\"v2\", \"v1\", \"simple\"]"));
    }

    #[test]
    fn test_config_deserialization_partial() {
        let partial_toml = r#"
[reception]
max_chunks = 500
max_chunk_bytes = "8KB"

[sessions]
idle_timeout = "5m"
"#;

        let config: Config = toml::from_str(partial_toml).expect("parse partial config");

        assert_eq!(config.reception.max_chunks, 500);
        assert_eq!(config.reception.max_chunk_bytes, 8 * 1024);
        assert_eq!(config.sessions.idle_timeout, Duration::from_secs(300));

        assert_eq!(config.reception.max_active_sessions, 10);
        assert_eq!(config.pipeline.max_fec_trials, 4096);
    }

    #[test]
    fn test_duration_overflow_rejected() {
        let result: std::result::Result<Config, _> =
            toml::from_str("[sessions]\nidle_timeout = \"999999999999999999h\"\n");
        assert!(result.is_err());

        let config: Config = toml::from_str("[sessions]\nfinished_retention = \"2d\"\n").unwrap();
        assert_eq!(config.sessions.finished_retention, Duration::from_secs(172_800));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.reception.max_chunks, 10_000);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = setup_temp_config(&temp_dir);
        std::fs::write(&path, "[reception]\nmax_chunks = 0\n").unwrap();

        match Config::load_from(&path) {
            Err(Error::InvalidConfig { key, .. }) => assert_eq!(key, "reception.max_chunks"),
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn test_config_path() {
        let path = Config::config_path();
        assert!(
            path.ends_with("config.toml"),
            "Config path should end with config.toml"
        );
    }

    #[test]
    fn test_size_parsing() {
        assert_eq!(bytesize_serde::parse("500MB"), Ok(500 * 1024 * 1024));
        assert_eq!(bytesize_serde::parse("64kb"), Ok(64 * 1024));
        assert_eq!(bytesize_serde::parse("1 GB"), Ok(1024 * 1024 * 1024));
        assert_eq!(bytesize_serde::parse("1234"), Ok(1234));
        assert!(bytesize_serde::parse("lots").is_err());
    }

    #[test]
    fn test_resolved_directory_prefers_explicit() {
        let output = OutputConfig {
            memory_only: false,
            download_directory: Some(PathBuf::from("/tmp/qr")),
        };
        assert_eq!(output.resolved_directory(), PathBuf::from("/tmp/qr"));
        assert!(OutputConfig::default()
            .resolved_directory()
            .ends_with("QR_Transfers"));
    }
}
