//! CLI command definitions and handlers.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use qrdrop_core::crypto::KeyMaterial;
use qrdrop_core::WireFormat;

pub mod completions;
pub mod config;
pub mod encode;
pub mod receive;

/// Load configuration with graceful fallback to defaults.
///
/// A missing or unreadable config file is reported and replaced by defaults,
/// so a broken file never blocks a transfer.
pub fn load_config() -> qrdrop_core::Config {
    qrdrop_core::Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Ignoring configuration file");
        qrdrop_core::Config::default()
    })
}

/// Resolve key material from command-line flags, falling back to config.
///
/// Precedence: `--key-file`, then `--passphrase`, then the configured key
/// file or passphrase environment variable.
pub fn resolve_key(
    key_file: Option<&Path>,
    passphrase: Option<&str>,
    config: &qrdrop_core::Config,
) -> Result<Option<KeyMaterial>> {
    if let Some(path) = key_file {
        let key = KeyMaterial::from_file(path)
            .with_context(|| format!("Failed to read key file: {}", path.display()))?;
        return Ok(Some(key));
    }
    if let Some(passphrase) = passphrase.filter(|p| !p.is_empty()) {
        return Ok(Some(KeyMaterial::Passphrase(passphrase.to_string())));
    }
    Ok(config.crypto.key_material()?)
}

/// QrDrop - Receive files transmitted as QR code sequences
#[derive(Parser)]
#[command(name = "qrdrop")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Detailed logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Rebuild files from scanned QR payloads
    Receive(ReceiveArgs),

    /// Encode a file into QR payloads
    Encode(EncodeArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Arguments for the receive command
#[derive(Parser)]
pub struct ReceiveArgs {
    /// File with one payload per line (reads stdin when omitted)
    pub input: Option<PathBuf>,

    /// Save reconstructed files to this directory
    #[arg(short, long, conflicts_with = "memory_only")]
    pub output: Option<PathBuf>,

    /// Keep reconstructed files in memory instead of writing them
    #[arg(long)]
    pub memory_only: bool,

    /// Read the decryption key from a file
    #[arg(long, conflicts_with = "passphrase")]
    pub key_file: Option<PathBuf>,

    /// Decryption passphrase
    #[arg(long)]
    pub passphrase: Option<String>,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,

    /// Print every frame response as a JSON line
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the encode command
#[derive(Parser)]
#[allow(clippy::struct_excessive_bools)]
pub struct EncodeArgs {
    /// File to encode
    pub file: PathBuf,

    /// Wire format of the payloads
    #[arg(long, value_enum, default_value_t = FormatArg::V2)]
    pub format: FormatArg,

    /// Bytes per chunk (picked from the file size when omitted)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Compression algorithm (gzip, bz2, lzma, brotli, zstd, lz4)
    #[arg(short, long)]
    pub compression: Option<String>,

    /// Encrypt the payload
    #[arg(long)]
    pub encrypt: bool,

    /// Encryption passphrase
    #[arg(long, requires = "encrypt", conflicts_with = "key_file")]
    pub passphrase: Option<String>,

    /// Read the encryption key from a file
    #[arg(long, requires = "encrypt")]
    pub key_file: Option<PathBuf>,

    /// Reed-Solomon data shards
    #[arg(long, requires = "rs_parity")]
    pub rs_blocks: Option<usize>,

    /// Reed-Solomon parity shards
    #[arg(long, requires = "rs_blocks")]
    pub rs_parity: Option<usize>,

    /// Filename announced to the receiver (defaults to the file's name)
    #[arg(long)]
    pub name: Option<String>,

    /// Write payload lines to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Render every payload as a terminal QR code
    #[arg(long, conflicts_with = "output")]
    pub qr: bool,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Wire formats selectable on the command line
#[derive(Clone, Copy, ValueEnum, Debug, PartialEq, Eq)]
pub enum FormatArg {
    /// `qrfile/v2` JSON frames
    V2,
    /// Legacy `qrfile/v1` JSON frames
    V1,
    /// Colon-delimited `F:index:total:data` frames
    Simple,
}

impl From<FormatArg> for WireFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::V2 => Self::V2,
            FormatArg::V1 => Self::V1,
            FormatArg::Simple => Self::Simple,
        }
    }
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show all configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Reset to defaults
    Reset,
}

/// Arguments for the completions command
#[derive(Parser)]
pub struct CompletionsArgs {
    /// Completions subcommand
    #[command(subcommand)]
    pub action: CompletionsAction,
}

/// Completions subcommands
#[derive(Subcommand, Clone, Copy)]
pub enum CompletionsAction {
    /// Install shell completions (auto-detects shell)
    Install {
        /// Override shell detection
        #[arg(long, value_enum)]
        shell: Option<ShellType>,
    },

    /// Generate completions and print to stdout (for manual installation)
    Generate {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: ShellType,
    },
}

/// Supported shell types for completions
#[derive(Clone, Copy, ValueEnum, Debug)]
pub enum ShellType {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    #[value(name = "powershell")]
    PowerShell,
    /// Elvish shell
    Elvish,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_receive_args() {
        let cli = Cli::parse_from(["qrdrop", "receive", "frames.txt", "--json", "-v"]);
        assert!(cli.verbose);
        let Command::Receive(args) = cli.command else {
            panic!("expected receive");
        };
        assert_eq!(args.input, Some(PathBuf::from("frames.txt")));
        assert!(args.json);
        assert!(!args.memory_only);
    }

    #[test]
    fn test_output_conflicts_with_memory_only() {
        let result =
            Cli::try_parse_from(["qrdrop", "receive", "--memory-only", "-o", "/tmp/out"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_encode_rs_flags_come_in_pairs() {
        assert!(Cli::try_parse_from(["qrdrop", "encode", "f.bin", "--rs-blocks", "4"]).is_err());

        let cli = Cli::parse_from([
            "qrdrop",
            "encode",
            "f.bin",
            "--format",
            "simple",
            "--rs-blocks",
            "4",
            "--rs-parity",
            "2",
        ]);
        let Command::Encode(args) = cli.command else {
            panic!("expected encode");
        };
        assert_eq!(args.format, FormatArg::Simple);
        assert_eq!((args.rs_blocks, args.rs_parity), (Some(4), Some(2)));
    }

    #[test]
    fn test_resolve_key_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("key.bin");
        std::fs::write(&key_path, [7u8; 32]).unwrap();

        let config = qrdrop_core::Config::default();
        let key = resolve_key(Some(&key_path), Some("pw"), &config).unwrap();
        assert_eq!(key, Some(KeyMaterial::Raw(vec![7u8; 32])));

        let key = resolve_key(None, Some("pw"), &config).unwrap();
        assert_eq!(key, Some(KeyMaterial::Passphrase("pw".to_string())));

        assert!(resolve_key(Some(&dir.path().join("missing")), None, &config).is_err());
    }
}
