//! Encode command implementation.

use std::io::Write;

use anyhow::{anyhow, bail, Context, Result};

use qrdrop_core::compression::CompressionAlgorithm;
use qrdrop_core::fec::FecParams;
use qrdrop_core::qr;
use qrdrop_core::sender::{self, EncodedTransfer, SenderOptions};

use super::EncodeArgs;
use crate::ui;

/// Run the encode command.
pub async fn run(args: EncodeArgs) -> Result<()> {
    let data = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    let options = build_options(&args)?;
    let transfer = sender::encode(&data, &options)?;
    let payloads = transfer.payloads();

    if let Some(path) = &args.output {
        let mut content = payloads.join("\n");
        content.push('\n');
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    } else if args.qr {
        for (index, payload) in payloads.iter().enumerate() {
            let code = qr::generate_ascii(payload)
                .with_context(|| format!("Frame {index} does not fit in a QR code"))?;
            println!("Frame {}/{}", index + 1, payloads.len());
            println!("{code}");
        }
    } else {
        let mut stdout = std::io::stdout().lock();
        for payload in &payloads {
            writeln!(stdout, "{payload}")?;
        }
    }

    if !args.quiet {
        print_summary(&args, &options, &transfer);
    }
    Ok(())
}

fn build_options(args: &EncodeArgs) -> Result<SenderOptions> {
    let compression = match args.compression.as_deref() {
        Some(name) => CompressionAlgorithm::from_name(name).ok_or_else(|| {
            let known: Vec<&str> = CompressionAlgorithm::ALL
                .iter()
                .map(|a| a.name())
                .collect();
            anyhow!(
                "Unknown compression '{}'. Supported: {}",
                name,
                known.join(", ")
            )
        })?,
        None => CompressionAlgorithm::Store,
    };

    let key = if args.encrypt {
        let config = super::load_config();
        let key = super::resolve_key(
            args.key_file.as_deref(),
            args.passphrase.as_deref(),
            &config,
        )?;
        match key {
            Some(key) => Some(key),
            None => bail!(
                "--encrypt needs --passphrase, --key-file or ${}",
                config.crypto.passphrase_env
            ),
        }
    } else {
        None
    };

    let fec = match (args.rs_blocks, args.rs_parity) {
        (Some(data), Some(parity)) => Some(FecParams::new(data, parity)?),
        _ => None,
    };

    let name = args.name.clone().or_else(|| {
        args.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    });

    Ok(SenderOptions {
        format: args.format.into(),
        chunk_size: args.chunk_size,
        compression,
        key,
        fec,
        name,
    })
}

fn print_summary(args: &EncodeArgs, options: &SenderOptions, transfer: &EncodedTransfer) {
    eprintln!();
    eprintln!(
        "  Encoded {} ({}) into {} {} frames",
        args.file.display(),
        ui::format_size(transfer.original_len as u64),
        transfer.len(),
        options.format
    );
    if let Some(stats) = &transfer.compression {
        eprintln!(
            "  Compression: {} ({:.0}% of original)",
            stats.algorithm.name(),
            stats.ratio() * 100.0
        );
    }
    if options.key.is_some() {
        eprintln!("  Encrypted: AES-256-GCM");
    }
    if let Some(fec) = options.fec {
        eprintln!(
            "  Error correction: {} data + {} parity shards",
            fec.data_shards, fec.parity_shards
        );
    }
    if let Some(path) = &args.output {
        eprintln!("  Wrote payloads to {}", path.display());
    }
    eprintln!();
}
