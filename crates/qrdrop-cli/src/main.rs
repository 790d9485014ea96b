//! QrDrop CLI - Receive files transmitted as QR code sequences
//!
//! Feed scanned payloads to `qrdrop receive`, one per line, and the file is
//! rebuilt once every chunk has arrived.
//!
//! ## Quick Start
//!
//! ```bash
//! # Encode a file into payload lines
//! qrdrop encode ./report.pdf --compression zstd -o frames.txt
//!
//! # Rebuild it from scanned payloads
//! qrdrop receive frames.txt -o ./received
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_precision_loss)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Command::Receive(args) => commands::receive::run(args).await,
        Command::Encode(args) => commands::encode::run(args).await,
        Command::Config(args) => commands::config::run(args),
        Command::Completions(args) => commands::completions::run(args.action),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose {
        "info,qrdrop=debug,qrdrop_core=debug"
    } else {
        "warn,qrdrop=info,qrdrop_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}
