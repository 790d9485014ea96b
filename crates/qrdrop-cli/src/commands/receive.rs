//! Receive command implementation.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use qrdrop_core::pipeline::StageProgress;
use qrdrop_core::receiver::{FrameResponse, FrameStatus, ReceiverEngine};
use qrdrop_core::session::SessionSnapshot;

use super::ReceiveArgs;
use crate::ui::{self, FileBox};

/// Run the receive command.
pub async fn run(args: ReceiveArgs) -> Result<()> {
    let mut config = super::load_config();
    if let Some(dir) = &args.output {
        config.output.memory_only = false;
        config.output.download_directory = Some(dir.clone());
    }
    if args.memory_only {
        config.output.memory_only = true;
    }

    let key = super::resolve_key(
        args.key_file.as_deref(),
        args.passphrase.as_deref(),
        &config,
    )?;
    let interactive = !args.quiet && !args.json;

    let mut engine = ReceiverEngine::new(&config).with_key(key);
    let progress_task = if interactive {
        let (tx, rx) = mpsc::unbounded_channel();
        engine = engine.with_progress(Arc::new(tx));
        Some(tokio::spawn(print_stages(rx)))
    } else {
        None
    };
    let engine = Arc::new(engine);

    let shutdown = CancellationToken::new();
    let maintenance =
        engine.spawn_maintenance(config.sessions.maintenance_interval, shutdown.clone());

    if interactive {
        println!();
        println!("QrDrop v{}", qrdrop_core::VERSION);
        println!("{}", "-".repeat(37));
        println!();
        if config.output.memory_only {
            println!("  Memory-only mode: files are not written to disk");
        } else {
            println!(
                "  Saving files to {}",
                config.output.resolved_directory().display()
            );
        }
        match &args.input {
            Some(path) => println!("  Reading payloads from {}", path.display()),
            None => println!("  Reading payloads from stdin (one per line)"),
        }
        println!();
    }

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let mut lines = reader.lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read payload")?,
            _ = tokio::signal::ctrl_c() => {
                if interactive {
                    println!();
                    println!("  Interrupted.");
                }
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let payload = line.trim();
        if payload.is_empty() {
            continue;
        }

        let response = engine.process_frame(payload).await;
        if args.json {
            println!("{}", serde_json::to_string(&response)?);
        } else {
            report(&response, args.quiet);
        }
    }

    shutdown.cancel();
    let _ = maintenance.await;

    let overview = engine.all_sessions().await;
    drop(engine);
    if let Some(task) = progress_task {
        let _ = task.await;
    }

    if args.json {
        println!("{}", serde_json::to_string(&overview)?);
    } else if !args.quiet {
        print_unfinished(&overview.active);
        let stats = overview.stats;
        println!();
        println!(
            "  {} completed, {} failed, {} frames ({} rejected, {} duplicates)",
            stats.sessions_completed,
            stats.sessions_failed,
            stats.frames_processed,
            stats.frames_rejected,
            stats.duplicates
        );
        println!();
    }

    let failed = overview.stats.sessions_failed;
    if failed > 0 {
        bail!("{failed} transfer(s) failed");
    }
    Ok(())
}

fn report(response: &FrameResponse, quiet: bool) {
    match response.outcome {
        FrameStatus::Completed => print_completed(response, quiet),
        FrameStatus::Failed => {
            let id = response.session_id().map(ToString::to_string).unwrap_or_default();
            eprintln!("  ✗ Transfer {} failed: {}", id, response.message);
        }
        _ if quiet => {}
        FrameStatus::Accepted => {
            if let Some(session) = &response.session {
                print_progress(session);
            }
        }
        FrameStatus::Duplicate => {
            tracing::debug!(message = %response.message, "Duplicate frame");
        }
        FrameStatus::Rejected | FrameStatus::IntegrityFailed => {
            let hint = response
                .error
                .as_ref()
                .and_then(|e| e.detail.as_deref())
                .map(|d| format!(" ({d})"))
                .unwrap_or_default();
            eprintln!("  ! {}{}", response.message, hint);
        }
    }
}

fn print_progress(session: &SessionSnapshot) {
    let eta = session
        .eta_seconds
        .map(|s| format!("  eta {}", ui::format_eta(s)))
        .unwrap_or_default();
    println!(
        "  {} {} {}/{}{}",
        ui::truncate(session.filename.as_deref().unwrap_or(session.id.as_str()), 20),
        ui::progress_bar(session.percentage),
        session.received_chunks,
        session.total_chunks,
        eta
    );
}

fn print_completed(response: &FrameResponse, quiet: bool) {
    let Some(file) = &response.file else {
        return;
    };

    if quiet {
        println!("{}", file.saved_to.as_deref().unwrap_or(&file.name));
    } else {
        println!();
        let mut summary = FileBox::new("Transfer complete")
            .row("File", file.name.clone())
            .row("Size", ui::format_size(file.size))
            .row("SHA-256", file.sha256.clone())
            .row(
                "Verified",
                if file.verified { "yes" } else { "no checksum sent" },
            );
        if file.corrected_symbols > 0 {
            summary = summary.row("Corrected", format!("{} bytes", file.corrected_symbols));
        }
        if let Some(location) = &file.saved_to {
            summary = summary.row("Saved to", location.clone());
        }
        summary.display();
        for warning in &file.warnings {
            println!("  ⚠ {warning}");
        }
        println!();
    }

    if let Some(error) = &response.error {
        eprintln!("  ✗ Could not save {}: {}", file.name, error.message);
    }
}

fn print_unfinished(active: &[SessionSnapshot]) {
    if active.is_empty() {
        return;
    }
    println!();
    println!("  Incomplete transfers:");
    for session in active {
        let missing: Vec<String> = session
            .missing_chunks
            .iter()
            .take(10)
            .map(ToString::to_string)
            .collect();
        let more = session.missing_chunks.len().saturating_sub(missing.len());
        let suffix = if more > 0 {
            format!(" and {more} more")
        } else {
            String::new()
        };
        println!(
            "    {} {}/{} chunks, missing {}{}",
            session.id,
            session.received_chunks,
            session.total_chunks,
            missing.join(", "),
            suffix
        );
    }
}

async fn print_stages(mut rx: mpsc::UnboundedReceiver<StageProgress>) {
    while let Some(progress) = rx.recv().await {
        println!(
            "    {:<12} {} {}",
            progress.stage.to_string(),
            ui::progress_bar(progress.percentage),
            ui::format_size(progress.bytes)
        );
    }
}
