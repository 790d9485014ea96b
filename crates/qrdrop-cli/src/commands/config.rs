//! Config command implementation.

use anyhow::Result;

use qrdrop_core::Config;

use super::{ConfigAction, ConfigArgs};
use crate::ui;

/// Run the config command.
pub fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = Config::load()?;
            show(&config);
        }

        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }

        ConfigAction::Reset => {
            Config::default().save()?;
            println!("Configuration reset to defaults.");
        }
    }

    Ok(())
}

fn show(config: &Config) {
    let formats: Vec<String> = config
        .reception
        .supported_formats
        .iter()
        .map(|f| format!("\"{}\"", f.name()))
        .collect();

    println!();
    println!("QrDrop Configuration");
    println!("{}", "─".repeat(50));
    println!();
    println!("[reception]");
    println!("  supported_formats = [{}]", formats.join(", "));
    println!("  max_chunks = {}", config.reception.max_chunks);
    println!(
        "  max_file_size = \"{}\"",
        ui::format_size(config.reception.max_file_size)
    );
    println!(
        "  max_chunk_bytes = \"{}\"",
        ui::format_size(config.reception.max_chunk_bytes)
    );
    println!(
        "  max_active_sessions = {}",
        config.reception.max_active_sessions
    );
    println!();
    println!("[pipeline]");
    println!("  fec_enabled = {}", config.pipeline.fec_enabled);
    println!("  max_fec_trials = {}", config.pipeline.max_fec_trials);
    println!(
        "  max_output_size = \"{}\"",
        ui::format_size(config.pipeline.max_output_size)
    );
    println!();
    println!("[sessions]");
    println!(
        "  finished_retention = \"{}s\"",
        config.sessions.finished_retention.as_secs()
    );
    println!(
        "  idle_timeout = \"{}s\"",
        config.sessions.idle_timeout.as_secs()
    );
    println!(
        "  maintenance_interval = \"{}s\"",
        config.sessions.maintenance_interval.as_secs()
    );
    println!();
    println!("[output]");
    println!("  memory_only = {}", config.output.memory_only);
    println!(
        "  download_directory = \"{}\"",
        config.output.resolved_directory().display()
    );
    println!();
    println!("[crypto]");
    match &config.crypto.key_file {
        Some(path) => println!("  key_file = \"{}\"", path.display()),
        None => println!("  # key_file is not set"),
    }
    println!("  passphrase_env = \"{}\"", config.crypto.passphrase_env);
    println!();
}
