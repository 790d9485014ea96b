//! Shell completions generation and installation.

use std::path::{Path, PathBuf};
use std::{env, fs, io};

use anyhow::{bail, Context, Result};
use clap::CommandFactory;
use clap_complete::{generate, Shell};

use super::{Cli, CompletionsAction, ShellType};

const BIN_NAME: &str = "qrdrop";

impl From<ShellType> for Shell {
    fn from(shell: ShellType) -> Self {
        match shell {
            ShellType::Bash => Self::Bash,
            ShellType::Zsh => Self::Zsh,
            ShellType::Fish => Self::Fish,
            ShellType::PowerShell => Self::PowerShell,
            ShellType::Elvish => Self::Elvish,
        }
    }
}

/// Run the completions command.
pub fn run(action: CompletionsAction) -> Result<()> {
    match action {
        CompletionsAction::Generate { shell } => {
            write_completions(shell, &mut io::stdout().lock());
            Ok(())
        }
        CompletionsAction::Install { shell } => {
            let shell = match shell {
                Some(shell) => shell,
                None => shell_from_path(&env::var("SHELL").context(
                    "Could not detect shell from $SHELL. Use --shell to pick one.",
                )?)?,
            };
            install(shell)
        }
    }
}

fn write_completions(shell: ShellType, out: &mut impl io::Write) {
    generate(Shell::from(shell), &mut Cli::command(), BIN_NAME, out);
}

fn shell_from_path(shell_path: &str) -> Result<ShellType> {
    let name = Path::new(shell_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    Ok(match name.as_str() {
        "bash" => ShellType::Bash,
        "zsh" => ShellType::Zsh,
        "fish" => ShellType::Fish,
        "pwsh" | "powershell" => ShellType::PowerShell,
        "elvish" => ShellType::Elvish,
        other => bail!(
            "Unknown shell: {other}. Supported shells: bash, zsh, fish, powershell, elvish"
        ),
    })
}

fn env_dir(var: &str, home: &Path, fallback: &str) -> PathBuf {
    env::var_os(var)
        .filter(|v| !v.is_empty())
        .map_or_else(|| home.join(fallback), PathBuf::from)
}

/// Where `shell` looks for user completions.
fn completions_path(shell: ShellType, home: &Path) -> PathBuf {
    match shell {
        ShellType::Bash => env_dir("XDG_DATA_HOME", home, ".local/share")
            .join("bash-completion/completions")
            .join(BIN_NAME),
        ShellType::Zsh => env_dir("XDG_DATA_HOME", home, ".local/share")
            .join("zsh/site-functions")
            .join(format!("_{BIN_NAME}")),
        ShellType::Fish => env_dir("XDG_CONFIG_HOME", home, ".config")
            .join("fish/completions")
            .join(format!("{BIN_NAME}.fish")),
        ShellType::PowerShell => home
            .join(".config/powershell/completions")
            .join(format!("{BIN_NAME}.ps1")),
        ShellType::Elvish => home.join(".elvish/lib").join(format!("{BIN_NAME}.elv")),
    }
}

fn install(shell: ShellType) -> Result<()> {
    let home = env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
        .context("Could not determine home directory")?;
    let path = completions_path(shell, &home);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let mut file = fs::File::create(&path)
        .with_context(|| format!("Failed to write completions to: {}", path.display()))?;
    write_completions(shell, &mut file);

    println!("✓ Installed {shell:?} completions to: {}", path.display());
    match shell {
        ShellType::Bash | ShellType::Fish => {
            println!("  Restart your shell or run: source {}", path.display());
        }
        ShellType::Zsh => {
            println!("  Make sure ~/.local/share/zsh/site-functions is in your fpath,");
            println!("  then run: autoload -Uz compinit && compinit");
        }
        ShellType::PowerShell => {
            println!("  Add to your profile: . {}", path.display());
        }
        ShellType::Elvish => {
            println!("  Add to ~/.elvish/rc.elv: use {BIN_NAME}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_from_path() {
        assert!(matches!(shell_from_path("/bin/bash"), Ok(ShellType::Bash)));
        assert!(matches!(shell_from_path("/usr/bin/zsh"), Ok(ShellType::Zsh)));
        assert!(matches!(shell_from_path("pwsh"), Ok(ShellType::PowerShell)));
        assert!(shell_from_path("/bin/tcsh").is_err());
    }

    #[test]
    fn test_generated_completions_mention_commands() {
        let mut buf = Vec::new();
        write_completions(ShellType::Bash, &mut buf);
        let script = String::from_utf8(buf).unwrap();
        assert!(script.contains("qrdrop"));
        assert!(script.contains("receive"));
        assert!(script.contains("encode"));
    }

    #[test]
    fn test_elvish_path() {
        let path = completions_path(ShellType::Elvish, Path::new("/home/u"));
        assert_eq!(path, PathBuf::from("/home/u/.elvish/lib/qrdrop.elv"));
    }
}
