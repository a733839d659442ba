//! Completions command implementation
//!
//! Prints (or writes to a file) the completion script for one shell, covering
//! every `quire` subcommand and the pipeline-related flags of `build` and
//! `plan`:
//!
//! ```bash
//! quire completions zsh --output ~/.zfunc/_quire
//! ```

use anyhow::{Context, Result};
use clap::{Args, CommandFactory};
use clap_complete::{generate, Shell};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::cli::Cli;

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,

    /// Write the script to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

pub fn execute(args: CompletionsArgs) -> Result<()> {
    match args.output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let mut file = fs::File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            write_script(args.shell, &mut file)?;
            log::info!("Wrote {} completions to {}", args.shell, path.display());
        }
        None => write_script(args.shell, &mut io::stdout().lock())?,
    }
    Ok(())
}

/// Generate the script for `shell` into `out`.
fn write_script(shell: Shell, out: &mut dyn Write) -> Result<()> {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    generate(shell, &mut command, name, out);
    out.flush()?;
    Ok(())
}
