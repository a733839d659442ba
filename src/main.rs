//! # quire CLI
//!
//! Binary entry point for the `quire` command-line tool.
//!
//! Its responsibilities are parsing arguments with `clap`, dispatching to the
//! subcommand, and turning failures into an exit code: `0` on success, `1`
//! when the run failed, `2` for usage errors (reported by `clap` itself).
//!
//! Everything else lives in the `quire` library crate.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli.execute()
}
