//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;
use quire::output::OutputConfig;

/// quire - Dependency-ordered content pipelines with incremental output
#[derive(Parser, Debug)]
#[command(name = "quire")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(
        long,
        global = true,
        value_name = "WHEN",
        default_value = "auto",
        value_parser = ["auto", "always", "never"]
    )]
    color: String,

    /// Set log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(
        long,
        global = true,
        value_name = "LEVEL",
        default_value = "warn",
        value_parser = ["error", "warn", "info", "debug", "trace"]
    )]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every pipeline of the project and write the output
    Build(commands::build::BuildArgs),

    /// Show the execution order and dependency tree without running anything
    Plan(commands::plan::PlanArgs),

    /// Generate shell completion scripts
    Completions(commands::completions::CompletionsArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        init_logging(&self.log_level);
        let output = OutputConfig::from_env_and_flag(&self.color);
        output.apply();

        match self.command {
            Commands::Build(args) => commands::build::execute(args, &output),
            Commands::Plan(args) => commands::plan::execute(args, &output),
            Commands::Completions(args) => commands::completions::execute(args),
        }
    }
}

fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    // A second initialization (e.g. from tests) is not an error worth reporting.
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init();
}
