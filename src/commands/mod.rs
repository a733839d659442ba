//! # CLI Command Implementations
//!
//! Each subcommand of the `quire` tool lives in its own file with:
//! - An `Args` struct that defines the command-specific options, derived
//!   using `clap`.
//! - An `execute` function that takes the parsed `Args` and calls into the
//!   `quire` library.

pub mod build;
pub mod completions;
pub mod plan;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use quire::defaults;
use quire::suggestions;
use quire::Project;

/// Project file named on the command line, or the first one found in the
/// current directory.
pub(crate) fn resolve_config_path(config: Option<PathBuf>) -> PathBuf {
    config.unwrap_or_else(|| defaults::find_project_file(Path::new(".")))
}

/// Load the project file, with a helpful error when it does not exist.
pub(crate) fn load_project(path: &Path) -> Result<Project> {
    if !path.is_file() {
        return Err(suggestions::config_not_found(path));
    }
    Project::from_file(path)
        .with_context(|| format!("Failed to load project file {}", path.display()))
}
