//! Default values for quire projects.
//!
//! Centralized so the project file parser, the CLI and the tests agree.

use std::path::{Path, PathBuf};

/// Project file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "quire.yaml";

/// Other project file names tried, in order, after [`DEFAULT_CONFIG_FILE`].
pub const ALTERNATE_CONFIG_FILES: [&str; 3] = ["quire.yml", "quire.toml", "quire.json"];

/// Input root, relative to the project file.
pub const DEFAULT_INPUT_DIR: &str = "input";

/// Output root, relative to the project file.
pub const DEFAULT_OUTPUT_DIR: &str = "output";

pub fn default_input_dir() -> PathBuf {
    PathBuf::from(DEFAULT_INPUT_DIR)
}

pub fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

/// First existing project file in `dir`, falling back to the default name so
/// the caller can report it as missing.
pub fn find_project_file(dir: &Path) -> PathBuf {
    std::iter::once(DEFAULT_CONFIG_FILE)
        .chain(ALTERNATE_CONFIG_FILES)
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .unwrap_or_else(|| dir.join(DEFAULT_CONFIG_FILE))
}
