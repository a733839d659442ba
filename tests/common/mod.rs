//! Shared test utilities for integration and E2E tests.
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! let fixture = TestFixture::new()
//!     .with_config(configs::COPY_TEXT)
//!     .with_input("notes/a.txt", "hello");
//! fixture.command().arg("build").assert().success();
//! ```

use assert_fs::prelude::*;
use std::path::Path;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    #[allow(unused_imports)]
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::configs;
    pub use super::TestFixture;
}

/// Project files used across tests.
#[allow(dead_code)]
pub mod configs {
    /// Copies every text file from input to output.
    pub const COPY_TEXT: &str = r#"
pipelines:
  - name: copy
    input:
      - read_files: ["**/*.txt"]
    output:
      - write_files
"#;

    /// Posts rendered to `.html`, plus an index built from them.
    pub const BLOG: &str = r#"
settings:
  volatile_keys: [built_at]
pipelines:
  - name: posts
    input:
      - read_files: { patterns: ["posts/*.md"] }
    process:
      - set_metadata: { layout: post }
      - replace_text: { pattern: "TODO", replacement: "DONE" }
      - require_metadata: { keys: [title] }
      - set_destination: { extension: html }
    output:
      - write_files
  - name: index
    dependencies: [posts]
    process:
      - from_dependencies: {}
      - order_by: { key: layout }
"#;

    /// Two pipelines that depend on each other.
    pub const CYCLE: &str = r#"
pipelines:
  - name: a
    dependencies: [b]
  - name: b
    dependencies: [a]
"#;

    /// A step name that does not exist.
    pub const UNKNOWN_STEP: &str = r#"
pipelines:
  - name: pages
    output:
      - write_file
"#;

    pub const INVALID_YAML: &str = "pipelines: [: broken";
}

/// A temporary project directory.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

impl TestFixture {
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Write `quire.yaml` with the given content.
    pub fn with_config(self, content: &str) -> Self {
        self.temp_dir
            .child("quire.yaml")
            .write_str(content)
            .expect("Failed to write config file");
        self
    }

    /// Add a file below the default input directory.
    pub fn with_input(self, path: &str, content: &str) -> Self {
        self.temp_dir
            .child("input")
            .child(path)
            .write_str(content)
            .expect("Failed to write input file");
        self
    }

    /// Add a file at any path in the project directory.
    #[allow(dead_code)]
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.temp_dir
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
        self
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn config_path(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("quire.yaml")
    }

    /// A file below the default output directory.
    #[allow(dead_code)]
    pub fn output(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child("output").child(path)
    }

    #[allow(dead_code)]
    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl TestFixture {
    /// A `quire` command running in this fixture's directory.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("quire");
        cmd.current_dir(self.path());
        cmd.env_remove("QUIRE_CONFIG");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// `quire <subcommand> --config <fixture project file>`.
    #[allow(dead_code)]
    pub fn command_with_config(&self, subcommand: &str) -> assert_cmd::Command {
        let mut cmd = self.command();
        cmd.arg(subcommand).arg("--config").arg(self.config_path());
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_with_config_and_input() {
        let fixture = TestFixture::new()
            .with_config(configs::COPY_TEXT)
            .with_input("a.txt", "hello");
        assert!(fixture.config_path().exists());
        assert!(fixture.path().join("input/a.txt").exists());
    }

    #[test]
    fn test_configs_are_valid_yaml() {
        for config in [configs::COPY_TEXT, configs::BLOG, configs::CYCLE, configs::UNKNOWN_STEP] {
            serde_yaml::from_str::<serde_yaml::Value>(config).expect("Config should be valid YAML");
        }
        assert!(serde_yaml::from_str::<serde_yaml::Value>(configs::INVALID_YAML).is_err());
    }
}
