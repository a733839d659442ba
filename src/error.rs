//! # Error Handling
//!
//! This module defines the centralized error type for the `quire` engine. It
//! uses `thiserror` to derive a single `Error` enum covering every failure mode
//! the engine and its collaborators can surface.
//!
//! ## Taxonomy
//!
//! - **Configuration errors** (`ConfigParse`, `CycleDetected`,
//!   `InvalidPipelineName`, `UnknownPipeline`, `InvalidPipeline`,
//!   `UnknownModule`) are detected before any phase runs and are fatal for the
//!   whole run.
//! - **Step execution errors** (`Module`) wrap whatever a step returned and
//!   attribute it to the pipeline, phase and step that raised it.
//! - **Usage errors** (`Usage`, `UndeclaredDependency`) flag misuse of the
//!   engine API from inside a step or event handler.
//! - **Cancellation** (`Cancelled`) is how the chain unwinds when the run's
//!   cancellation token fires; the engine turns it into a partial result
//!   rather than a failure.
//!
//! Transient I/O failures surface as `Io` or `Filesystem` once the retrying
//! collaborator gives up.

use thiserror::Error;

use crate::phase::Phase;

/// Main error type for quire operations
#[derive(Error, Debug)]
pub enum Error {
    /// The project file could not be parsed or holds invalid values.
    #[error("Configuration parsing error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    ConfigParse {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// A circular dependency was detected between pipelines.
    #[error("Cycle detected in pipeline dependencies: {cycle}")]
    CycleDetected { cycle: String },

    /// A pipeline name is empty, duplicated or contains invalid characters.
    #[error("Invalid pipeline name '{name}': {message}")]
    InvalidPipelineName { name: String, message: String },

    /// A pipeline declares a dependency on a pipeline that does not exist.
    #[error("Pipeline '{pipeline}' depends on unknown pipeline '{dependency}'{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    UnknownPipeline {
        pipeline: String,
        dependency: String,
        hint: Option<String>,
    },

    /// A pipeline's flags or dependencies are inconsistent.
    #[error("Invalid pipeline '{pipeline}': {message}")]
    InvalidPipeline { pipeline: String, message: String },

    /// A step name in the project file is not registered.
    #[error("Unknown module '{name}'{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    UnknownModule { name: String, hint: Option<String> },

    /// A step failed while executing.
    #[error("Module '{module}' failed in {pipeline}/{phase}: {source}")]
    Module {
        pipeline: String,
        phase: Phase,
        module: String,
        #[source]
        source: Box<Error>,
    },

    /// A step reported a failure of its own.
    #[error("Execution error: {message}")]
    Execution { message: String },

    /// The engine API was used incorrectly.
    #[error("Usage error: {message}")]
    Usage { message: String },

    /// A step asked for outputs of a pipeline it does not depend on.
    #[error("Pipeline '{pipeline}' cannot read outputs of '{requested}': not a declared dependency")]
    UndeclaredDependency { pipeline: String, requested: String },

    /// A cache computation failed.
    #[error("Cache operation error: {message}")]
    Cache { message: String },

    /// A file system operation failed.
    #[error("Filesystem operation error: {message}")]
    Filesystem { message: String },

    /// The run was cancelled.
    #[error("Execution cancelled")]
    Cancelled,

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A TOML parsing error, wrapped from `toml::de::Error`.
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A glob pattern error, wrapped from `glob::PatternError`.
    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    /// An error indicating that a mutex or other lock has been poisoned.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },
}

impl Error {
    /// Shorthand for a step-raised failure.
    pub fn execution(message: impl Into<String>) -> Self {
        Error::Execution {
            message: message.into(),
        }
    }

    /// Shorthand for an API misuse.
    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage {
            message: message.into(),
        }
    }

    /// An I/O error with the operation and path prepended. The
    /// [`io::ErrorKind`](std::io::ErrorKind) is kept so retries can still
    /// tell transient failures apart.
    pub fn io_context(error: std::io::Error, context: impl std::fmt::Display) -> Self {
        Error::Io(std::io::Error::new(
            error.kind(),
            format!("{}: {}", context, error),
        ))
    }

    /// Whether this error (or the step error it wraps) is a cancellation.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Module { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }

    /// Whether the error was found before any phase executed.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::ConfigParse { .. }
                | Error::CycleDetected { .. }
                | Error::InvalidPipelineName { .. }
                | Error::UnknownPipeline { .. }
                | Error::InvalidPipeline { .. }
                | Error::UnknownModule { .. }
        )
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_config_parse_with_hint() {
        let error = Error::ConfigParse {
            message: "Missing name field".to_string(),
            hint: Some("Add 'name:' to the pipeline".to_string()),
        };
        let display = format!("{}", error);
        assert!(display.contains("Configuration parsing error"));
        assert!(display.contains("Missing name field"));
        assert!(display.contains("hint:"));
    }

    #[test]
    fn test_error_display_cycle_detected() {
        let error = Error::CycleDetected {
            cycle: "a -> b -> a".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("Cycle detected"));
        assert!(display.contains("a -> b -> a"));
    }

    #[test]
    fn test_error_display_module_attribution() {
        let error = Error::Module {
            pipeline: "content".to_string(),
            phase: Phase::Process,
            module: "replace_text".to_string(),
            source: Box::new(Error::execution("bad input")),
        };
        let display = format!("{}", error);
        assert!(display.contains("replace_text"));
        assert!(display.contains("content/Process"));
        assert!(display.contains("bad input"));
    }

    #[test]
    fn test_cancellation_seen_through_module_wrapper() {
        let error = Error::Module {
            pipeline: "p".to_string(),
            phase: Phase::Input,
            module: "m".to_string(),
            source: Box::new(Error::Cancelled),
        };
        assert!(error.is_cancellation());
        assert!(!Error::execution("x").is_cancellation());
    }

    #[test]
    fn test_configuration_classification() {
        assert!(Error::CycleDetected {
            cycle: "a -> a".into()
        }
        .is_configuration());
        assert!(!Error::Cancelled.is_configuration());
    }

    #[test]
    fn test_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let error: Error = io_error.into();
        assert!(format!("{}", error).contains("I/O error"));
    }

    #[test]
    fn test_error_from_yaml_error() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: [unclosed").unwrap_err();
        let error: Error = yaml_error.into();
        assert!(format!("{}", error).contains("YAML parsing error"));
    }
}
