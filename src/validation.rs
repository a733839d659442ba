//! Non-fatal validation findings
//!
//! Steps record findings through the execution context. They are collected
//! into the run result and never abort execution on their own.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::path::NormalizedPath;
use crate::phase::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(Error::ConfigParse {
                message: format!("Unknown severity '{}'", other),
                hint: Some("Use one of: info, warning, error".to_string()),
            }),
        }
    }
}

/// One observation about a document or pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFinding {
    pub severity: Severity,
    pub pipeline: String,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<NormalizedPath>,
    pub message: String,
}

impl fmt::Display for ValidationFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}/{}", self.severity, self.pipeline, self.phase)?;
        if let Some(source) = &self.source {
            write!(f, " {}", source)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Thread-safe, append-only collection of findings.
#[derive(Debug, Default)]
pub struct Findings {
    items: Mutex<Vec<ValidationFinding>>,
}

impl Findings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, finding: ValidationFinding) {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(finding);
    }

    pub fn snapshot(&self) -> Vec<ValidationFinding> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }
}
