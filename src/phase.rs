//! The four fixed phases every pipeline passes through

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A stage within a pipeline, totally ordered as declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Input,
    Process,
    PostProcess,
    Output,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 4] = [
        Phase::Input,
        Phase::Process,
        Phase::PostProcess,
        Phase::Output,
    ];

    /// The phase that runs after this one, if any.
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Input => Some(Phase::Process),
            Phase::Process => Some(Phase::PostProcess),
            Phase::PostProcess => Some(Phase::Output),
            Phase::Output => None,
        }
    }

    /// Name as written in project files.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Input => "input",
            Phase::Process => "process",
            Phase::PostProcess => "post_process",
            Phase::Output => "output",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Input => "Input",
            Phase::Process => "Process",
            Phase::PostProcess => "PostProcess",
            Phase::Output => "Output",
        };
        f.write_str(name)
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "input" => Ok(Phase::Input),
            "process" => Ok(Phase::Process),
            "post_process" | "postprocess" => Ok(Phase::PostProcess),
            "output" => Ok(Phase::Output),
            _ => Err(Error::ConfigParse {
                message: format!("Unknown phase '{}'", s),
                hint: Some("Use one of: input, process, post_process, output".to_string()),
            }),
        }
    }
}
