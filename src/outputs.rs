//! Per-pipeline, per-phase output collections
//!
//! [`SharedOutputs`] is the live, append-only store pipelines write into while
//! a run is in progress. Each `(pipeline, phase)` slot is filled at most once.
//! [`PipelineOutputs`] is the read-only snapshot handed back when the run ends.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::document::Document;
use crate::error::{Error, Result};
use crate::phase::Phase;

pub type PhaseOutputs = BTreeMap<Phase, Arc<Vec<Document>>>;

/// Concurrent, append-only output store for one engine run.
#[derive(Debug, Default)]
pub struct SharedOutputs {
    slots: RwLock<HashMap<String, PhaseOutputs>>,
}

impl SharedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a phase's outputs. Publishing the same slot twice is a usage
    /// error.
    pub fn record(&self, pipeline: &str, phase: Phase, documents: Vec<Document>) -> Result<()> {
        let mut slots = self.slots.write().map_err(|_| Error::LockPoisoned {
            context: "pipeline outputs".to_string(),
        })?;
        let phases = slots.entry(pipeline.to_string()).or_default();
        if phases.contains_key(&phase) {
            return Err(Error::usage(format!(
                "Outputs for {}/{} were already recorded",
                pipeline, phase
            )));
        }
        phases.insert(phase, Arc::new(documents));
        Ok(())
    }

    pub fn get(&self, pipeline: &str, phase: Phase) -> Result<Option<Arc<Vec<Document>>>> {
        let slots = self.slots.read().map_err(|_| Error::LockPoisoned {
            context: "pipeline outputs".to_string(),
        })?;
        Ok(slots
            .get(pipeline)
            .and_then(|phases| phases.get(&phase))
            .cloned())
    }

    pub fn snapshot(&self) -> Result<PipelineOutputs> {
        let slots = self.slots.read().map_err(|_| Error::LockPoisoned {
            context: "pipeline outputs".to_string(),
        })?;
        Ok(PipelineOutputs {
            pipelines: slots
                .iter()
                .map(|(name, phases)| (name.clone(), phases.clone()))
                .collect(),
        })
    }
}

/// Read-only outputs of a finished (or cancelled) run.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutputs {
    pipelines: BTreeMap<String, PhaseOutputs>,
}

impl PipelineOutputs {
    pub fn get(&self, pipeline: &str, phase: Phase) -> Option<&[Document]> {
        self.pipelines
            .get(pipeline)
            .and_then(|phases| phases.get(&phase))
            .map(|documents| documents.as_slice())
    }

    /// Output of the pipeline's last phase, if all phases completed.
    pub fn final_output(&self, pipeline: &str) -> Option<&[Document]> {
        self.get(pipeline, Phase::Output)
    }

    /// Completed phases of a pipeline, in phase order.
    pub fn phases(&self, pipeline: &str) -> Vec<Phase> {
        self.pipelines
            .get(pipeline)
            .map(|phases| phases.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    pub fn contains(&self, pipeline: &str) -> bool {
        self.pipelines.contains_key(pipeline)
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }
}
