//! Phase execution
//!
//! Runs one phase of one pipeline: raises [`BeforePipelinePhase`], runs the
//! phase's chain (or passes the input through for an empty phase), raises
//! [`AfterPipelinePhase`] with the elapsed time and outputs.
//!
//! [`run_pipeline`] runs the four phases strictly in order, publishing each
//! completed phase to the run's shared outputs before the next one starts.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};

use crate::context::{ExecutionContext, RunState};
use crate::document::Document;
use crate::error::Result;
use crate::events::{AfterPipelinePhase, BeforePipelinePhase};
use crate::execution::chain;
use crate::phase::Phase;
use crate::pipeline::Pipeline;

/// Run a single phase over `inputs`.
pub fn run_phase(
    pipeline: &Pipeline,
    phase: Phase,
    inputs: Vec<Document>,
    run: &Arc<RunState>,
) -> Result<Vec<Document>> {
    let context = ExecutionContext::new(Arc::clone(run), pipeline.name(), phase);
    context.check_cancelled()?;

    let events = context.events();
    if events.has_handlers::<BeforePipelinePhase>() {
        events.notify(&BeforePipelinePhase {
            pipeline: pipeline.name().to_string(),
            phase,
            inputs: inputs.clone(),
        })?;
    }

    let start = Instant::now();
    let modules = pipeline.modules(phase);
    let outputs = if modules.is_empty() {
        inputs
    } else {
        debug!(
            "{}/{}: running {} steps over {} documents",
            pipeline.name(),
            phase,
            modules.len(),
            inputs.len()
        );
        chain::run_chain(modules, inputs, &context)?
    };
    let elapsed = start.elapsed();

    if events.has_handlers::<AfterPipelinePhase>() {
        events.notify(&AfterPipelinePhase {
            pipeline: pipeline.name().to_string(),
            phase,
            elapsed,
            outputs: outputs.clone(),
        })?;
    }

    if !modules.is_empty() {
        info!(
            "{}/{} completed in {:?} ({} documents)",
            pipeline.name(),
            phase,
            elapsed,
            outputs.len()
        );
    }
    Ok(outputs)
}

/// Run all four phases of `pipeline`. The Input phase starts from an empty
/// collection; each later phase starts from its predecessor's output.
pub fn run_pipeline(pipeline: &Pipeline, run: &Arc<RunState>) -> Result<()> {
    let mut documents = Vec::new();
    for phase in Phase::ALL {
        run.cancel.check()?;
        documents = run_phase(pipeline, phase, documents, run)?;
        run.outputs.record(pipeline.name(), phase, documents.clone())?;
    }
    Ok(())
}
