//! Module chain execution
//!
//! Runs a list of steps in order, each step receiving the previous step's
//! output. Around every step a [`BeforeModule`] and an [`AfterModule`] event
//! are raised; the first may replace the step's output (and skip the step),
//! the second may replace it only if the first did not.

use std::time::Instant;

use log::{debug, trace};

use crate::context::ExecutionContext;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::events::{AfterModule, BeforeModule};
use crate::module::Module;

/// Run `modules` over `inputs`. Cancellation is checked before and after
/// every step.
pub fn run_chain(
    modules: &[Box<dyn Module>],
    inputs: Vec<Document>,
    context: &ExecutionContext,
) -> Result<Vec<Document>> {
    let mut documents = inputs;
    for module in modules {
        context.check_cancelled()?;
        documents = run_module(module.as_ref(), documents, context)?;
        context.check_cancelled()?;
    }
    Ok(documents)
}

fn run_module(
    module: &dyn Module,
    inputs: Vec<Document>,
    context: &ExecutionContext,
) -> Result<Vec<Document>> {
    let name = module.name();
    let step_context = context.for_module(name);
    let events = context.events();
    let input_count = inputs.len();
    let start = Instant::now();

    let replaced = if events.has_handlers::<BeforeModule>() {
        events.raise(&BeforeModule {
            context: step_context.clone(),
            module: name.to_string(),
            inputs: inputs.clone(),
        })?
    } else {
        None
    };

    let overridden = replaced.is_some();
    let mut outputs = match replaced {
        Some(documents) => {
            debug!(
                "{}/{}: outputs of '{}' supplied by a handler, step skipped",
                context.pipeline(),
                context.phase(),
                name
            );
            documents
        }
        None => module
            .execute(inputs, &step_context)
            .map_err(|e| attribute(e, context, name))?,
    };
    let elapsed = start.elapsed();

    if events.has_handlers::<AfterModule>() {
        let replacement = events.raise(&AfterModule {
            context: step_context,
            module: name.to_string(),
            outputs: outputs.clone(),
            elapsed,
            overridden,
        })?;
        if let Some(documents) = replacement {
            if overridden {
                return Err(Error::usage(format!(
                    "Outputs of '{}' in {}/{} were already replaced before the step ran",
                    name,
                    context.pipeline(),
                    context.phase()
                )));
            }
            outputs = documents;
        }
    }

    trace!(
        "{}/{}: '{}' turned {} documents into {} in {:?}",
        context.pipeline(),
        context.phase(),
        name,
        input_count,
        outputs.len(),
        elapsed
    );
    Ok(outputs)
}

/// Attribute a step failure to the step, keeping the innermost attribution
/// for nested steps and leaving cancellation untouched.
fn attribute(error: Error, context: &ExecutionContext, module: &str) -> Error {
    match error {
        Error::Module { .. } | Error::Cancelled => error,
        other => Error::Module {
            pipeline: context.pipeline().to_string(),
            phase: context.phase(),
            module: module.to_string(),
            source: Box::new(other),
        },
    }
}
