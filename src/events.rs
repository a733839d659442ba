//! # Event Bus
//!
//! Typed publish/subscribe where the payload type is the routing key.
//! Handlers return a [`Flow`]: `Continue` lets the next handler run,
//! `Replace(documents)` supplies replacement outputs and stops dispatch, so at
//! most one replacement can win per raise.
//!
//! The engine raises a fixed set of events (defined below). Anything else
//! implementing [`Event`] can travel over the same bus, but the engine never
//! raises it.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::trace;

use crate::context::ExecutionContext;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::phase::Phase;

/// Marker for values that can be raised on an [`EventBus`].
pub trait Event: Any + Send + Sync {}

/// What a handler wants to happen next.
#[derive(Debug, Clone)]
pub enum Flow {
    Continue,
    Replace(Vec<Document>),
}

type Handler = Arc<dyn Fn(&dyn Any) -> Result<Flow> + Send + Sync>;

/// Handlers keyed by event type.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<TypeId, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler that may replace outputs.
    pub fn subscribe<E, F>(&self, handler: F)
    where
        E: Event,
        F: Fn(&E) -> Result<Flow> + Send + Sync + 'static,
    {
        let erased: Handler = Arc::new(move |event: &dyn Any| match event.downcast_ref::<E>() {
            Some(event) => handler(event),
            None => Ok(Flow::Continue),
        });
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(TypeId::of::<E>())
            .or_default()
            .push(erased);
    }

    /// Register an observer that never replaces outputs.
    pub fn on<E, F>(&self, observer: F)
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe(move |event: &E| {
            observer(event);
            Ok(Flow::Continue)
        });
    }

    pub fn has_handlers<E: Event>(&self) -> bool {
        self.handler_count::<E>() > 0
    }

    pub fn handler_count<E: Event>(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .map_or(0, Vec::len)
    }

    fn handlers_for<E: Event>(&self) -> Vec<Handler> {
        // Snapshot so handlers may subscribe while being dispatched.
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .cloned()
            .unwrap_or_default()
    }

    /// Dispatch `event` in subscription order. Returns the first replacement
    /// any handler supplied; later handlers do not run.
    pub fn raise<E: Event>(&self, event: &E) -> Result<Option<Vec<Document>>> {
        for handler in self.handlers_for::<E>() {
            if let Flow::Replace(documents) = handler(event as &dyn Any)? {
                trace!(
                    "Handler for {} replaced outputs with {} documents",
                    std::any::type_name::<E>(),
                    documents.len()
                );
                return Ok(Some(documents));
            }
        }
        Ok(None)
    }

    /// Dispatch an event whose outputs cannot be replaced.
    pub fn notify<E: Event>(&self, event: &E) -> Result<()> {
        match self.raise(event)? {
            None => Ok(()),
            Some(_) => Err(Error::usage(format!(
                "Handlers of {} cannot replace outputs",
                std::any::type_name::<E>()
            ))),
        }
    }
}

/// Raised once before any pipeline is dispatched.
#[derive(Debug, Clone)]
pub struct EngineStarting {
    /// Pipelines in execution order.
    pub pipelines: Vec<String>,
}

/// Raised once at the end of every run, whatever its outcome.
///
/// The engine resets its artifact cache right after this event.
#[derive(Debug, Clone)]
pub struct EngineFinished {
    pub elapsed: Duration,
    pub cancelled: bool,
    pub failed: bool,
}

/// Raised after every non-deployment pipeline finished and before the first
/// deployment pipeline starts. Not raised when there are no deployment
/// pipelines.
#[derive(Debug, Clone)]
pub struct BeforeDeployment {
    pub deployment_pipelines: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BeforePipelinePhase {
    pub pipeline: String,
    pub phase: Phase,
    pub inputs: Vec<Document>,
}

#[derive(Debug, Clone)]
pub struct AfterPipelinePhase {
    pub pipeline: String,
    pub phase: Phase,
    pub elapsed: Duration,
    pub outputs: Vec<Document>,
}

/// Raised before a step runs. A replacement becomes the step's output and
/// the step itself is skipped.
#[derive(Clone)]
pub struct BeforeModule {
    pub context: ExecutionContext,
    pub module: String,
    pub inputs: Vec<Document>,
}

/// Raised after a step ran or was skipped. A replacement becomes the step's
/// output unless a `BeforeModule` handler already replaced it, which is a
/// usage error.
#[derive(Clone)]
pub struct AfterModule {
    pub context: ExecutionContext,
    pub module: String,
    pub outputs: Vec<Document>,
    pub elapsed: Duration,
    pub overridden: bool,
}

impl Event for EngineStarting {}
impl Event for EngineFinished {}
impl Event for BeforeDeployment {}
impl Event for BeforePipelinePhase {}
impl Event for AfterPipelinePhase {}
impl Event for BeforeModule {}
impl Event for AfterModule {}
