//! # Execution Context
//!
//! Everything a step may touch while it runs: the file system, the event bus,
//! the run-scoped artifact cache, the write tracker, the outputs of the
//! pipelines it depends on, the validation findings sink and the run's
//! cancellation token.
//!
//! The state shared by one engine run lives in [`RunState`]; an
//! [`ExecutionContext`] is a cheap handle to it plus the position of the
//! current step (pipeline, phase, step path).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::cache::{ArtifactCache, ArtifactKey};
use crate::cancel::CancellationToken;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::filesystem::{FileSystem, MemoryFileSystem};
use crate::fingerprint::{Fingerprint, Fingerprinter};
use crate::metadata::Metadata;
use crate::module::InputOrder;
use crate::outputs::SharedOutputs;
use crate::path::NormalizedPath;
use crate::phase::Phase;
use crate::retry::RetryPolicy;
use crate::validation::{Findings, Severity, ValidationFinding};
use crate::write_tracker::WriteTracker;

/// State shared by every pipeline of one engine run.
pub struct RunState {
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) artifacts: Arc<ArtifactCache>,
    pub(crate) writes: Arc<WriteTracker>,
    pub(crate) outputs: SharedOutputs,
    pub(crate) findings: Findings,
    pub(crate) cancel: CancellationToken,
    pub(crate) pool: Option<Arc<ThreadPool>>,
    pub(crate) fingerprinter: Fingerprinter,
    pub(crate) retry: RetryPolicy,
    pub(crate) values: Metadata,
    /// Declared dependencies per pipeline, in declaration order.
    pub(crate) dependencies: HashMap<String, Vec<String>>,
    /// Transitive dependencies per pipeline; the only outputs it may read.
    pub(crate) visible: HashMap<String, BTreeSet<String>>,
}

impl RunState {
    /// Run state with default collaborators around the given file system.
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            events: Arc::new(EventBus::new()),
            artifacts: Arc::new(ArtifactCache::default()),
            writes: Arc::new(WriteTracker::new()),
            outputs: SharedOutputs::new(),
            findings: Findings::new(),
            cancel: CancellationToken::new(),
            pool: None,
            fingerprinter: Fingerprinter::default(),
            retry: RetryPolicy::default(),
            values: Metadata::new(),
            dependencies: HashMap::new(),
            visible: HashMap::new(),
        }
    }
}

/// Handle given to steps and event handlers.
#[derive(Clone)]
pub struct ExecutionContext {
    run: Arc<RunState>,
    pipeline: String,
    phase: Phase,
    module_path: Vec<String>,
}

impl ExecutionContext {
    pub(crate) fn new(run: Arc<RunState>, pipeline: impl Into<String>, phase: Phase) -> Self {
        Self {
            run,
            pipeline: pipeline.into(),
            phase,
            module_path: Vec::new(),
        }
    }

    /// A context outside any engine run, backed by an in-memory file system.
    /// Useful for exercising a single step.
    pub fn detached(pipeline: impl Into<String>, phase: Phase) -> Self {
        Self::new(
            Arc::new(RunState::new(Arc::new(MemoryFileSystem::new()))),
            pipeline,
            phase,
        )
    }

    /// Like [`ExecutionContext::detached`] with a caller-supplied file system.
    pub fn detached_with(fs: Arc<dyn FileSystem>, pipeline: impl Into<String>, phase: Phase) -> Self {
        Self::new(Arc::new(RunState::new(fs)), pipeline, phase)
    }

    /// Context for a step nested below the current one.
    pub(crate) fn for_module(&self, module: &str) -> Self {
        let mut context = self.clone();
        context.module_path.push(module.to_string());
        context
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Names of the enclosing steps, outermost first.
    pub fn module_path(&self) -> &[String] {
        &self.module_path
    }

    pub fn file_system(&self) -> &dyn FileSystem {
        self.run.fs.as_ref()
    }

    pub fn events(&self) -> &EventBus {
        &self.run.events
    }

    pub fn write_tracker(&self) -> &WriteTracker {
        &self.run.writes
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.run.retry
    }

    /// Global settings values from the project file.
    pub fn settings(&self) -> &Metadata {
        &self.run.values
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.run.cancel
    }

    pub fn check_cancelled(&self) -> Result<()> {
        self.run.cancel.check()
    }

    pub fn fingerprint(&self, document: &Document) -> Result<Fingerprint> {
        self.run.fingerprinter.fingerprint(document)
    }

    /// Declared dependencies of the current pipeline.
    pub fn dependencies(&self) -> &[String] {
        self.run
            .dependencies
            .get(&self.pipeline)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Outputs of a dependency's final phase.
    pub fn outputs_of(&self, pipeline: &str) -> Result<Arc<Vec<Document>>> {
        self.outputs_of_phase(pipeline, Phase::Output)
    }

    /// Outputs of one phase of a (possibly transitive) dependency.
    pub fn outputs_of_phase(&self, pipeline: &str, phase: Phase) -> Result<Arc<Vec<Document>>> {
        let canonical = self
            .run
            .visible
            .get(&self.pipeline)
            .and_then(|deps| deps.iter().find(|d| d.eq_ignore_ascii_case(pipeline)));
        let Some(canonical) = canonical else {
            return Err(Error::UndeclaredDependency {
                pipeline: self.pipeline.clone(),
                requested: pipeline.to_string(),
            });
        };
        self.run.outputs.get(canonical, phase)?.ok_or_else(|| {
            Error::execution(format!(
                "No {} outputs recorded for pipeline '{}'",
                phase, pipeline
            ))
        })
    }

    /// Run-scoped cached artifact keyed by `namespace` and `fingerprint`.
    /// Concurrent callers with the same key share one computation.
    pub fn cached<T, F>(&self, namespace: &str, fingerprint: Fingerprint, compute: F) -> Result<Arc<T>>
    where
        T: std::any::Any + Send + Sync,
        F: FnOnce() -> Result<T>,
    {
        self.run
            .artifacts
            .get_or_compute(ArtifactKey::new(namespace, fingerprint), compute)
    }

    pub fn add_finding(
        &self,
        severity: Severity,
        source: Option<&NormalizedPath>,
        message: impl Into<String>,
    ) {
        self.run.findings.push(ValidationFinding {
            severity,
            pipeline: self.pipeline.clone(),
            phase: self.phase,
            source: source.cloned(),
            message: message.into(),
        });
    }

    /// Findings recorded so far in this run.
    pub fn findings(&self) -> Vec<ValidationFinding> {
        self.run.findings.snapshot()
    }

    /// Map every document with `body`, in parallel on the run's worker pool
    /// or sequentially in input order. Cancellation is checked before each
    /// document.
    pub fn for_each_document<F>(
        &self,
        inputs: Vec<Document>,
        order: InputOrder,
        body: F,
    ) -> Result<Vec<Document>>
    where
        F: Fn(Document) -> Result<Document> + Send + Sync,
    {
        match order {
            InputOrder::Sequential => inputs
                .into_iter()
                .map(|document| {
                    self.check_cancelled()?;
                    body(document)
                })
                .collect(),
            InputOrder::Parallel => {
                let work = || {
                    inputs
                        .into_par_iter()
                        .map(|document| {
                            self.check_cancelled()?;
                            body(document)
                        })
                        .collect::<Result<Vec<_>>>()
                };
                match &self.run.pool {
                    Some(pool) => pool.install(work),
                    None => work(),
                }
            }
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("pipeline", &self.pipeline)
            .field("phase", &self.phase)
            .field("module_path", &self.module_path)
            .finish()
    }
}
