//! # Engine
//!
//! The engine validates the pipeline graph, then dispatches pipelines onto
//! their own threads as soon as every pipeline they depend on has completed
//! all four phases. At most `concurrency` pipelines are in flight at once;
//! each completion re-evaluates which pipelines became eligible.
//!
//! Deployment pipelines are held back until every regular pipeline finished,
//! at which point [`BeforeDeployment`] is raised.
//!
//! ## Failures
//!
//! A failing pipeline with `continue_on_error` is recorded in the result and
//! its dependents are skipped; unrelated pipelines keep running. Any other
//! failure stops dispatching, lets in-flight pipelines finish and is returned
//! as the run's error.
//!
//! ## Cancellation
//!
//! Cancelling the engine's token stops dispatching; in-flight steps observe
//! the token and unwind. The result then holds only phases that completed
//! and reports [`RunStatus::Cancelled`].

use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread::{self, Scope};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::cache::{ArtifactCache, CacheStats};
use crate::cancel::CancellationToken;
use crate::context::RunState;
use crate::error::{Error, Result};
use crate::events::{BeforeDeployment, EngineFinished, EngineStarting, EventBus};
use crate::execution::ordering::{self, ExecutionPlan};
use crate::execution::phase_executor::run_pipeline;
use crate::filesystem::FileSystem;
use crate::fingerprint::Fingerprinter;
use crate::metadata::Metadata;
use crate::outputs::{PipelineOutputs, SharedOutputs};
use crate::pipeline::Pipeline;
use crate::retry::RetryPolicy;
use crate::validation::{Findings, ValidationFinding};
use crate::write_tracker::{WriteStats, WriteTracker};

/// Knobs that shape one engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Maximum number of pipelines in flight.
    pub concurrency: usize,
    /// Size of the per-document worker pool; `None` uses rayon's global pool.
    pub worker_threads: Option<usize>,
    /// Disable the artifact cache.
    pub no_cache: bool,
    /// Default for pipelines that do not set `continue_on_error`.
    pub continue_on_error: bool,
    /// Metadata keys excluded from fingerprints.
    pub volatile_keys: Vec<String>,
    /// Global settings visible to every step.
    pub values: Metadata,
    pub retry: RetryPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            worker_threads: None,
            no_cache: false,
            continue_on_error: false,
            volatile_keys: Vec::new(),
            values: Metadata::new(),
            retry: RetryPolicy::default(),
        }
    }
}

pub fn default_concurrency() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

/// A pipeline that failed without halting the run.
#[derive(Debug)]
pub struct PipelineFailure {
    pub pipeline: String,
    pub error: Error,
}

#[derive(Debug)]
pub struct EngineResult {
    pub outputs: PipelineOutputs,
    pub status: RunStatus,
    pub failures: Vec<PipelineFailure>,
    /// Pipelines not run because a dependency failed or was skipped.
    pub skipped: Vec<String>,
    pub findings: Vec<ValidationFinding>,
    /// Output writes performed and skipped during this run.
    pub writes: WriteStats,
    pub cache: CacheStats,
    pub elapsed: Duration,
}

impl EngineResult {
    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Cancelled
    }

    /// Completed with no recorded failures.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed && self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl Status {
    fn is_finished(self) -> bool {
        !matches!(self, Status::Pending | Status::Running)
    }
}

#[derive(Default)]
struct Dispatch {
    failures: Vec<PipelineFailure>,
    skipped: Vec<String>,
    halted: Option<Error>,
    cancelled: bool,
}

type Completion = (usize, Result<()>);

pub struct Engine {
    pipelines: Vec<Pipeline>,
    options: EngineOptions,
    fs: Arc<dyn FileSystem>,
    events: Arc<EventBus>,
    artifacts: Arc<ArtifactCache>,
    writes: Arc<WriteTracker>,
    cancel: CancellationToken,
}

impl Engine {
    /// An engine over `fs` sharing the process-wide write tracker.
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            pipelines: Vec::new(),
            options: EngineOptions::default(),
            fs,
            events: Arc::new(EventBus::new()),
            artifacts: Arc::new(ArtifactCache::new(true)),
            writes: WriteTracker::process_wide(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.artifacts = Arc::new(ArtifactCache::new(!options.no_cache));
        self.options = options;
        self
    }

    pub fn with_write_tracker(mut self, writes: Arc<WriteTracker>) -> Self {
        self.writes = writes;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipelines.push(pipeline);
        self
    }

    pub fn add_pipeline(&mut self, pipeline: Pipeline) -> &mut Self {
        self.pipelines.push(pipeline);
        self
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn artifact_cache(&self) -> &ArtifactCache {
        &self.artifacts
    }

    pub fn write_tracker(&self) -> &Arc<WriteTracker> {
        &self.writes
    }

    /// Token that cancels runs of this engine.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Empty the output location and forget every recorded write, so the
    /// next run writes each document again.
    pub fn clean_output(&self) -> Result<()> {
        debug!("Cleaning output and clearing recorded writes");
        self.fs.clean_output()?;
        self.writes.clear()
    }

    /// Validate the pipelines and compute their execution order.
    pub fn plan(&self) -> Result<ExecutionPlan> {
        ordering::plan(&self.pipelines)
    }

    /// Run every pipeline.
    ///
    /// Configuration errors are returned before any phase runs. The artifact
    /// cache is reset when the run ends, whatever the outcome.
    pub fn run(&self) -> Result<EngineResult> {
        let plan = self.plan()?;
        let start = Instant::now();
        let run = Arc::new(self.run_state(&plan)?);
        let writes_before = self.writes.stats();
        let cache_before = self.artifacts.stats();

        info!(
            "Executing {} pipelines with concurrency {}",
            plan.len(),
            self.options.concurrency.max(1)
        );
        let outcome = self
            .events
            .notify(&EngineStarting {
                pipelines: plan.ordered_names().iter().map(|s| s.to_string()).collect(),
            })
            .and_then(|()| self.dispatch(&plan, &run));

        let elapsed = start.elapsed();
        let (cancelled, failed) = match &outcome {
            Ok(dispatch) => (
                dispatch.cancelled,
                dispatch.halted.is_some() || !dispatch.failures.is_empty(),
            ),
            Err(_) => (false, true),
        };
        let finished = self.events.notify(&EngineFinished {
            elapsed,
            cancelled,
            failed,
        });
        let cache = self.artifacts.stats().since(&cache_before);
        if let Err(e) = self.artifacts.reset() {
            warn!("Failed to reset artifact cache: {}", e);
        }

        let dispatch = outcome?;
        if let Some(error) = dispatch.halted {
            error!("Execution halted after {:?}", elapsed);
            return Err(error);
        }
        finished?;

        let status = if dispatch.cancelled {
            warn!("Execution cancelled after {:?}", elapsed);
            RunStatus::Cancelled
        } else {
            info!("Executed {} pipelines in {:?}", plan.len(), elapsed);
            RunStatus::Completed
        };

        Ok(EngineResult {
            outputs: run.outputs.snapshot()?,
            status,
            failures: dispatch.failures,
            skipped: dispatch.skipped,
            findings: run.findings.snapshot(),
            writes: self.writes.stats().since(&writes_before),
            cache,
            elapsed,
        })
    }

    fn run_state(&self, plan: &ExecutionPlan) -> Result<RunState> {
        let pool = match self.options.worker_threads {
            Some(threads) => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("quire-worker-{}", i))
                    .build()
                    .map_err(|e| Error::execution(format!("Failed to build worker pool: {}", e)))?,
            )),
            None => None,
        };
        Ok(RunState {
            fs: Arc::clone(&self.fs),
            events: Arc::clone(&self.events),
            artifacts: Arc::clone(&self.artifacts),
            writes: Arc::clone(&self.writes),
            outputs: SharedOutputs::new(),
            findings: Findings::new(),
            cancel: self.cancel.clone(),
            pool,
            fingerprinter: Fingerprinter::new(self.options.volatile_keys.iter().cloned()),
            retry: self.options.retry,
            values: self.options.values.clone(),
            dependencies: plan.dependency_names(),
            visible: plan.visible_names(),
        })
    }

    fn continues_on_error(&self, index: usize) -> bool {
        self.pipelines[index]
            .continue_on_error()
            .unwrap_or(self.options.continue_on_error)
    }

    fn dispatch(&self, plan: &ExecutionPlan, run: &Arc<RunState>) -> Result<Dispatch> {
        let mut status = vec![Status::Pending; plan.len()];
        let mut report = Dispatch::default();
        let limit = self.options.concurrency.max(1);
        let mut deployment_open = !plan.has_deployment();

        thread::scope(|scope| -> Result<()> {
            let (sender, receiver) = mpsc::channel::<Completion>();
            let mut running = 0usize;

            loop {
                let dispatching = report.halted.is_none() && !run.cancel.is_cancelled();

                let regular_done = |status: &[Status]| {
                    (0..plan.len()).all(|i| plan.is_deployment(i) || status[i].is_finished())
                };

                if dispatching && !deployment_open {
                    if regular_done(&status) {
                        let deployment_pipelines: Vec<String> = plan
                            .order()
                            .iter()
                            .filter(|&&i| plan.is_deployment(i))
                            .map(|&i| plan.name(i).to_string())
                            .collect();
                        info!("Starting {} deployment pipelines", deployment_pipelines.len());
                        match run.events.notify(&BeforeDeployment {
                            deployment_pipelines,
                        }) {
                            Ok(()) => deployment_open = true,
                            Err(e) => report.halted = Some(e),
                        }
                    }
                }

                if report.halted.is_none() && dispatching {
                    for &index in plan.order() {
                        if running >= limit {
                            break;
                        }
                        if status[index] != Status::Pending
                            || (plan.is_deployment(index) && !deployment_open)
                        {
                            continue;
                        }
                        let dependencies = plan.dependencies(index);
                        let blocked_by = dependencies
                            .iter()
                            .find(|&&d| matches!(status[d], Status::Failed | Status::Skipped));
                        if let Some(&blocker) = blocked_by {
                            warn!(
                                "Skipping pipeline '{}': dependency '{}' did not complete",
                                plan.name(index),
                                plan.name(blocker)
                            );
                            status[index] = Status::Skipped;
                            report.skipped.push(plan.name(index).to_string());
                            continue;
                        }
                        if dependencies.iter().all(|&d| status[d] == Status::Completed) {
                            status[index] = Status::Running;
                            running += 1;
                            self.spawn(scope, index, run, sender.clone())?;
                        }
                    }
                }

                if running == 0 {
                    // The last regular pipelines may have just been skipped.
                    if dispatching
                        && report.halted.is_none()
                        && !deployment_open
                        && regular_done(&status)
                    {
                        continue;
                    }
                    break;
                }
                let Ok((index, result)) = receiver.recv() else {
                    break;
                };
                running -= 1;
                let name = plan.name(index);
                match result {
                    Ok(()) => {
                        debug!("Pipeline '{}' completed", name);
                        status[index] = Status::Completed;
                    }
                    // A step may only report cancellation the token asked for.
                    Err(e) if e.is_cancellation() && run.cancel.is_cancelled() => {
                        debug!("Pipeline '{}' stopped by cancellation", name);
                        status[index] = Status::Cancelled;
                    }
                    Err(e) => {
                        status[index] = Status::Failed;
                        if self.continues_on_error(index) {
                            error!("Pipeline '{}' failed, continuing: {}", name, e);
                            report.failures.push(PipelineFailure {
                                pipeline: name.to_string(),
                                error: e,
                            });
                        } else if report.halted.is_none() {
                            error!("Pipeline '{}' failed: {}", name, e);
                            report.halted = Some(e);
                        } else {
                            error!("Pipeline '{}' also failed: {}", name, e);
                            report.failures.push(PipelineFailure {
                                pipeline: name.to_string(),
                                error: e,
                            });
                        }
                    }
                }
            }
            Ok(())
        })?;

        report.cancelled = run.cancel.is_cancelled()
            && status
                .iter()
                .any(|s| matches!(s, Status::Pending | Status::Cancelled));
        Ok(report)
    }

    fn spawn<'scope>(
        &'scope self,
        scope: &'scope Scope<'scope, '_>,
        index: usize,
        run: &Arc<RunState>,
        sender: mpsc::Sender<Completion>,
    ) -> Result<()> {
        let pipeline = &self.pipelines[index];
        let run = Arc::clone(run);
        debug!("Dispatching pipeline '{}'", pipeline.name());
        thread::Builder::new()
            .name(format!("pipeline-{}", pipeline.name()))
            .spawn_scoped(scope, move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| run_pipeline(pipeline, &run)))
                    .unwrap_or_else(|payload| {
                        Err(Error::execution(format!(
                            "Pipeline '{}' panicked: {}",
                            pipeline.name(),
                            panic_message(payload.as_ref())
                        )))
                    });
                // The coordinator may already be gone after a spawn error.
                let _ = sender.send((index, result));
            })?;
        Ok(())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
