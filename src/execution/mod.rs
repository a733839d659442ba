//! Execution layers below the engine.
//!
//! ## Overview
//!
//! 1. Ordering - Validate the pipeline graph and compute a deterministic
//!    execution order (cycles and bad flags are rejected here)
//! 2. Chain - Run one ordered list of steps, piping outputs to inputs, with
//!    before/after step events that may replace a step's output once
//! 3. Phase - Run one phase of one pipeline on top of the chain, with timing
//!    and phase events; an empty phase passes its input through
//!
//! The engine drives the pipeline-level scheduling on top of these.

pub mod chain;
pub mod ordering;
pub mod phase_executor;

pub use ordering::ExecutionPlan;
