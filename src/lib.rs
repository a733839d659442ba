//! # quire
//!
//! A content pipeline engine. Documents flow through named pipelines, each
//! made of four fixed phases (input, process, post-process, output) whose
//! steps transform immutable document collections. Pipelines declare
//! dependencies on each other; the engine orders them, runs independent ones
//! concurrently, caches repeated work for the length of a run and skips
//! output writes whose content has not changed.
//!
//! ## Quick Example
//!
//! ```
//! use std::sync::Arc;
//! use quire::{Document, Engine, FnModule, MemoryFileSystem, Phase, Pipeline};
//!
//! let posts = Pipeline::builder("posts")
//!     .input(FnModule::new("seed", |_, _| Ok(vec![Document::from_text("a.md", "# A")])))
//!     .build()
//!     .unwrap();
//! let index = Pipeline::builder("index")
//!     .dependency("posts")
//!     .process(FnModule::new("collect", |inputs, ctx| {
//!         let mut documents = inputs;
//!         documents.extend(ctx.outputs_of("posts")?.iter().cloned());
//!         Ok(documents)
//!     }))
//!     .build()
//!     .unwrap();
//!
//! let engine = Engine::new(Arc::new(MemoryFileSystem::new()))
//!     .with_pipeline(posts)
//!     .with_pipeline(index);
//! let result = engine.run().unwrap();
//! assert_eq!(result.outputs.get("index", Phase::Output).unwrap().len(), 1);
//! ```
//!
//! ## Core Concepts
//!
//! - **Documents (`document`, `content`, `metadata`)**: immutable values with
//!   a source, a destination, ordered metadata and a shared content provider.
//!   Changing a document means deriving a new revision.
//! - **Steps (`module`, `steps`, `registry`)**: the [`Module`] trait, closure
//!   adapters, the built-in steps and the name-to-constructor registry used
//!   by project files.
//! - **Pipelines (`pipeline`, `phase`)**: named, dependency-declaring lists of
//!   steps per phase, optionally isolated or marked for deployment.
//! - **Execution (`execution`, `engine`)**: step chains with event overrides,
//!   the phase executor, dependency planning and the concurrent scheduler.
//! - **Run services (`context`, `cache`, `fingerprint`, `write_tracker`,
//!   `events`, `cancel`, `retry`)**: what steps can reach while they run.
//! - **Project files (`config`, `defaults`)**: `quire.yaml` parsing.

pub mod cache;
pub mod cancel;
pub mod config;
pub mod content;
pub mod context;
pub mod defaults;
pub mod document;
pub mod engine;
pub mod error;
pub mod events;
pub mod execution;
pub mod filesystem;
pub mod fingerprint;
pub mod metadata;
pub mod module;
pub mod output;
pub mod outputs;
pub mod path;
pub mod phase;
pub mod pipeline;
pub mod registry;
pub mod retry;
pub mod steps;
pub mod suggestions;
pub mod validation;
pub mod write_tracker;

#[cfg(test)]
mod path_proptest;

pub use cancel::CancellationToken;
pub use config::Project;
pub use content::ContentProvider;
pub use context::ExecutionContext;
pub use document::Document;
pub use engine::{Engine, EngineOptions, EngineResult, RunStatus};
pub use error::{Error, Result};
pub use events::{EventBus, Flow};
pub use filesystem::{FileSystem, MemoryFileSystem, PhysicalFileSystem};
pub use fingerprint::Fingerprint;
pub use metadata::Metadata;
pub use module::{FnModule, InputOrder, Module, ModuleGroup, PerDocument};
pub use path::NormalizedPath;
pub use phase::Phase;
pub use pipeline::Pipeline;
pub use registry::ModuleRegistry;
pub use validation::{Severity, ValidationFinding};
