//! # Steps
//!
//! A step (module) consumes a document collection and produces a new one.
//! Steps only talk to each other through those collections.
//!
//! Besides implementing [`Module`] directly, a step can be written as a
//! closure over the whole collection ([`FnModule`]) or over one document at a
//! time ([`PerDocument`]). A [`ModuleGroup`] nests a list of steps and runs
//! them as a chain of its own.

use crate::context::ExecutionContext;
use crate::document::Document;
use crate::error::Result;
use crate::execution::chain;

/// A single transformation step.
pub trait Module: Send + Sync {
    /// Name used in logs, events and error attribution.
    fn name(&self) -> &str;

    fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext) -> Result<Vec<Document>>;
}

/// An ordered list of steps.
pub type ModuleList = Vec<Box<dyn Module>>;

/// How a per-document step walks its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputOrder {
    /// Documents are processed concurrently on the worker pool.
    #[default]
    Parallel,
    /// Documents are processed one at a time, in input order.
    Sequential,
}

type CollectionFn =
    dyn Fn(Vec<Document>, &ExecutionContext) -> Result<Vec<Document>> + Send + Sync;

/// A step backed by a closure over the whole collection.
pub struct FnModule {
    name: String,
    body: Box<CollectionFn>,
}

impl FnModule {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Vec<Document>, &ExecutionContext) -> Result<Vec<Document>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Box::new(body),
        }
    }
}

impl Module for FnModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext) -> Result<Vec<Document>> {
        (self.body)(inputs, context)
    }
}

type DocumentFn = dyn Fn(Document, &ExecutionContext) -> Result<Document> + Send + Sync;

/// A step that maps every document independently.
pub struct PerDocument {
    name: String,
    order: InputOrder,
    body: Box<DocumentFn>,
}

impl PerDocument {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Document, &ExecutionContext) -> Result<Document> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            order: InputOrder::default(),
            body: Box::new(body),
        }
    }

    pub fn sequential(mut self) -> Self {
        self.order = InputOrder::Sequential;
        self
    }

    pub fn with_order(mut self, order: InputOrder) -> Self {
        self.order = order;
        self
    }

    pub fn order(&self) -> InputOrder {
        self.order
    }
}

impl Module for PerDocument {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext) -> Result<Vec<Document>> {
        context.for_each_document(inputs, self.order, |document| (self.body)(document, context))
    }
}

/// A nested list of steps run as one step.
pub struct ModuleGroup {
    name: String,
    modules: ModuleList,
}

impl ModuleGroup {
    pub fn new(name: impl Into<String>, modules: ModuleList) -> Self {
        Self {
            name: name.into(),
            modules,
        }
    }

    pub fn modules(&self) -> &[Box<dyn Module>] {
        &self.modules
    }
}

impl Module for ModuleGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, inputs: Vec<Document>, context: &ExecutionContext) -> Result<Vec<Document>> {
        chain::run_chain(&self.modules, inputs, context)
    }
}
