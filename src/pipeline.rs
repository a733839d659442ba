//! # Pipelines
//!
//! A [`Pipeline`] is a named set of four phase step lists plus the names of
//! the pipelines whose outputs it depends on and a few scheduling flags.
//!
//! - `isolated`: runs on its own; may neither declare nor be the target of
//!   dependencies, and reads no other pipeline's outputs.
//! - `deployment`: runs only after every non-deployment pipeline finished.
//! - `continue_on_error`: a failure is recorded and only this pipeline's
//!   dependents are skipped instead of halting the run.

use std::fmt;

use crate::error::{Error, Result};
use crate::module::{Module, ModuleList};
use crate::phase::Phase;

/// Validate a pipeline name: non-empty, letters, digits, `-`, `_` and `.`.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidPipelineName {
            name: name.to_string(),
            message: "name cannot be empty".to_string(),
        });
    }
    if let Some(invalid) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(Error::InvalidPipelineName {
            name: name.to_string(),
            message: format!(
                "character '{}' is not allowed (use letters, digits, '-', '_' or '.')",
                invalid
            ),
        });
    }
    Ok(())
}

pub struct Pipeline {
    name: String,
    dependencies: Vec<String>,
    isolated: bool,
    deployment: bool,
    continue_on_error: Option<bool>,
    phases: [ModuleList; 4],
}

impl Pipeline {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder {
            pipeline: Pipeline {
                name: name.into(),
                dependencies: Vec::new(),
                isolated: false,
                deployment: false,
                continue_on_error: None,
                phases: Default::default(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    pub fn is_deployment(&self) -> bool {
        self.deployment
    }

    /// The pipeline's own setting, if it has one.
    pub fn continue_on_error(&self) -> Option<bool> {
        self.continue_on_error
    }

    pub fn modules(&self, phase: Phase) -> &[Box<dyn Module>] {
        &self.phases[phase as usize]
    }

    pub fn module_count(&self) -> usize {
        self.phases.iter().map(Vec::len).sum()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<(Phase, Vec<&str>)> = Phase::ALL
            .iter()
            .map(|&phase| (phase, self.modules(phase).iter().map(|m| m.name()).collect()))
            .collect();
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("isolated", &self.isolated)
            .field("deployment", &self.deployment)
            .field("continue_on_error", &self.continue_on_error)
            .field("steps", &steps)
            .finish()
    }
}

pub struct PipelineBuilder {
    pipeline: Pipeline,
}

impl PipelineBuilder {
    /// Declare a dependency. Duplicates are ignored.
    pub fn dependency(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.pipeline.dependencies.contains(&name) {
            self.pipeline.dependencies.push(name);
        }
        self
    }

    pub fn dependencies<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(self, |builder, name| builder.dependency(name))
    }

    pub fn isolated(mut self, isolated: bool) -> Self {
        self.pipeline.isolated = isolated;
        self
    }

    pub fn deployment(mut self, deployment: bool) -> Self {
        self.pipeline.deployment = deployment;
        self
    }

    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.pipeline.continue_on_error = Some(continue_on_error);
        self
    }

    /// Append a step to a phase.
    pub fn module(mut self, phase: Phase, module: impl Module + 'static) -> Self {
        self.pipeline.phases[phase as usize].push(Box::new(module));
        self
    }

    /// Append an already boxed step to a phase.
    pub fn boxed_module(mut self, phase: Phase, module: Box<dyn Module>) -> Self {
        self.pipeline.phases[phase as usize].push(module);
        self
    }

    pub fn input(self, module: impl Module + 'static) -> Self {
        self.module(Phase::Input, module)
    }

    pub fn process(self, module: impl Module + 'static) -> Self {
        self.module(Phase::Process, module)
    }

    pub fn post_process(self, module: impl Module + 'static) -> Self {
        self.module(Phase::PostProcess, module)
    }

    pub fn output(self, module: impl Module + 'static) -> Self {
        self.module(Phase::Output, module)
    }

    /// Finish the pipeline, checking its name.
    pub fn build(self) -> Result<Pipeline> {
        validate_name(&self.pipeline.name)?;
        for dependency in &self.pipeline.dependencies {
            validate_name(dependency).map_err(|_| Error::UnknownPipeline {
                pipeline: self.pipeline.name.clone(),
                dependency: dependency.clone(),
                hint: None,
            })?;
        }
        Ok(self.pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::FnModule;

    fn noop(name: &str) -> FnModule {
        FnModule::new(name, |docs, _| Ok(docs))
    }

    #[test]
    fn test_builder_places_modules_by_phase() {
        let pipeline = Pipeline::builder("content")
            .input(noop("read"))
            .process(noop("render"))
            .process(noop("layout"))
            .output(noop("write"))
            .dependencies(["data", "data", "assets"])
            .build()
            .unwrap();

        assert_eq!(pipeline.modules(Phase::Input).len(), 1);
        assert_eq!(pipeline.modules(Phase::Process)[1].name(), "layout");
        assert!(pipeline.modules(Phase::PostProcess).is_empty());
        assert_eq!(pipeline.module_count(), 4);
        assert_eq!(pipeline.dependencies(), ["data", "assets"]);
        assert_eq!(pipeline.continue_on_error(), None);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("api-docs_v2.1").is_ok());
        assert!(matches!(
            validate_name(""),
            Err(Error::InvalidPipelineName { .. })
        ));
        let err = validate_name("my pipeline").unwrap_err();
        assert!(err.to_string().contains("' '"));
        assert!(validate_name("a/b").is_err());
    }

    #[test]
    fn test_build_rejects_invalid_names() {
        assert!(Pipeline::builder("bad name").build().is_err());
        assert!(matches!(
            Pipeline::builder("ok").dependency("no good").build(),
            Err(Error::UnknownPipeline { .. })
        ));
    }
}
