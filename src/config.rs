//! # Project File Schema and Parsing
//!
//! This module defines the data structures behind `quire.yaml`, the file that
//! declares a project's settings and pipelines, and the logic that turns it
//! into a ready-to-run [`Engine`].
//!
//! ## Layout
//!
//! ```yaml
//! settings:
//!   input: content
//!   output: public
//!   volatile_keys: [generated_at]
//! pipelines:
//!   - name: posts
//!     input:
//!       - read_files: { patterns: ["posts/**/*.md"] }
//!     process:
//!       - set_destination: { extension: html }
//!     output:
//!       - write_files
//!   - name: feed
//!     dependencies: [posts]
//!     process:
//!       - from_dependencies: {}
//! ```
//!
//! Every step entry is a single-key mapping (or a bare step name) resolved
//! through a [`ModuleRegistry`]. The same schema is accepted as TOML or JSON
//! when the file has a `.toml` or `.json` extension.
//!
//! Parsing only checks the shape of the file. Pipeline names, dependency
//! references and step arguments are validated when the pipelines are built,
//! and the dependency graph when the engine plans the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::defaults;
use crate::engine::{default_concurrency, Engine, EngineOptions};
use crate::error::{Error, Result};
use crate::filesystem::FileSystem;
use crate::metadata::Metadata;
use crate::phase::Phase;
use crate::pipeline::Pipeline;
use crate::registry::ModuleRegistry;
use crate::retry::RetryPolicy;

/// Project-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Input root, relative to the project file
    pub input: PathBuf,
    /// Output root, relative to the project file
    pub output: PathBuf,
    /// Maximum number of pipelines running at once
    pub concurrency: Option<usize>,
    /// Size of the per-document worker pool
    pub worker_threads: Option<usize>,
    /// Remove the output root's contents before building
    pub clean_output: bool,
    /// Disable the run-scoped artifact cache
    pub no_cache: bool,
    /// Default for pipelines that do not set `continue_on_error`
    pub continue_on_error: bool,
    /// Metadata keys left out of document fingerprints
    pub volatile_keys: Vec<String>,
    /// Free-form values every step can read
    pub values: Metadata,
    /// Backoff for transient I/O failures
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input: defaults::default_input_dir(),
            output: defaults::default_output_dir(),
            concurrency: None,
            worker_threads: None,
            clean_output: true,
            no_cache: false,
            continue_on_error: false,
            volatile_keys: Vec::new(),
            values: Metadata::new(),
            retry: RetryPolicy::default(),
        }
    }
}

/// One pipeline entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub isolated: bool,
    #[serde(default)]
    pub deployment: bool,
    /// Overrides [`Settings::continue_on_error`] for this pipeline.
    #[serde(default)]
    pub continue_on_error: Option<bool>,
    #[serde(default)]
    pub input: Vec<Value>,
    #[serde(default)]
    pub process: Vec<Value>,
    #[serde(default)]
    pub post_process: Vec<Value>,
    #[serde(default)]
    pub output: Vec<Value>,
}

impl PipelineConfig {
    /// Step entries declared for `phase`.
    pub fn steps(&self, phase: Phase) -> &[Value] {
        match phase {
            Phase::Input => &self.input,
            Phase::Process => &self.process,
            Phase::PostProcess => &self.post_process,
            Phase::Output => &self.output,
        }
    }

    /// Build the pipeline, resolving every step through `registry`.
    pub fn build(&self, registry: &ModuleRegistry) -> Result<Pipeline> {
        let mut builder = Pipeline::builder(&self.name)
            .dependencies(&self.dependencies)
            .isolated(self.isolated)
            .deployment(self.deployment);
        if let Some(continue_on_error) = self.continue_on_error {
            builder = builder.continue_on_error(continue_on_error);
        }
        for phase in Phase::ALL {
            for (index, step) in self.steps(phase).iter().enumerate() {
                let module = registry
                    .create_step(step)
                    .map_err(|e| locate(e, &self.name, phase, index))?;
                builder = builder.boxed_module(phase, module);
            }
        }
        builder.build()
    }
}

/// Prefix a step construction error with where the step was declared.
fn locate(error: Error, pipeline: &str, phase: Phase, index: usize) -> Error {
    match error {
        Error::ConfigParse { message, hint } => Error::ConfigParse {
            message: format!(
                "pipeline '{}', {} step {}: {}",
                pipeline,
                phase.as_str(),
                index + 1,
                message
            ),
            hint,
        },
        other => other,
    }
}

/// Supported project file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Toml,
    Json,
}

impl Format {
    /// Format implied by the file extension; anything unrecognized is YAML.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("toml") => Format::Toml,
            Some("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

/// A parsed project file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Project {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
    /// Directory the relative roots are resolved against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Project {
    /// Parse project file text in the given format.
    pub fn parse(content: &str, format: Format) -> Result<Project> {
        if content.trim().is_empty() {
            return Ok(Project::default());
        }
        let project = match format {
            Format::Yaml => serde_yaml::from_str(content).map_err(|e| Error::ConfigParse {
                message: e.to_string(),
                hint: Some(shape_hint()),
            })?,
            Format::Toml => toml::from_str(content).map_err(|e| Error::ConfigParse {
                message: e.to_string(),
                hint: Some(shape_hint()),
            })?,
            Format::Json => serde_json::from_str(content).map_err(|e| Error::ConfigParse {
                message: e.to_string(),
                hint: Some(shape_hint()),
            })?,
        };
        Ok(project)
    }

    pub fn parse_yaml(content: &str) -> Result<Project> {
        Self::parse(content, Format::Yaml)
    }

    /// Read and parse a project file; relative roots resolve against its
    /// directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Project> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(Error::Io)?;
        let mut project = Self::parse(&content, Format::from_path(path))?;
        project.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(project)
    }

    pub fn input_root(&self) -> PathBuf {
        self.base_dir.join(&self.settings.input)
    }

    pub fn output_root(&self) -> PathBuf {
        self.base_dir.join(&self.settings.output)
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineConfig> {
        self.pipelines
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Engine options implied by the settings.
    pub fn engine_options(&self) -> EngineOptions {
        let settings = &self.settings;
        EngineOptions {
            concurrency: settings.concurrency.unwrap_or_else(default_concurrency).max(1),
            worker_threads: settings.worker_threads,
            no_cache: settings.no_cache,
            continue_on_error: settings.continue_on_error,
            volatile_keys: settings.volatile_keys.clone(),
            values: settings.values.clone(),
            retry: settings.retry,
        }
    }

    pub fn build_pipelines(&self, registry: &ModuleRegistry) -> Result<Vec<Pipeline>> {
        self.pipelines.iter().map(|p| p.build(registry)).collect()
    }

    /// Engine over `fs` holding every pipeline of the project.
    pub fn build_engine(&self, registry: &ModuleRegistry, fs: Arc<dyn FileSystem>) -> Result<Engine> {
        let mut engine = Engine::new(fs).with_options(self.engine_options());
        for pipeline in self.build_pipelines(registry)? {
            engine.add_pipeline(pipeline);
        }
        Ok(engine)
    }
}

fn shape_hint() -> String {
    "A project file has a 'settings' mapping and a 'pipelines' list; each \
     pipeline needs a 'name'"
        .to_string()
}
