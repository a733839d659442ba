//! Step registry
//!
//! Maps the step names used in a project file to constructors. A step entry
//! is either a bare name (`- write_files`) or a single-key mapping whose value
//! holds the step's arguments (`- filter: { key: draft }`).

use std::collections::BTreeMap;

use log::debug;
use serde_yaml::Value;

use crate::error::{Error, Result};
use crate::module::{Module, ModuleList};
use crate::steps;
use crate::suggestions;

/// Builds a step from its arguments. The registry is passed along so steps
/// holding nested steps can build them.
pub type ModuleFactory = fn(&Value, &ModuleRegistry) -> Result<Box<dyn Module>>;

#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: BTreeMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in step.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register("read_files", steps::read_files::create)
            .register("set_metadata", steps::set_metadata::create)
            .register("set_destination", steps::set_destination::create)
            .register("replace_text", steps::replace_text::create)
            .register("filter", steps::filter::create)
            .register("order_by", steps::order_by::create)
            .register("from_dependencies", steps::from_dependencies::create)
            .register("require_metadata", steps::require_metadata::create)
            .register("write_files", steps::write_files::create)
            .register("group", steps::group::create);
        registry
    }

    /// Register `factory` under `name`, replacing any earlier registration.
    pub fn register(&mut self, name: impl Into<String>, factory: ModuleFactory) -> &mut Self {
        let name = name.into();
        if self.factories.insert(name.clone(), factory).is_some() {
            debug!("Step '{}' re-registered", name);
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn create(&self, name: &str, args: &Value) -> Result<Box<dyn Module>> {
        let factory = self.factories.get(name).ok_or_else(|| Error::UnknownModule {
            name: name.to_string(),
            hint: Some(suggestions::unknown_module_hint(name, &self.names())),
        })?;
        factory(args, self)
    }

    /// Build one step entry of a project file.
    pub fn create_step(&self, step: &Value) -> Result<Box<dyn Module>> {
        match step {
            Value::String(name) => self.create(name, &Value::Null),
            Value::Mapping(map) if map.len() == 1 => {
                let (key, args) = map.iter().next().ok_or_else(|| Error::ConfigParse {
                    message: "Empty step entry".to_string(),
                    hint: None,
                })?;
                let name = key.as_str().ok_or_else(|| Error::ConfigParse {
                    message: format!("Step name must be a string, got {:?}", key),
                    hint: None,
                })?;
                self.create(name, args)
            }
            Value::Mapping(map) => Err(Error::ConfigParse {
                message: format!("A step entry must have exactly one key, found {}", map.len()),
                hint: Some("Write each step as its own list item: '- name: { ... }'".to_string()),
            }),
            other => Err(Error::ConfigParse {
                message: format!("Expected a step name or mapping, got {:?}", other),
                hint: None,
            }),
        }
    }

    pub fn create_steps(&self, steps: &[Value]) -> Result<ModuleList> {
        steps.iter().map(|step| self.create_step(step)).collect()
    }
}
