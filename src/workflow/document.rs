//! In-memory workflow documents.
//!
//! A [`WorkflowDocument`] wraps a parsed `serde_yaml::Value` tree. Unknown
//! keys and key order survive a load/save cycle, so a rewritten workflow
//! differs from its source only where an instrumentation pass touched it.

use std::path::Path;

use serde_yaml::{Mapping, Value};

use super::{WorkflowError, WorkflowResult};

/// A GitHub Actions workflow document.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDocument {
    root: Value,
}

impl Default for WorkflowDocument {
    fn default() -> Self {
        Self {
            root: Value::Mapping(Mapping::new()),
        }
    }
}

impl WorkflowDocument {
    /// Parses a workflow from YAML text.
    ///
    /// Empty documents and documents whose root is not a mapping are
    /// rejected.
    pub fn parse(content: &str) -> WorkflowResult<Self> {
        let root: Value = serde_yaml::from_str(content)?;
        match root {
            Value::Mapping(_) => Ok(Self { root }),
            Value::Null => Err(WorkflowError::Empty),
            _ => Err(WorkflowError::NotAMapping),
        }
    }

    /// Reads and parses a workflow file.
    pub fn load(path: &Path) -> WorkflowResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Writes the document to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> WorkflowResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_yaml_string()?)?;
        Ok(())
    }

    pub fn to_yaml_string(&self) -> WorkflowResult<String> {
        Ok(serde_yaml::to_string(&self.root)?)
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Value {
        &mut self.root
    }

    /// Sets a top-level key.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        if let Some(root) = self.root.as_mapping_mut() {
            root.insert(Value::from(key), value.into());
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.root.get("name").and_then(Value::as_str)
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.set("name", Value::String(name.into()));
    }

    pub fn jobs(&self) -> Option<&Mapping> {
        self.root.get("jobs")?.as_mapping()
    }

    pub fn jobs_mut(&mut self) -> Option<&mut Mapping> {
        self.root.get_mut("jobs")?.as_mapping_mut()
    }

    /// Iterates over every step of every job.
    pub fn steps(&self) -> impl Iterator<Item = &Mapping> + '_ {
        self.jobs()
            .into_iter()
            .flat_map(|jobs| jobs.values())
            .filter_map(|job| job.get("steps").and_then(Value::as_sequence))
            .flat_map(|steps| steps.iter())
            .filter_map(Value::as_mapping)
    }

    pub fn steps_mut(&mut self) -> impl Iterator<Item = &mut Mapping> + '_ {
        self.jobs_mut()
            .into_iter()
            .flat_map(|jobs| jobs.iter_mut().map(|(_, job)| job))
            .filter_map(|job| job.get_mut("steps").and_then(Value::as_sequence_mut))
            .flat_map(|steps| steps.iter_mut())
            .filter_map(Value::as_mapping_mut)
    }

    /// Iterates over the `run` command of every step that has one.
    pub fn run_commands(&self) -> impl Iterator<Item = &str> + '_ {
        self.steps().filter_map(step_run)
    }
}

/// Returns the `run` command of a step.
pub fn step_run(step: &Mapping) -> Option<&str> {
    step.get("run").and_then(Value::as_str)
}

/// Returns the `uses` reference of a step.
pub fn step_uses(step: &Mapping) -> Option<&str> {
    step.get("uses").and_then(Value::as_str)
}

pub fn step_name(step: &Mapping) -> Option<&str> {
    step.get("name").and_then(Value::as_str)
}

/// Builds a `{name, run}` step.
pub fn new_step(name: &str, run: &str) -> Value {
    let mut step = Mapping::new();
    step.insert(Value::from("name"), Value::from(name));
    step.insert(Value::from("run"), Value::from(run));
    Value::Mapping(step)
}

/// Removes `key` from `map`, keeping the order of the remaining entries.
pub fn remove_key(map: &mut Mapping, key: &str) -> Option<Value> {
    let mut removed = None;
    *map = std::mem::take(map)
        .into_iter()
        .filter_map(|(k, v)| {
            if removed.is_none() && k.as_str() == Some(key) {
                removed = Some(v);
                None
            } else {
                Some((k, v))
            }
        })
        .collect();
    removed
}
