//! Task specification: the immutable input of one run
//!
//! A [`TaskSpec`] is built once through [`TaskSpecBuilder`], validated, and
//! then only read. Every attempt of a run sees the same spec.

use crate::error::{CoordinationError, CoordinationResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Default iteration budget when the caller does not choose one.
pub const DEFAULT_BUDGET: u32 = 3;

/// What kind of artifact a run is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Plotting/analysis script over simulation output (e.g. power spectrum).
    Plot,
    /// 3-D density field rendering, seeded with retrieved reference code.
    DensityField,
    /// Structured parameter document extracted from a paper.
    ParameterExtraction,
    /// Anything else driven through the same loop.
    Custom,
}

impl TaskKind {
    /// Whether artifacts of this kind are scripts run by the sandbox.
    pub fn is_code(self) -> bool {
        !matches!(self, Self::ParameterExtraction)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plot => write!(f, "plot"),
            Self::DensityField => write!(f, "density_field"),
            Self::ParameterExtraction => write!(f, "parameter_extraction"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Immutable description of one run.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSpec {
    kind: TaskKind,
    goal: String,
    working_dir: PathBuf,
    outputs: Vec<PathBuf>,
    constraints: Vec<String>,
    budget: u32,
    params: BTreeMap<String, String>,
}

impl TaskSpec {
    /// Start building a task.
    pub fn builder(
        kind: TaskKind,
        goal: impl Into<String>,
        working_dir: impl AsRef<Path>,
    ) -> TaskSpecBuilder {
        TaskSpecBuilder {
            kind,
            goal: goal.into(),
            working_dir: working_dir.as_ref().to_path_buf(),
            outputs: Vec::new(),
            constraints: Vec::new(),
            budget: DEFAULT_BUDGET,
            params: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Free-text goal (for extraction tasks: the source document text).
    pub fn goal(&self) -> &str {
        &self.goal
    }

    /// Scoped working directory owned by this run.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Declared output locations, as given.
    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    /// Declared output locations, relative ones resolved against the working directory.
    pub fn resolved_outputs(&self) -> Vec<PathBuf> {
        self.outputs
            .iter()
            .map(|p| {
                if p.is_absolute() {
                    p.clone()
                } else {
                    self.working_dir.join(p)
                }
            })
            .collect()
    }

    /// Structural constraints (required names, patterns, conventions).
    pub fn constraints(&self) -> &[String] {
        &self.constraints
    }

    /// Maximum number of attempts; always at least 1.
    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Domain-specific parameters (snapshot name, particle type, ...).
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// One-line description for logs and reports.
    pub fn summary(&self) -> String {
        let goal: String = self.goal.chars().take(80).collect();
        let ellipsis = if self.goal.chars().count() > 80 { "…" } else { "" };
        format!(
            "[{}] {}{} (budget {}, {} output(s))",
            self.kind,
            goal.replace('\n', " "),
            ellipsis,
            self.budget,
            self.outputs.len()
        )
    }
}

/// Builder for [`TaskSpec`].
#[derive(Debug, Clone)]
pub struct TaskSpecBuilder {
    kind: TaskKind,
    goal: String,
    working_dir: PathBuf,
    outputs: Vec<PathBuf>,
    constraints: Vec<String>,
    budget: u32,
    params: BTreeMap<String, String>,
}

impl TaskSpecBuilder {
    /// Declare an output file that must exist and be non-empty on success.
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    pub fn constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn budget(mut self, budget: u32) -> Self {
        self.budget = budget;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    /// Validate and freeze the task.
    pub fn build(self) -> CoordinationResult<TaskSpec> {
        if self.budget == 0 {
            return Err(CoordinationError::InvalidTask(
                "iteration budget must be a positive integer".into(),
            ));
        }
        if self.goal.trim().is_empty() {
            return Err(CoordinationError::InvalidTask(
                "goal description is empty".into(),
            ));
        }
        if self.working_dir.as_os_str().is_empty() {
            return Err(CoordinationError::InvalidTask(
                "working directory is empty".into(),
            ));
        }

        Ok(TaskSpec {
            kind: self.kind,
            goal: self.goal,
            working_dir: self.working_dir,
            outputs: self.outputs,
            constraints: self.constraints,
            budget: self.budget,
            params: self.params,
        })
    }
}
