//! Simulation Agent Coordination Library
//!
//! Core of the cosmological-simulation agent tooling:
//! - A bounded generate → execute → diagnose → retry correction loop
//! - An execution sandbox that runs candidate scripts in a scoped directory
//! - A context assembler with keyword retrieval from a reference corpus
//! - Parameter extraction: the same loop with schema validation as the judge
//!
//! # Features
//!
//! ## Correction loop
//! - [`CorrectionLoop::run`] drives one [`TaskSpec`] to `Succeeded` or `Exhausted`
//! - Every attempt leaves an [`AttemptRecord`]; the run leaves a [`RunReport`]
//! - Only the most recent failure is fed into the next prompt
//!
//! ## Judges
//! - [`ScriptJudge`]: runs code through the [`ExecutionSandbox`]
//! - [`ParameterJudge`]: validates parameter documents against a [`ParameterSchema`]
//!
//! ## Workflows
//! - Power spectrum and density field task builders ([`visualization`])
//! - Parameter persistence and SLURM job scripts ([`extraction`], [`slurm`])
//! - Concurrent independent runs ([`batch::run_batch`])
//!
//! # Usage
//!
//! ```no_run
//! # async fn demo(generator: impl sim_coordination::Generator) -> sim_coordination::CoordinationResult<()> {
//! use sim_coordination::{ContextAssembler, CorrectionLoop, ScriptJudge, TaskKind, TaskSpec};
//!
//! let task = TaskSpec::builder(TaskKind::Plot, "Plot P(k) at z = 0", "runs/pspec")
//!     .output("pspec.png")
//!     .build()?;
//! let looper = CorrectionLoop::new(generator, ScriptJudge::default(), ContextAssembler::new());
//! let report = looper.run(&task).await;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod batch;
pub mod context_packer;
pub mod error;
pub mod extraction;
pub mod feedback;
pub mod generation;
pub mod persist;
pub mod prompts;
pub mod report;
pub mod slurm;
pub mod task;
pub mod visualization;

pub use error::{CoordinationError, CoordinationResult};
pub use task::{TaskKind, TaskSpec, TaskSpecBuilder, DEFAULT_BUDGET};

// Re-export key loop types
pub use feedback::{
    AttemptRecord, CleanupPolicy, CorrectionConfig, CorrectionLoop, ExecutionReport,
    ExecutionSandbox, Failure, FailureCategory, Interpreter, Judge, Judgement, LoopState, Outcome,
    RunResult, SandboxConfig, ScriptArtifact, ScriptJudge,
};

// Re-export key context types
pub use context_packer::{ContextAssembler, ContextBundle, DiagnosticSection, ReferenceCorpus};

pub use generation::{GenerationError, Generator};
pub use report::RunReport;

// Re-export key extraction types
pub use extraction::{
    ParameterDocument, ParameterFiles, ParameterJudge, ParameterSchema, ValidatedParameters,
};

pub use slurm::SlurmSettings;
