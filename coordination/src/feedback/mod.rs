//! Execution Feedback Module
//!
//! Provides the bounded correction loop and everything it judges with:
//! - Run candidate scripts in a fresh interpreter process per attempt
//! - Classify failures (syntax, runtime, missing output, ...)
//! - Feed the latest failure back and retry until success or budget spent
//!
//! # Architecture
//!
//! ```text
//! TaskSpec → ContextAssembler → Generator → Judge → Outcome
//!                  ↑                                   |
//!                  └──────── latest AttemptRecord ─────┘
//! ```

pub mod code_block;
pub mod correction_loop;
pub mod error_parser;
pub mod outcome;
pub mod sandbox;
pub mod state_machine;
pub mod workdir;

pub use correction_loop::{
    AttemptRecord, CorrectionConfig, CorrectionLoop, Judge, Judgement, RunResult, ScriptArtifact,
    ScriptJudge,
};
pub use error_parser::InterpreterErrorParser;
pub use outcome::{Failure, FailureCategory, Outcome};
pub use sandbox::{ExecutionReport, ExecutionSandbox, Interpreter, SandboxConfig};
pub use state_machine::{IllegalTransition, LoopState, StateMachine, TransitionRecord};
pub use workdir::{CleanupPolicy, ScopedWorkdir};
