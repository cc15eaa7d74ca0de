//! Typed attempt outcomes
//!
//! Every judged candidate ends as an [`Outcome`]. Failures are plain data so
//! the correction loop can feed them back without unwinding.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure taxonomy shared by code execution and document validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCategory {
    /// The generation step produced no usable artifact
    GenerationError,
    /// The artifact could not be parsed by the interpreter
    Syntax,
    /// The artifact raised or exited non-zero while running
    Runtime,
    /// Execution finished cleanly but declared outputs are absent or empty
    MissingOutput,
    /// Anything the sandbox could not classify (spawn failure, I/O, ...)
    Unknown,
    /// A required document field or section is absent
    MissingField,
    /// A document field has the wrong type
    TypeMismatch,
    /// A numeric document field is outside its plausible range
    OutOfRange,
}

impl FailureCategory {
    /// Stable kebab-case label used in prompts and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenerationError => "generation-error",
            Self::Syntax => "syntax",
            Self::Runtime => "runtime",
            Self::MissingOutput => "missing-output",
            Self::Unknown => "unknown",
            Self::MissingField => "missing-field",
            Self::TypeMismatch => "type-mismatch",
            Self::OutOfRange => "out-of-range",
        }
    }

    /// Corrective hint appended to the diagnostic section of the next prompt
    pub fn corrective_hint(&self) -> &'static str {
        match self {
            Self::GenerationError => {
                "Return exactly one complete artifact; the previous reply contained nothing usable."
            }
            Self::Syntax => "Fix the syntax error and return the full corrected script.",
            Self::Runtime => {
                "Fix the cause of the runtime error; check imports, file paths and array shapes."
            }
            Self::MissingOutput => {
                "The script ran but did not write the required output file(s); save them at exactly the declared paths."
            }
            Self::Unknown => "Address the failure reported below.",
            Self::MissingField => "Supply every required field listed below.",
            Self::TypeMismatch => "Use the expected value type for each field listed below.",
            Self::OutOfRange => "Re-check units and magnitudes of the fields listed below.",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A categorized failure with a human-readable message or trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub category: FailureCategory,
    pub message: String,
}

impl Failure {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::GenerationError, message)
    }

    pub fn missing_output(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::MissingOutput, message)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Outcome of judging one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure(Failure),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// The failure, if any. Populated iff the outcome is a failure.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Success => None,
            Self::Failure(f) => Some(f),
        }
    }
}

impl From<Failure> for Outcome {
    fn from(failure: Failure) -> Self {
        Self::Failure(failure)
    }
}
