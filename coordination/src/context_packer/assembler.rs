//! Context Assembler: builds the bundle handed to the generation step
//!
//! `assemble` is rebuilt from scratch for every attempt. It sees the task and
//! at most ONE previous attempt, so prompt size stays flat no matter how many
//! retries a run takes.

use crate::context_packer::corpus::{ReferenceCorpus, RetrievedSnippet};
use crate::feedback::correction_loop::AttemptRecord;
use crate::feedback::error_parser::InterpreterErrorParser;
use crate::feedback::outcome::FailureCategory;
use crate::prompts;
use crate::task::TaskSpec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default number of reference snippets per bundle.
pub const DEFAULT_TOP_K: usize = 3;

/// Default character budget for the previous candidate shown on retries.
pub const DEFAULT_MAX_CANDIDATE_CHARS: usize = 12_000;

/// Corrective section derived from the most recent failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticSection {
    /// Sequence number of the attempt this was derived from
    pub attempt: u32,
    pub category: FailureCategory,
    pub message: String,
    /// What that attempt proposed, if anything usable came back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_candidate: Option<String>,
}

/// The materialized input to one generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Attempt this bundle was built for (1-based)
    pub attempt: u32,
    /// Role instruction (system message)
    pub system: String,
    /// Task description
    pub task: String,
    /// Output-path and structural constraints
    pub output_constraints: Vec<String>,
    /// Retrieved reference material, best first
    pub references: Vec<RetrievedSnippet>,
    /// Present on attempts after a failure
    pub diagnostic: Option<DiagnosticSection>,
}

impl ContextBundle {
    /// Render the user-facing prompt text.
    pub fn render(&self) -> String {
        let mut prompt = String::new();

        prompt.push_str("## Task\n\n");
        prompt.push_str(self.task.trim());
        prompt.push_str("\n\n");

        if !self.output_constraints.is_empty() {
            prompt.push_str("## Output requirements\n\n");
            for constraint in &self.output_constraints {
                prompt.push_str(&format!("- {}\n", constraint));
            }
            prompt.push('\n');
        }

        if !self.references.is_empty() {
            prompt.push_str("## Reference material\n\n");
            for snippet in &self.references {
                prompt.push_str(&format!(
                    "### {}\n\n```\n{}\n```\n\n",
                    snippet.topic,
                    snippet.body.trim_end()
                ));
            }
        }

        if let Some(diag) = &self.diagnostic {
            prompt.push_str("## Previous attempt failed\n\n");
            prompt.push_str(&format!(
                "Attempt {} failed with category `{}`. The previous attempt failed because of the error below; address this specifically.\n{}\n\n",
                diag.attempt,
                diag.category,
                diag.category.corrective_hint()
            ));
            prompt.push_str("```text\n");
            prompt.push_str(diag.message.trim_end());
            prompt.push_str("\n```\n\n");

            if let Some(candidate) = &diag.previous_candidate {
                prompt.push_str("### Previous candidate\n\n```\n");
                prompt.push_str(candidate.trim_end());
                prompt.push_str("\n```\n\n");
            }
        }

        prompt.truncate(prompt.trim_end().len());
        prompt.push('\n');
        prompt
    }

    pub fn has_diagnostic(&self) -> bool {
        self.diagnostic.is_some()
    }
}

/// Builds context bundles, optionally with retrieval from a shared corpus.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    corpus: Option<Arc<ReferenceCorpus>>,
    top_k: usize,
    max_diagnostic_chars: usize,
    max_candidate_chars: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextAssembler {
    /// Assembler without retrieval.
    pub fn new() -> Self {
        Self {
            corpus: None,
            top_k: DEFAULT_TOP_K,
            max_diagnostic_chars: crate::feedback::sandbox::DEFAULT_MAX_DIAGNOSTIC_CHARS,
            max_candidate_chars: DEFAULT_MAX_CANDIDATE_CHARS,
        }
    }

    /// Assembler that adds the top-`top_k` snippets from `corpus`.
    pub fn with_corpus(corpus: Arc<ReferenceCorpus>, top_k: usize) -> Self {
        Self {
            corpus: Some(corpus),
            top_k,
            ..Self::new()
        }
    }

    pub fn max_diagnostic_chars(mut self, chars: usize) -> Self {
        self.max_diagnostic_chars = chars;
        self
    }

    pub fn max_candidate_chars(mut self, chars: usize) -> Self {
        self.max_candidate_chars = chars;
        self
    }

    pub fn has_corpus(&self) -> bool {
        self.corpus.is_some()
    }

    /// Build the bundle for `attempt`, given the most recent attempt (if any).
    pub fn assemble(
        &self,
        task: &TaskSpec,
        attempt: u32,
        previous: Option<&AttemptRecord>,
    ) -> ContextBundle {
        let references = match &self.corpus {
            Some(corpus) => corpus.search(task.goal(), self.top_k),
            None => Vec::new(),
        };

        let diagnostic = previous.and_then(|record| {
            record.failure().map(|failure| DiagnosticSection {
                attempt: record.sequence,
                category: failure.category,
                message: InterpreterErrorParser::tail(&failure.message, self.max_diagnostic_chars),
                previous_candidate: record
                    .candidate
                    .as_deref()
                    .map(|c| InterpreterErrorParser::tail(c, self.max_candidate_chars)),
            })
        });

        ContextBundle {
            attempt,
            system: prompts::role_for(task.kind()).to_string(),
            task: task.goal().to_string(),
            output_constraints: output_constraints(task),
            references,
            diagnostic,
        }
    }
}

fn output_constraints(task: &TaskSpec) -> Vec<String> {
    let mut constraints = Vec::new();
    if task.kind().is_code() {
        constraints.push(format!(
            "The script runs with `{}` as its working directory.",
            task.working_dir().display()
        ));
    }
    for output in task.resolved_outputs() {
        constraints.push(format!(
            "Write `{}`; it must exist and be non-empty when the run finishes.",
            output.display()
        ));
    }
    constraints.extend(task.constraints().iter().cloned());
    constraints
}
