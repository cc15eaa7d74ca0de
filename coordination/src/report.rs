//! Run report: the auditable record of one correction-loop run

use crate::error::CoordinationResult;
use crate::feedback::correction_loop::{AttemptRecord, RunResult};
use crate::feedback::outcome::Failure;
use crate::feedback::state_machine::TransitionRecord;
use crate::persist::write_atomic;
use crate::task::TaskKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport<A> {
    pub run_id: Uuid,
    pub kind: TaskKind,
    /// One-line task summary
    pub task: String,
    pub result: RunResult<A>,
    /// Attempt history in order; its length equals the attempt count
    pub attempts: Vec<AttemptRecord>,
    /// State machine log
    pub transitions: Vec<TransitionRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl<A> RunReport<A> {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }

    pub fn artifact(&self) -> Option<&A> {
        self.result.artifact()
    }

    pub fn last_diagnostic(&self) -> Option<&Failure> {
        self.result.last_diagnostic()
    }

    /// Map the artifact, keeping the history.
    pub fn map_artifact<B>(self, f: impl FnOnce(A) -> B) -> RunReport<B> {
        let result = match self.result {
            RunResult::Succeeded {
                artifact,
                attempt_count,
            } => RunResult::Succeeded {
                artifact: f(artifact),
                attempt_count,
            },
            RunResult::Exhausted {
                last_diagnostic,
                attempt_count,
            } => RunResult::Exhausted {
                last_diagnostic,
                attempt_count,
            },
        };
        RunReport {
            run_id: self.run_id,
            kind: self.kind,
            task: self.task,
            result,
            attempts: self.attempts,
            transitions: self.transitions,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_ms: self.duration_ms,
        }
    }

    /// Human-readable one-liner for logs and the CLI.
    pub fn summary(&self) -> String {
        match &self.result {
            RunResult::Succeeded { attempt_count, .. } => format!(
                "{}: succeeded after {} attempt(s) in {}ms",
                self.task, attempt_count, self.duration_ms
            ),
            RunResult::Exhausted {
                last_diagnostic,
                attempt_count,
            } => format!(
                "{}: exhausted after {} attempt(s); last failure {}",
                self.task, attempt_count, last_diagnostic
            ),
        }
    }
}

impl<A: Serialize> RunReport<A> {
    pub fn to_json(&self) -> CoordinationResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> CoordinationResult<()> {
        write_atomic(path, self.to_json()?.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::outcome::{FailureCategory, Outcome};

    fn exhausted() -> RunReport<String> {
        let failure = Failure::new(FailureCategory::Runtime, "NameError: np");
        RunReport {
            run_id: Uuid::new_v4(),
            kind: TaskKind::Plot,
            task: "plot: power spectrum".into(),
            result: RunResult::Exhausted {
                last_diagnostic: failure.clone(),
                attempt_count: 1,
            },
            attempts: vec![AttemptRecord {
                sequence: 1,
                candidate: Some("import numpy".into()),
                digest: None,
                outcome: Outcome::Failure(failure),
                transcript: String::new(),
                timestamp: Utc::now(),
                duration_ms: 3,
            }],
            transitions: Vec::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 3,
        }
    }

    #[test]
    fn test_json_shape() {
        let json: serde_json::Value =
            serde_json::from_str(&exhausted().to_json().unwrap()).unwrap();
        assert_eq!(json["result"]["status"], "exhausted");
        assert_eq!(json["result"]["last_diagnostic"]["category"], "runtime");
        assert_eq!(json["attempts"][0]["outcome"]["status"], "failure");
        assert_eq!(json["kind"], "plot");
    }

    #[test]
    fn test_summary_and_map() {
        let report = exhausted();
        assert!(report.summary().contains("exhausted after 1 attempt(s)"));
        let mapped = report.map_artifact(|s| s.len());
        assert!(mapped.artifact().is_none());
        assert_eq!(mapped.attempts.len(), 1);
    }

    #[test]
    fn test_write_json() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("report.json");
        exhausted().write_json(&path).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("NameError"));
    }
}
