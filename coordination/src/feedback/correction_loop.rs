//! Bounded correction loop
//!
//! Drives one task through generate → judge → diagnose → retry:
//! 1. Assemble a fresh context bundle (task + latest diagnostic only)
//! 2. Ask the generator for a candidate
//! 3. Judge it (sandbox execution or document validation)
//! 4. Stop on success, otherwise retry until the budget is spent
//!
//! Every attempt, including one whose generation failed, counts against the
//! budget and leaves exactly one [`AttemptRecord`].

use crate::context_packer::ContextAssembler;
use crate::feedback::code_block;
use crate::feedback::outcome::{Failure, Outcome};
use crate::feedback::sandbox::ExecutionSandbox;
use crate::feedback::state_machine::{LoopState, StateMachine};
use crate::feedback::workdir::{CleanupPolicy, ScopedWorkdir};
use crate::generation::Generator;
use crate::report::RunReport;
use crate::task::TaskSpec;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Configuration for the correction loop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrectionConfig {
    /// Upper bound applied on top of each task's own budget
    pub max_iterations: Option<u32>,
    /// What happens to the working directory after the run
    pub cleanup: CleanupPolicy,
}

/// One generate-and-judge cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based, strictly increasing within a run
    pub sequence: u32,
    /// What was judged, or the raw completion if it could not be turned into a candidate
    pub candidate: Option<String>,
    /// blake3 of `candidate`
    pub digest: Option<String>,
    pub outcome: Outcome,
    /// Captured stdout/stderr or validation notes
    pub transcript: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl AttemptRecord {
    fn new(
        sequence: u32,
        candidate: Option<String>,
        outcome: Outcome,
        transcript: String,
        started: Instant,
    ) -> Self {
        let digest = candidate
            .as_deref()
            .map(|c| blake3::hash(c.as_bytes()).to_hex().to_string());
        Self {
            sequence,
            candidate,
            digest,
            outcome,
            transcript,
            timestamp: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.outcome.failure()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunResult<A> {
    Succeeded { artifact: A, attempt_count: u32 },
    Exhausted { last_diagnostic: Failure, attempt_count: u32 },
}

impl<A> RunResult<A> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn attempt_count(&self) -> u32 {
        match self {
            Self::Succeeded { attempt_count, .. } | Self::Exhausted { attempt_count, .. } => {
                *attempt_count
            }
        }
    }

    pub fn artifact(&self) -> Option<&A> {
        match self {
            Self::Succeeded { artifact, .. } => Some(artifact),
            Self::Exhausted { .. } => None,
        }
    }

    pub fn last_diagnostic(&self) -> Option<&Failure> {
        match self {
            Self::Succeeded { .. } => None,
            Self::Exhausted { last_diagnostic, .. } => Some(last_diagnostic),
        }
    }
}

/// Verdict on one candidate plus whatever was observed while reaching it.
#[derive(Debug, Clone)]
pub struct Judgement<A> {
    pub verdict: Result<A, Failure>,
    pub transcript: String,
}

/// Decides whether a candidate is acceptable.
#[async_trait]
pub trait Judge: Send + Sync {
    type Artifact: Send;

    /// Turn raw completion text into the candidate that is judged and recorded.
    fn candidate(&self, completion: &str) -> Result<String, Failure>;

    async fn judge(&self, candidate: &str, task: &TaskSpec) -> Judgement<Self::Artifact>;
}

/// A script that ran cleanly and produced every declared output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptArtifact {
    pub script: String,
    pub outputs: Vec<PathBuf>,
    pub stdout: String,
}

/// Judges code candidates by running them in the [`ExecutionSandbox`].
#[derive(Debug, Clone, Default)]
pub struct ScriptJudge {
    sandbox: ExecutionSandbox,
}

impl ScriptJudge {
    pub fn new(sandbox: ExecutionSandbox) -> Self {
        Self { sandbox }
    }

    pub fn sandbox(&self) -> &ExecutionSandbox {
        &self.sandbox
    }
}

#[async_trait]
impl Judge for ScriptJudge {
    type Artifact = ScriptArtifact;

    fn candidate(&self, completion: &str) -> Result<String, Failure> {
        code_block::extract_code(completion, &self.sandbox.interpreter().language)
    }

    async fn judge(&self, candidate: &str, task: &TaskSpec) -> Judgement<ScriptArtifact> {
        let report = self
            .sandbox
            .execute(candidate, task.working_dir(), task.outputs())
            .await;
        let transcript = report.transcript();
        let verdict = match report.outcome {
            Outcome::Success => Ok(ScriptArtifact {
                script: candidate.to_string(),
                outputs: task.resolved_outputs(),
                stdout: report.stdout,
            }),
            Outcome::Failure(failure) => Err(failure),
        };
        Judgement {
            verdict,
            transcript,
        }
    }
}

/// The correction loop controller
pub struct CorrectionLoop<G, J> {
    generator: G,
    judge: J,
    assembler: ContextAssembler,
    config: CorrectionConfig,
}

impl<G: Generator, J: Judge> CorrectionLoop<G, J> {
    pub fn new(generator: G, judge: J, assembler: ContextAssembler) -> Self {
        Self {
            generator,
            judge,
            assembler,
            config: CorrectionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CorrectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn judge(&self) -> &J {
        &self.judge
    }

    /// Budget actually applied to `task`.
    pub fn effective_budget(&self, task: &TaskSpec) -> u32 {
        match self.config.max_iterations {
            Some(cap) => task.budget().min(cap.max(1)),
            None => task.budget(),
        }
    }

    /// Run `task` to a terminal state.
    ///
    /// Never fails: every problem becomes part of an attempt record. Dropping
    /// the returned future cancels the run and kills any running candidate.
    pub async fn run(&self, task: &TaskSpec) -> RunReport<J::Artifact> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        let budget = self.effective_budget(task);

        info!(%run_id, kind = %task.kind(), budget, "Starting correction loop");

        let mut machine = StateMachine::new();
        let mut attempts: Vec<AttemptRecord> = Vec::new();

        let result = loop {
            advance(&mut machine, LoopState::Generating, None);
            let sequence = machine.attempt();
            let attempt_started = Instant::now();

            let bundle = self.assembler.assemble(task, sequence, attempts.last());

            let (candidate, verdict, transcript) = match self.generator.generate(&bundle).await {
                Err(e) => (None, Err(Failure::generation(e.to_string())), String::new()),
                Ok(completion) => match self.judge.candidate(&completion) {
                    Err(failure) => {
                        let raw = (!completion.trim().is_empty()).then_some(completion);
                        (raw, Err(failure), String::new())
                    }
                    Ok(candidate) => {
                        advance(&mut machine, LoopState::Executing, None);
                        let judgement = self.judge.judge(&candidate, task).await;
                        (Some(candidate), judgement.verdict, judgement.transcript)
                    }
                },
            };

            let outcome = match &verdict {
                Ok(_) => Outcome::Success,
                Err(failure) => Outcome::Failure(failure.clone()),
            };
            attempts.push(AttemptRecord::new(
                sequence,
                candidate,
                outcome,
                transcript,
                attempt_started,
            ));

            match verdict {
                Ok(artifact) => {
                    advance(&mut machine, LoopState::Succeeded, None);
                    info!(%run_id, attempt = sequence, "Candidate accepted");
                    break RunResult::Succeeded {
                        artifact,
                        attempt_count: sequence,
                    };
                }
                Err(failure) if sequence < budget => {
                    warn!(
                        %run_id,
                        attempt = sequence,
                        budget,
                        category = %failure.category,
                        "Attempt failed, retrying"
                    );
                    advance(&mut machine, LoopState::Retrying, Some(failure.category.as_str()));
                }
                Err(failure) => {
                    warn!(
                        %run_id,
                        attempts = sequence,
                        category = %failure.category,
                        "Budget exhausted"
                    );
                    advance(&mut machine, LoopState::Exhausted, Some(failure.category.as_str()));
                    break RunResult::Exhausted {
                        last_diagnostic: failure,
                        attempt_count: sequence,
                    };
                }
            }
        };

        info!(%run_id, "{}", machine.summary());

        if task.kind().is_code() {
            if let Some(workdir) = ScopedWorkdir::open(task.working_dir()) {
                workdir.finish(self.config.cleanup);
            }
        }

        RunReport {
            run_id,
            kind: task.kind(),
            task: task.summary(),
            result,
            attempts,
            transitions: machine.into_transitions(),
            started_at,
            finished_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

fn advance(machine: &mut StateMachine, to: LoopState, reason: Option<&str>) {
    if let Err(e) = machine.advance(to, reason) {
        error!("{e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_packer::ContextBundle;
    use crate::feedback::outcome::FailureCategory;
    use crate::generation::{GenerationError, MockGenerator};
    use crate::task::TaskKind;
    use mockall::Sequence;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Accepts or rejects candidates from a fixed script of verdicts.
    struct ScriptedJudge {
        verdicts: Mutex<VecDeque<Option<Failure>>>,
    }

    impl ScriptedJudge {
        fn new(verdicts: Vec<Option<Failure>>) -> Self {
            Self {
                verdicts: Mutex::new(verdicts.into()),
            }
        }
    }

    #[async_trait]
    impl Judge for ScriptedJudge {
        type Artifact = String;

        fn candidate(&self, completion: &str) -> Result<String, Failure> {
            let trimmed = completion.trim();
            if trimmed.is_empty() {
                Err(Failure::generation("empty completion"))
            } else {
                Ok(trimmed.to_string())
            }
        }

        async fn judge(&self, candidate: &str, _task: &TaskSpec) -> Judgement<String> {
            let next = self.verdicts.lock().unwrap().pop_front().flatten();
            Judgement {
                verdict: match next {
                    Some(failure) => Err(failure),
                    None => Ok(candidate.to_string()),
                },
                transcript: format!("judged {}", candidate),
            }
        }
    }

    fn task(budget: u32) -> TaskSpec {
        TaskSpec::builder(TaskKind::Custom, "produce a thing", "/tmp/unused")
            .budget(budget)
            .build()
            .unwrap()
    }

    fn fail(category: FailureCategory, message: &str) -> Option<Failure> {
        Some(Failure::new(category, message))
    }

    fn numbered_generator(times: usize) -> MockGenerator {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .times(times)
            .returning(|bundle: &ContextBundle| Ok(format!("candidate {}", bundle.attempt)));
        generator
    }

    #[tokio::test]
    async fn test_exhausts_after_budget() {
        let judge = ScriptedJudge::new(vec![
            fail(FailureCategory::Syntax, "bad syntax"),
            fail(FailureCategory::Runtime, "NameError"),
            fail(FailureCategory::MissingOutput, "pspec.png was not created"),
        ]);
        let looper = CorrectionLoop::new(numbered_generator(3), judge, ContextAssembler::new());

        let report = looper.run(&task(3)).await;
        assert_eq!(report.attempts.len(), 3);
        match &report.result {
            RunResult::Exhausted {
                last_diagnostic,
                attempt_count,
            } => {
                assert_eq!(*attempt_count, 3);
                assert_eq!(last_diagnostic.category, FailureCategory::MissingOutput);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        let sequences: Vec<u32> = report.attempts.iter().map(|a| a.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert_eq!(report.transitions.last().map(|t| t.to), Some(LoopState::Exhausted));
    }

    #[tokio::test]
    async fn test_success_on_second_attempt() {
        let judge = ScriptedJudge::new(vec![fail(FailureCategory::Runtime, "ValueError"), None]);
        let looper = CorrectionLoop::new(numbered_generator(2), judge, ContextAssembler::new());

        let report = looper.run(&task(3)).await;
        assert!(report.is_success());
        assert_eq!(report.result.attempt_count(), 2);
        assert_eq!(report.result.artifact().map(String::as_str), Some("candidate 2"));
        assert_eq!(report.attempts.len(), 2);
        assert!(!report.attempts[0].is_success());
        assert!(report.attempts[1].is_success());
    }

    #[tokio::test]
    async fn test_budget_one_has_no_retry() {
        let judge = ScriptedJudge::new(vec![fail(FailureCategory::Runtime, "boom")]);
        let looper = CorrectionLoop::new(numbered_generator(1), judge, ContextAssembler::new());

        let report = looper.run(&task(1)).await;
        assert!(!report.is_success());
        assert_eq!(report.attempts.len(), 1);
        assert!(report
            .transitions
            .iter()
            .all(|t| t.to != LoopState::Retrying));
    }

    #[tokio::test]
    async fn test_each_bundle_carries_only_previous_diagnostic() {
        let mut generator = MockGenerator::new();
        let mut seq = Sequence::new();
        generator
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|b: &ContextBundle| b.attempt == 1 && b.diagnostic.is_none())
            .returning(|_| Ok("first".into()));
        generator
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|b: &ContextBundle| {
                b.diagnostic
                    .as_ref()
                    .is_some_and(|d| d.attempt == 1 && d.category == FailureCategory::Syntax)
            })
            .returning(|_| Ok("second".into()));
        generator
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|b: &ContextBundle| {
                b.diagnostic.as_ref().is_some_and(|d| {
                    d.attempt == 2
                        && d.category == FailureCategory::Runtime
                        && !d.message.contains("unexpected token")
                        && d.previous_candidate.as_deref() == Some("second")
                })
            })
            .returning(|_| Ok("third".into()));

        let judge = ScriptedJudge::new(vec![
            fail(FailureCategory::Syntax, "unexpected token"),
            fail(FailureCategory::Runtime, "division by zero"),
            None,
        ]);
        let looper = CorrectionLoop::new(generator, judge, ContextAssembler::new());

        let report = looper.run(&task(3)).await;
        assert!(report.is_success());
        assert_eq!(report.result.attempt_count(), 3);
    }

    #[tokio::test]
    async fn test_generation_failure_consumes_budget() {
        let mut generator = MockGenerator::new();
        let mut seq = Sequence::new();
        generator
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(GenerationError::RequestFailed("connection refused".into())));
        generator
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|b: &ContextBundle| {
                b.diagnostic
                    .as_ref()
                    .is_some_and(|d| d.category == FailureCategory::GenerationError)
            })
            .returning(|_| Ok("   ".into()));

        let judge = ScriptedJudge::new(vec![]);
        let looper = CorrectionLoop::new(generator, judge, ContextAssembler::new());

        let report = looper.run(&task(2)).await;
        assert!(!report.is_success());
        assert_eq!(report.attempts.len(), 2);
        for attempt in &report.attempts {
            assert_eq!(
                attempt.failure().map(|f| f.category),
                Some(FailureCategory::GenerationError)
            );
            assert!(attempt.candidate.is_none());
        }
        // Executing is never entered without a candidate
        assert!(report
            .transitions
            .iter()
            .all(|t| t.to != LoopState::Executing));
    }

    #[tokio::test]
    async fn test_max_iterations_caps_budget() {
        let judge = ScriptedJudge::new(vec![
            fail(FailureCategory::Runtime, "a"),
            fail(FailureCategory::Runtime, "b"),
        ]);
        let looper = CorrectionLoop::new(numbered_generator(2), judge, ContextAssembler::new())
            .with_config(CorrectionConfig {
                max_iterations: Some(2),
                ..CorrectionConfig::default()
            });

        let report = looper.run(&task(5)).await;
        assert_eq!(report.result.attempt_count(), 2);
    }

    #[tokio::test]
    async fn test_attempt_digest_matches_candidate() {
        let judge = ScriptedJudge::new(vec![None]);
        let looper = CorrectionLoop::new(numbered_generator(1), judge, ContextAssembler::new());
        let report = looper.run(&task(3)).await;

        let record = &report.attempts[0];
        let expected = blake3::hash(b"candidate 1").to_hex().to_string();
        assert_eq!(record.digest.as_deref(), Some(expected.as_str()));
        assert_eq!(record.transcript, "judged candidate 1");
    }
}
