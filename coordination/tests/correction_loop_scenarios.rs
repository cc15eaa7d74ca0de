//! End-to-end correction loop runs against a real shell interpreter.
//!
//! The generator is scripted: it hands back canned completions in order and
//! records every bundle it was asked to complete.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sim_coordination::{
    CleanupPolicy, ContextAssembler, ContextBundle, CorrectionConfig, CorrectionLoop,
    ExecutionSandbox, FailureCategory, GenerationError, Generator, Interpreter, RunResult,
    SandboxConfig, ScriptJudge, TaskKind, TaskSpec,
};

/// Generator that replays canned completions and records the bundles it saw.
struct ScriptedGenerator {
    replies: Mutex<VecDeque<String>>,
    seen: Mutex<Vec<ContextBundle>>,
}

impl ScriptedGenerator {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn bundles(&self) -> Vec<ContextBundle> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, bundle: &ContextBundle) -> Result<String, GenerationError> {
        self.seen.lock().unwrap().push(bundle.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(GenerationError::EmptyResponse)
    }
}

fn shell_judge(timeout: Option<Duration>) -> ScriptJudge {
    ScriptJudge::new(ExecutionSandbox::new(SandboxConfig {
        interpreter: Interpreter::shell(),
        timeout,
        ..SandboxConfig::default()
    }))
}

fn plot_task(dir: &std::path::Path, budget: u32) -> TaskSpec {
    TaskSpec::builder(TaskKind::Plot, "Plot the power spectrum at z = 0", dir)
        .output("pspec.png")
        .budget(budget)
        .build()
        .unwrap()
}

const SYNTAX_ERROR: &str = "```sh\nif true; then\n  echo half\n```";
const RUNTIME_ERROR: &str = "```sh\necho 'ValueError: shapes do not align' >&2\nexit 3\n```";
const NO_OUTPUT: &str = "```sh\necho plotted\n```";
const WRITES_OUTPUT: &str = "```sh\necho png-bytes > pspec.png\n```";

#[tokio::test]
async fn exhausted_run_reports_every_category_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new(&[SYNTAX_ERROR, RUNTIME_ERROR, NO_OUTPUT]);
    let looper = CorrectionLoop::new(generator, shell_judge(None), ContextAssembler::new());

    let report = looper.run(&plot_task(tmp.path(), 3)).await;

    assert!(!report.is_success());
    assert_eq!(report.result.attempt_count(), 3);
    let categories: Vec<FailureCategory> = report
        .attempts
        .iter()
        .map(|a| a.failure().unwrap().category)
        .collect();
    assert_eq!(
        categories,
        vec![
            FailureCategory::Syntax,
            FailureCategory::Runtime,
            FailureCategory::MissingOutput
        ]
    );
    assert_eq!(
        report.last_diagnostic().unwrap().category,
        FailureCategory::MissingOutput
    );
    assert!(!tmp.path().join("pspec.png").exists());
}

#[tokio::test]
async fn retry_after_runtime_error_succeeds() {
    let tmp = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new(&[RUNTIME_ERROR, WRITES_OUTPUT]);
    let looper = CorrectionLoop::new(generator, shell_judge(None), ContextAssembler::new());

    let report = looper.run(&plot_task(tmp.path(), 3)).await;

    match &report.result {
        RunResult::Succeeded {
            artifact,
            attempt_count,
        } => {
            assert_eq!(*attempt_count, 2);
            assert_eq!(artifact.outputs.len(), 1);
            assert!(artifact.outputs[0].ends_with("pspec.png"));
        }
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(report.attempts.len(), 2);
    assert!(!report.attempts[0].is_success());
    assert!(report.attempts[1].is_success());
    assert!(tmp.path().join("pspec.png").exists());
}

#[tokio::test]
async fn retry_prompt_quotes_the_previous_trace() {
    let tmp = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new(&[RUNTIME_ERROR, WRITES_OUTPUT]);
    let looper = CorrectionLoop::new(generator, shell_judge(None), ContextAssembler::new());

    let report = looper.run(&plot_task(tmp.path(), 3)).await;
    assert!(report.is_success());

    let bundles = looper.generator().bundles();
    assert_eq!(bundles.len(), 2);
    assert!(bundles[0].diagnostic.is_none());
    let diagnostic = bundles[1].diagnostic.as_ref().unwrap();
    assert_eq!(diagnostic.attempt, 1);
    assert_eq!(diagnostic.category, FailureCategory::Runtime);
    assert!(diagnostic.message.contains("shapes do not align"));
    assert!(bundles[1].render().contains("shapes do not align"));
}

#[tokio::test]
async fn scratch_directory_is_removed_after_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new(&[WRITES_OUTPUT]);
    let looper = CorrectionLoop::new(generator, shell_judge(None), ContextAssembler::new())
        .with_config(CorrectionConfig {
            cleanup: CleanupPolicy::RemoveScratch,
            ..CorrectionConfig::default()
        });

    let report = looper.run(&plot_task(tmp.path(), 1)).await;

    assert!(report.is_success());
    assert!(tmp.path().join("pspec.png").exists());
    assert!(!tmp.path().join(".sandbox").exists());
}

#[tokio::test]
async fn dropping_a_run_kills_the_candidate() {
    let tmp = tempfile::tempdir().unwrap();
    let slow = "```sh\nsleep 1\necho late > late.txt\necho png > pspec.png\n```";
    let generator = ScriptedGenerator::new(&[slow]);
    let looper = CorrectionLoop::new(generator, shell_judge(None), ContextAssembler::new());
    let task = plot_task(tmp.path(), 1);

    let cancelled = tokio::time::timeout(Duration::from_millis(200), looper.run(&task)).await;
    assert!(cancelled.is_err());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!tmp.path().join("late.txt").exists());
    assert!(!tmp.path().join("pspec.png").exists());
}

#[tokio::test]
async fn hung_candidate_times_out_as_runtime() {
    let tmp = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new(&["```sh\nsleep 5\n```"]);
    let looper = CorrectionLoop::new(
        generator,
        shell_judge(Some(Duration::from_millis(200))),
        ContextAssembler::new(),
    );

    let report = looper.run(&plot_task(tmp.path(), 1)).await;

    let failure = report.last_diagnostic().unwrap();
    assert_eq!(failure.category, FailureCategory::Runtime);
}

#[tokio::test]
async fn report_serializes_with_status_tag() {
    let tmp = tempfile::tempdir().unwrap();
    let generator = ScriptedGenerator::new(&[NO_OUTPUT]);
    let looper = CorrectionLoop::new(generator, shell_judge(None), ContextAssembler::new());

    let report = looper.run(&plot_task(tmp.path(), 1)).await;
    let path = tmp.path().join("report.json");
    report.write_json(&path).unwrap();

    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["result"]["status"], "exhausted");
    assert_eq!(value["result"]["last_diagnostic"]["category"], "missing-output");
    assert_eq!(value["attempts"].as_array().unwrap().len(), 1);
}
