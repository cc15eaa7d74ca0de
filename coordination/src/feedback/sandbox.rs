//! Execution sandbox for generated scripts
//!
//! Each candidate runs in a fresh interpreter process with the run's working
//! directory as cwd, so no interpreter state survives from one attempt to the
//! next. The sandbox never returns an error: every way a candidate can go
//! wrong comes back as a [`Failure`] inside the [`ExecutionReport`].
//!
//! Isolation is directory scoping only. There is no filesystem, network or
//! resource isolation beyond that; a production deployment should swap the
//! process launch for a container or restricted interpreter while keeping
//! the [`Outcome`] contract.

use crate::feedback::error_parser::InterpreterErrorParser;
use crate::feedback::outcome::{Failure, FailureCategory, Outcome};
use crate::feedback::workdir::ScopedWorkdir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default number of stderr characters kept in a failure message.
pub const DEFAULT_MAX_DIAGNOSTIC_CHARS: usize = 4_000;

/// Interpreter used to run candidate scripts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpreter {
    /// Program to launch (e.g. "python3")
    pub program: String,
    /// Arguments placed before the script path (e.g. ["-u"])
    #[serde(default)]
    pub args: Vec<String>,
    /// File extension for the written script
    pub extension: String,
    /// Fence tag the completion is expected to use
    pub language: String,
}

impl Interpreter {
    pub fn python() -> Self {
        Self {
            program: "python3".into(),
            args: vec!["-u".into()],
            extension: "py".into(),
            language: "python".into(),
        }
    }

    pub fn shell() -> Self {
        Self {
            program: "sh".into(),
            args: Vec::new(),
            extension: "sh".into(),
            language: "sh".into(),
        }
    }

    /// Build from an already-split command line; the language is inferred
    /// from the program name.
    pub fn from_command(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        let base = Path::new(&program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&program)
            .to_string();
        if base.starts_with("python") {
            Self {
                program,
                args,
                ..Self::python()
            }
        } else if matches!(base.as_str(), "sh" | "bash" | "dash" | "zsh") {
            Self {
                program,
                args,
                ..Self::shell()
            }
        } else {
            Self {
                extension: "txt".into(),
                language: base,
                program,
                args,
            }
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::python()
    }
}

/// Sandbox settings
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub interpreter: Interpreter,
    /// Wall-clock limit per attempt; `None` waits for the script to finish
    pub timeout: Option<Duration>,
    /// Characters of stderr kept in failure messages
    pub max_diagnostic_chars: usize,
    /// Extra environment for the child process
    pub env: Vec<(String, String)>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: Interpreter::default(),
            timeout: Some(Duration::from_secs(120)),
            max_diagnostic_chars: DEFAULT_MAX_DIAGNOSTIC_CHARS,
            // Plotting scripts must not try to open a display
            env: vec![
                ("MPLBACKEND".into(), "Agg".into()),
                ("PYTHONDONTWRITEBYTECODE".into(), "1".into()),
            ],
        }
    }
}

/// Everything observed while running one candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub outcome: Outcome,
    /// Exit code, `None` when killed or never started
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Where the candidate was written
    pub script_path: Option<PathBuf>,
}

impl ExecutionReport {
    fn not_started(failure: Failure, started: Instant) -> Self {
        Self {
            outcome: Outcome::Failure(failure),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: started.elapsed().as_millis() as u64,
            script_path: None,
        }
    }

    /// Combined textual output for attempt records
    pub fn transcript(&self) -> String {
        let mut text = String::new();
        if let Some(code) = self.exit_code {
            text.push_str(&format!("exit code: {}\n", code));
        }
        if !self.stdout.is_empty() {
            text.push_str("stdout:\n");
            text.push_str(&self.stdout);
            if !self.stdout.ends_with('\n') {
                text.push('\n');
            }
        }
        if !self.stderr.is_empty() {
            text.push_str("stderr:\n");
            text.push_str(&self.stderr);
        }
        text
    }
}

/// Runs candidate scripts in a scoped working directory
#[derive(Debug, Clone, Default)]
pub struct ExecutionSandbox {
    config: SandboxConfig,
}

impl ExecutionSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.config.interpreter
    }

    /// Execute `code` with `working_dir` as cwd.
    ///
    /// When `expected_outputs` is non-empty, success additionally requires
    /// each of those files to exist and be non-empty afterwards. Relative
    /// output paths are resolved against `working_dir`. Declared outputs are
    /// deleted before the run and again after a failed run.
    pub async fn execute(
        &self,
        code: &str,
        working_dir: &Path,
        expected_outputs: &[PathBuf],
    ) -> ExecutionReport {
        let started = Instant::now();

        let workdir = match ScopedWorkdir::prepare(working_dir) {
            Ok(w) => w,
            Err(e) => {
                return ExecutionReport::not_started(
                    Failure::new(FailureCategory::Unknown, e.to_string()),
                    started,
                )
            }
        };
        let outputs = resolve_outputs(workdir.root(), expected_outputs);
        remove_outputs(&outputs);

        let script_path = match self.write_script(&workdir, code) {
            Ok(p) => p,
            Err(failure) => return ExecutionReport::not_started(failure, started),
        };

        let interpreter = &self.config.interpreter;
        let mut command = Command::new(&interpreter.program);
        command
            .args(&interpreter.args)
            .arg(&script_path)
            .current_dir(workdir.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so background children die with the candidate.
        #[cfg(unix)]
        command.process_group(0);
        for (key, value) in &self.config.env {
            command.env(key, value);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %interpreter.program, "Failed to start interpreter: {e}");
                let mut report = ExecutionReport::not_started(
                    Failure::new(
                        FailureCategory::Unknown,
                        format!(
                            "failed to start interpreter `{}`: {}",
                            interpreter.program, e
                        ),
                    ),
                    started,
                );
                report.script_path = Some(script_path);
                return report;
            }
        };
        let mut group = ProcessGroup::new(child.id());
        let stdout_reader = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr_reader = tokio::spawn(read_pipe(child.stderr.take()));

        // The exit status is awaited apart from the pipes: a background
        // child may hold them open long after the interpreter has exited.
        let waited = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(result) => Some(result),
                Err(_) => None,
            },
            None => Some(child.wait().await),
        };
        group.kill();
        if waited.is_none() {
            if let Err(e) = child.kill().await {
                debug!("Interpreter already exited: {e}");
            }
        }
        let stdout = drain(stdout_reader).await;
        let stderr = drain(stderr_reader).await;

        let status = match waited {
            Some(Ok(status)) => status,
            Some(Err(e)) => {
                remove_outputs(&outputs);
                let mut report = ExecutionReport::not_started(
                    Failure::new(
                        FailureCategory::Unknown,
                        format!("failed to wait for the interpreter: {}", e),
                    ),
                    started,
                );
                report.stdout = stdout;
                report.stderr = stderr;
                report.script_path = Some(script_path);
                return report;
            }
            None => {
                let limit = self.config.timeout.unwrap_or_default();
                warn!(timeout_ms = limit.as_millis() as u64, "Candidate timed out");
                remove_outputs(&outputs);
                let mut report = ExecutionReport::not_started(
                    Failure::new(
                        FailureCategory::Runtime,
                        format!(
                            "execution exceeded the wall-clock timeout of {:.1}s and was killed",
                            limit.as_secs_f64()
                        ),
                    ),
                    started,
                );
                report.stdout = stdout;
                report.stderr = stderr;
                report.script_path = Some(script_path);
                return report;
            }
        };
        let exit_code = status.code();

        let outcome = if !status.success() {
            let category = InterpreterErrorParser::classify(exit_code, &stderr);
            Outcome::Failure(Failure::new(
                category,
                self.failure_message(exit_code, &stderr),
            ))
        } else {
            match check_outputs(&outputs) {
                Ok(()) => Outcome::Success,
                Err(failure) => Outcome::Failure(failure),
            }
        };

        if !outcome.is_success() {
            remove_outputs(&outputs);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome.failure() {
            None => info!(duration_ms, "Candidate executed successfully"),
            Some(f) => debug!(category = %f.category, duration_ms, "Candidate failed"),
        }

        ExecutionReport {
            outcome,
            exit_code,
            stdout,
            stderr,
            duration_ms,
            script_path: Some(script_path),
        }
    }

    fn write_script(&self, workdir: &ScopedWorkdir, code: &str) -> Result<PathBuf, Failure> {
        let scratch = workdir
            .scratch()
            .map_err(|e| Failure::new(FailureCategory::Unknown, e.to_string()))?;
        let path = scratch.join(format!(
            "candidate-{}.{}",
            Uuid::new_v4().simple(),
            self.config.interpreter.extension
        ));
        std::fs::write(&path, code).map_err(|e| {
            Failure::new(
                FailureCategory::Unknown,
                format!("failed to write candidate to {}: {}", path.display(), e),
            )
        })?;
        Ok(path)
    }

    fn failure_message(&self, exit_code: Option<i32>, stderr: &str) -> String {
        let status = match exit_code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };
        let mut message = match InterpreterErrorParser::headline(stderr) {
            Some(headline) => format!("{}: {}", status, headline),
            None => status,
        };
        if !stderr.trim().is_empty() {
            message.push_str("\n\nstderr:\n");
            message.push_str(&InterpreterErrorParser::tail(
                stderr.trim_end(),
                self.config.max_diagnostic_chars,
            ));
        }
        message
    }
}

/// How long pipe readers may keep going once the process group is gone.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Process group of a running candidate; killed on [`ProcessGroup::kill`]
/// or on drop, whichever comes first.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    // SAFETY: killpg only sends a signal; ESRCH for an empty group is fine.
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, "Process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

async fn read_pipe<R>(pipe: Option<R>) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!("Pipe read ended early: {e}");
        }
    }
    buf
}

/// Collect a pipe reader, giving up on pipes held by escaped descendants.
async fn drain(reader: JoinHandle<Vec<u8>>) -> String {
    let abort = reader.abort_handle();
    match tokio::time::timeout(PIPE_DRAIN_GRACE, reader).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        _ => {
            abort.abort();
            String::new()
        }
    }
}

fn resolve_outputs(root: &Path, outputs: &[PathBuf]) -> Vec<PathBuf> {
    outputs
        .iter()
        .map(|p| if p.is_absolute() { p.clone() } else { root.join(p) })
        .collect()
}

fn remove_outputs(outputs: &[PathBuf]) {
    for path in outputs {
        if path.is_file() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), "Failed to remove stale output: {e}");
            }
        }
    }
}

fn check_outputs(outputs: &[PathBuf]) -> Result<(), Failure> {
    let problems: Vec<String> = outputs
        .iter()
        .filter_map(|path| match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => None,
            Ok(meta) if meta.is_file() => Some(format!("{} is empty", path.display())),
            Ok(_) => Some(format!("{} is not a regular file", path.display())),
            Err(_) => Some(format!("{} was not created", path.display())),
        })
        .collect();

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Failure::missing_output(format!(
            "the script finished without error but declared outputs are missing: {}",
            problems.join("; ")
        )))
    }
}
