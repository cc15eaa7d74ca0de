//! Concurrent execution of independent runs
//!
//! Each run keeps its own working directory and attempt history; the only
//! things shared are the loop's immutable collaborators (generator, judge,
//! read-only corpus).

use crate::error::{CoordinationError, CoordinationResult};
use crate::feedback::correction_loop::{CorrectionLoop, Judge};
use crate::generation::Generator;
use crate::report::RunReport;
use crate::task::TaskSpec;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::info;

/// Default number of runs in flight.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 4;

/// Reject batches where two script runs would share a working directory.
///
/// Parameter extraction never touches its working directory while judging,
/// so only code tasks are checked.
pub fn check_distinct_workdirs(tasks: &[TaskSpec]) -> CoordinationResult<()> {
    let mut seen: HashSet<PathBuf> = HashSet::new();
    for task in tasks.iter().filter(|t| t.kind().is_code()) {
        let dir = std::fs::canonicalize(task.working_dir())
            .unwrap_or_else(|_| task.working_dir().to_path_buf());
        if !seen.insert(dir.clone()) {
            return Err(CoordinationError::DuplicateWorkdir(dir));
        }
    }
    Ok(())
}

/// Run every task to a terminal state, at most `concurrency` at a time.
///
/// Reports come back in the order of `tasks`.
pub async fn run_batch<G, J>(
    looper: &CorrectionLoop<G, J>,
    tasks: &[TaskSpec],
    concurrency: usize,
) -> CoordinationResult<Vec<RunReport<J::Artifact>>>
where
    G: Generator,
    J: Judge,
{
    check_distinct_workdirs(tasks)?;
    info!(runs = tasks.len(), concurrency, "Starting batch");

    let mut results: Vec<(usize, RunReport<J::Artifact>)> = stream::iter(tasks.iter().enumerate())
        .map(|(index, task)| async move { (index, looper.run(task).await) })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    results.sort_by_key(|(index, _)| *index);

    let reports: Vec<RunReport<J::Artifact>> =
        results.into_iter().map(|(_, report)| report).collect();
    let succeeded = reports.iter().filter(|r| r.is_success()).count();
    info!(runs = reports.len(), succeeded, "Batch finished");
    Ok(reports)
}
