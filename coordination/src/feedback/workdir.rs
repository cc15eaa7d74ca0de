//! Scoped working directory owned by exactly one run

use crate::error::{CoordinationError, CoordinationResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Scratch subdirectory holding candidate scripts.
pub const SCRATCH_DIR: &str = ".sandbox";

/// What to do with the working directory once the run result exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Keep everything (outputs and candidate scripts).
    Retain,
    /// Keep outputs, delete the `.sandbox/` scratch directory.
    #[default]
    RemoveScratch,
    /// Delete the whole working directory.
    Remove,
}

/// A working directory prepared for one run.
#[derive(Debug)]
pub struct ScopedWorkdir {
    root: PathBuf,
    created: bool,
}

impl ScopedWorkdir {
    /// Create the directory (and parents) if it does not exist yet.
    pub fn prepare(root: impl AsRef<Path>) -> CoordinationResult<Self> {
        let root = root.as_ref().to_path_buf();
        let created = !root.exists();
        if root.exists() && !root.is_dir() {
            return Err(CoordinationError::workdir(
                &root,
                std::io::Error::other("path exists and is not a directory"),
            ));
        }
        std::fs::create_dir_all(&root).map_err(|e| CoordinationError::workdir(&root, e))?;
        // Child processes get this as cwd and scripts are addressed through it,
        // so it must not depend on the caller's cwd.
        let root = std::fs::canonicalize(&root).map_err(|e| CoordinationError::workdir(&root, e))?;
        debug!(path = %root.display(), created, "Working directory ready");
        Ok(Self { root, created })
    }

    /// Take over an existing directory without creating anything.
    pub fn open(root: impl AsRef<Path>) -> Option<Self> {
        let root = std::fs::canonicalize(root.as_ref()).ok()?;
        root.is_dir().then_some(Self {
            root,
            created: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `prepare` created the directory.
    pub fn was_created(&self) -> bool {
        self.created
    }

    /// Scratch directory for candidate scripts, created on demand.
    pub fn scratch(&self) -> CoordinationResult<PathBuf> {
        let dir = self.root.join(SCRATCH_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| CoordinationError::workdir(&dir, e))?;
        Ok(dir)
    }

    /// Apply the cleanup policy. Failures are logged, not raised: the run
    /// result already exists at this point.
    pub fn finish(self, policy: CleanupPolicy) {
        let target = match policy {
            CleanupPolicy::Retain => return,
            CleanupPolicy::RemoveScratch => self.root.join(SCRATCH_DIR),
            CleanupPolicy::Remove => self.root.clone(),
        };
        if !target.exists() {
            return;
        }
        match std::fs::remove_dir_all(&target) {
            Ok(()) => debug!(path = %target.display(), ?policy, "Working directory cleaned"),
            Err(e) => warn!(path = %target.display(), "Failed to clean working directory: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_creates_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("runs").join("run-1");
        let workdir = ScopedWorkdir::prepare(&dir).unwrap();
        assert!(dir.is_dir());
        assert!(workdir.was_created());
    }

    #[test]
    fn test_prepare_rejects_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();
        assert!(ScopedWorkdir::prepare(&file).is_err());
    }

    #[test]
    fn test_remove_scratch_keeps_outputs() {
        let tmp = tempfile::tempdir().unwrap();
        let workdir = ScopedWorkdir::prepare(tmp.path()).unwrap();
        let scratch = workdir.scratch().unwrap();
        std::fs::write(scratch.join("candidate.py"), "print(1)").unwrap();
        std::fs::write(tmp.path().join("pspec.png"), "png").unwrap();

        workdir.finish(CleanupPolicy::RemoveScratch);
        assert!(!scratch.exists());
        assert!(tmp.path().join("pspec.png").exists());
    }

    #[test]
    fn test_remove_deletes_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("run");
        let workdir = ScopedWorkdir::prepare(&dir).unwrap();
        std::fs::write(dir.join("out.txt"), "x").unwrap();
        workdir.finish(CleanupPolicy::Remove);
        assert!(!dir.exists());
    }
}
