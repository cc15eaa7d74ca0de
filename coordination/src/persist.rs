//! Write-then-rename file persistence

use crate::error::{CoordinationError, CoordinationResult};
use std::path::Path;
use uuid::Uuid;

/// Write `contents` to `path` so readers see either the old file or the new
/// one, never a partial write. Parent directories are created.
pub fn write_atomic(path: &Path, contents: &[u8]) -> CoordinationResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CoordinationError::persist(parent, e))?;
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            CoordinationError::persist(path, std::io::Error::other("path has no file name"))
        })?;
    let staging = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    std::fs::write(&staging, contents).map_err(|e| CoordinationError::persist(&staging, e))?;
    if let Err(e) = std::fs::rename(&staging, path) {
        let _ = std::fs::remove_file(&staging);
        return Err(CoordinationError::persist(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_staging() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("nested").join("paper.genic");
        write_atomic(&target, b"old").unwrap();
        write_atomic(&target, b"new").unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
        let leftovers = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
