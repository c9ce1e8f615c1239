//! Per-execution scratch space under the host build directory.
//!
//! Layout: `<build_dir>/pmp-core/<goal>/<execution_id>/<subdir...>`. Spaces
//! for the same goal and execution id are reused within a build and disjoint
//! across executions.

use crate::error::{PmpError, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Directory name that anchors all scratch space under the build directory.
const SPACE_ROOT: &str = "pmp-core";

/// Subdirectory that must survive across builds so that unchanged inputs can
/// be detected on the next run.
const PERSISTENT_SUBDIR: &str = "incremental-build-cache";

/// Owns the scratch directories of one orchestrator execution.
#[derive(Debug)]
pub struct TempSpace {
    root: PathBuf,
    keep: bool,
}

impl TempSpace {
    /// Creates (or reuses) the scratch root for the given goal and execution.
    pub fn new(build_dir: &Path, goal: &str, execution_id: &str) -> Result<Self> {
        let root = build_dir.join(SPACE_ROOT).join(goal).join(execution_id);
        fs::create_dir_all(&root).map_err(|err| PmpError::io(err, &root))?;
        trace!(root = %root.display(), "prepared temporary space");
        Ok(Self { root, keep: false })
    }

    /// Keep transient contents on disk after the execution, for debugging.
    pub fn set_keep(&mut self, keep: bool) {
        self.keep = keep;
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns `<root>/<subdir>`, creating it if needed. Safe to call
    /// concurrently for the same tag; `create_dir_all` is idempotent.
    pub fn dir(&self, subdir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = self.root.join(subdir.as_ref());
        fs::create_dir_all(&dir).map_err(|err| PmpError::io(err, &dir))?;
        Ok(dir)
    }

    /// Removes everything except the incremental cache, which has to outlive
    /// the execution for change detection on the next run.
    fn cleanup(&self) {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.filter_map(std::result::Result::ok) {
            if entry.file_name() == PERSISTENT_SUBDIR {
                continue;
            }
            let path = entry.path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(err) = removed {
                debug!(path = %path.display(), %err, "failed to clean temporary space");
            }
        }
    }
}

impl Drop for TempSpace {
    fn drop(&mut self) {
        if !self.keep {
            self.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spaces_are_disjoint_per_execution() {
        let tmp = crate::utils::tempdir("space").unwrap();
        let a = TempSpace::new(tmp.path(), "generate", "default").unwrap();
        let b = TempSpace::new(tmp.path(), "generate", "other").unwrap();
        assert_ne!(a.root(), b.root());
        assert!(a.root().starts_with(tmp.path().join("pmp-core")));
    }

    #[test]
    fn dir_is_idempotent() {
        let tmp = crate::utils::tempdir("space").unwrap();
        let space = TempSpace::new(tmp.path(), "generate", "default").unwrap();
        let first = space.dir("archives").unwrap();
        let second = space.dir("archives").unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
    }

    #[test]
    fn drop_preserves_cache_and_removes_the_rest() {
        let tmp = crate::utils::tempdir("space").unwrap();
        let cache_dir;
        let scratch_dir;
        {
            let space = TempSpace::new(tmp.path(), "generate", "default").unwrap();
            cache_dir = space.dir("incremental-build-cache/3.0").unwrap();
            scratch_dir = space.dir("archives").unwrap();
            fs::write(cache_dir.join("previous.json"), "{}").unwrap();
            fs::write(scratch_dir.join("x.proto"), "").unwrap();
        }
        assert!(cache_dir.join("previous.json").exists());
        assert!(!scratch_dir.exists());
    }

    #[test]
    fn keep_leaves_everything() {
        let tmp = crate::utils::tempdir("space").unwrap();
        let scratch_dir;
        {
            let mut space = TempSpace::new(tmp.path(), "generate", "default").unwrap();
            space.set_keep(true);
            scratch_dir = space.dir("protoc").unwrap();
        }
        assert!(scratch_dir.exists());
    }
}
