// src/lock/test_support.rs
// Test-only helper for exercising the lock against a real directory.

use std::path::PathBuf;
use tempfile::TempDir;

/// A temporary directory holding a `coordination.lock` path, kept alive for
/// the duration of the test.
pub struct TempLockDir {
    _dir: TempDir,
    pub lock_path: PathBuf,
}

impl TempLockDir {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let lock_path = dir.path().join("locks").join("coordination.lock");
        Self {
            _dir: dir,
            lock_path,
        }
    }
}

impl Default for TempLockDir {
    fn default() -> Self {
        Self::new()
    }
}
