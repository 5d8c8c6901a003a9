// src/datadir.rs
// Directory layout for the coordination data root (§4.1):
//
//   coordination.db             (relational store, mode 0600)
//   coordination.db-wal, -shm   (write-ahead-log sidecars)
//   locks/coordination.lock     (exclusive lock file)
//   messages/active/<thread_id>/<message_id>.md
//   messages/archive/<yyyy>/<MM>/<file>

use chrono::{DateTime, Datelike, Utc};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("coordination.db")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join("locks").join("coordination.lock")
    }

    pub fn messages_active_root(&self) -> PathBuf {
        self.root.join("messages").join("active")
    }

    pub fn messages_archive_root(&self) -> PathBuf {
        self.root.join("messages").join("archive")
    }

    /// Directory holding a thread's active sidecar files, creating it if needed.
    pub fn thread_dir(&self, thread_id: &str) -> PathBuf {
        self.messages_active_root().join(sanitize(thread_id))
    }

    /// Path for an active message's sidecar file.
    pub fn active_sidecar_path(&self, thread_id: &str, message_id: &str) -> PathBuf {
        self.thread_dir(thread_id)
            .join(format!("{}.md", sanitize(message_id)))
    }

    /// Archive directory for a given timestamp (year/month bucketed).
    pub fn archive_dir_for(&self, ts: DateTime<Utc>) -> PathBuf {
        self.messages_archive_root()
            .join(format!("{:04}", ts.year()))
            .join(format!("{:02}", ts.month()))
    }

    /// Create the directory skeleton (idempotent). The store file itself is
    /// created by opening the pool, not here.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.root.join("locks"))?;
        std::fs::create_dir_all(self.messages_active_root())?;
        std::fs::create_dir_all(self.messages_archive_root())?;
        Ok(())
    }
}

/// Keep path components from escaping the data directory via `..` or path
/// separators embedded in an otherwise-validated id.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_relative_to_root() {
        let dd = DataDir::new("/tmp/proj/.coordination");
        assert_eq!(
            dd.db_path(),
            PathBuf::from("/tmp/proj/.coordination/coordination.db")
        );
        assert_eq!(
            dd.lock_path(),
            PathBuf::from("/tmp/proj/.coordination/locks/coordination.lock")
        );
    }

    #[test]
    fn archive_dir_buckets_by_year_and_month() {
        let dd = DataDir::new("/tmp/proj/.coordination");
        let ts = DateTime::parse_from_rfc3339("2026-03-05T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            dd.archive_dir_for(ts),
            PathBuf::from("/tmp/proj/.coordination/messages/archive/2026/03")
        );
    }
}
