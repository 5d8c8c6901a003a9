// src/messages/sidecar.rs
// Sidecar content files (I3, §3, §9): raw message bodies over the inline
// threshold live on disk, under the data directory, outside the store
// transaction. The row is committed first; the file move/write happens
// after, so a crash leaves a correct row pointing at a (possibly stale or
// missing) file rather than a ghost row.

use crate::datadir::DataDir;
use crate::error::Result;
use chrono::{DateTime, Utc};

pub const INLINE_THRESHOLD: usize = 1000;
pub const SUMMARY_THRESHOLD: usize = 500;

/// `summary` per I6: verbatim if `content` is short enough, else truncated
/// with an ellipsis. Always ≤ 503 characters.
pub fn compute_summary(content: &str) -> String {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= SUMMARY_THRESHOLD {
        content.to_string()
    } else {
        let mut s: String = chars[..SUMMARY_THRESHOLD].iter().collect();
        s.push_str("...");
        s
    }
}

/// Write `content` as an active sidecar and return its data-directory-relative
/// path, iff it exceeds the inline threshold.
pub fn write_if_oversized(
    data_dir: &DataDir,
    thread_id: &str,
    message_id: &str,
    content: &str,
) -> Result<Option<String>> {
    if content.chars().count() <= INLINE_THRESHOLD {
        return Ok(None);
    }
    let path = data_dir.active_sidecar_path(thread_id, message_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, content)?;

    let rel = path
        .strip_prefix(data_dir.root())
        .unwrap_or(&path)
        .to_string_lossy()
        .replace('\\', "/");
    Ok(Some(rel))
}

/// Read full content for `detail_level=full`: the sidecar if `content_ref` is
/// set and readable, else `summary` (which, per I3, already IS the full
/// content when there is no sidecar).
pub fn read_full_content(data_dir: &DataDir, content_ref: Option<&str>, summary: &str) -> String {
    match content_ref {
        Some(rel) => std::fs::read_to_string(data_dir.root().join(rel)).unwrap_or_else(|_| summary.to_string()),
        None => summary.to_string(),
    }
}

/// Move a sidecar from the active tree into the dated archive tree.
/// Per-file failures are the caller's concern to log and swallow (§4.3
/// `archive_expired`, §4.5 compaction); this function just reports them.
pub fn archive_sidecar(data_dir: &DataDir, content_ref: &str, at: DateTime<Utc>) -> Result<Option<String>> {
    let src = data_dir.root().join(content_ref);
    if !src.exists() {
        return Ok(None);
    }
    let archive_dir = data_dir.archive_dir_for(at);
    std::fs::create_dir_all(&archive_dir)?;

    let basename = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown.md".to_string());
    let dest = archive_dir.join(&basename);
    std::fs::rename(&src, &dest)?;

    let rel = dest
        .strip_prefix(data_dir.root())
        .unwrap_or(&dest)
        .to_string_lossy()
        .replace('\\', "/");
    Ok(Some(rel))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_boundary_at_500() {
        let at_500 = "x".repeat(500);
        assert_eq!(compute_summary(&at_500), at_500);

        let at_501 = "x".repeat(501);
        let summary = compute_summary(&at_501);
        assert_eq!(summary.len(), 503);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn sidecar_threshold_at_1000() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = DataDir::new(dir.path());

        let at_1000 = "x".repeat(1000);
        assert!(write_if_oversized(&data_dir, "T-thread", "MSG-1", &at_1000)
            .unwrap()
            .is_none());

        let at_1001 = "x".repeat(1001);
        let ref_path = write_if_oversized(&data_dir, "T-thread", "MSG-2", &at_1001)
            .unwrap()
            .expect("should write a sidecar");
        assert!(dir.path().join(&ref_path).exists());
    }

    #[test]
    fn read_full_content_falls_back_when_sidecar_missing() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = DataDir::new(dir.path());
        let content = read_full_content(&data_dir, Some("messages/active/T-thread/MSG-1.md"), "fallback");
        assert_eq!(content, "fallback");
    }
}
