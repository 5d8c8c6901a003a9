// src/lock/mod.rs
// Cross-process exclusive lock over the data directory (§4.1, §5).
//
// Mutating operations acquire this lock before opening a store transaction,
// and release it only after the transaction has committed and any sidecar
// file move has completed — lock -> tx -> commit -> (move files) -> release.

#[cfg(test)]
pub mod test_support;

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// How many times to retry acquiring the lock before giving up.
const DEFAULT_MAX_ATTEMPTS: u32 = 50;
/// Delay between retry attempts.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);
/// A lock older than this is considered abandoned regardless of pid liveness.
const STALE_AGE: chrono::Duration = chrono::Duration::minutes(5);

/// Diagnostic payload written into the lock file. Not used for correctness —
/// exclusivity comes from create-or-fail semantics on the file itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockPayload {
    pid: u32,
    acquired_at: chrono::DateTime<chrono::Utc>,
    version: String,
}

/// A held lock; dropping (or explicitly releasing) it deletes the lock file.
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Release the lock early. Equivalent to dropping the guard, but lets
    /// callers observe a failed release instead of only logging it.
    pub fn release(mut self) -> Result<()> {
        self.do_release()
    }

    fn do_release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
                Ok(())
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.do_release();
    }
}

/// Acquire the exclusive lock at `lock_path`, retrying with staleness
/// detection between attempts. Blocking filesystem work only — callers in
/// async contexts should run this inside `spawn_blocking`.
pub fn acquire(lock_path: &Path) -> Result<LockGuard> {
    acquire_with_budget(lock_path, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
}

fn acquire_with_budget(
    lock_path: &Path,
    max_attempts: u32,
    retry_delay: Duration,
) -> Result<LockGuard> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    for attempt in 0..max_attempts {
        match try_create(lock_path) {
            Ok(()) => {
                debug!(path = %lock_path.display(), attempt, "acquired coordination lock");
                return Ok(LockGuard {
                    path: lock_path.to_path_buf(),
                    released: false,
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if is_stale(lock_path) {
                    debug!(path = %lock_path.display(), "removing stale lock");
                    let _ = std::fs::remove_file(lock_path);
                    // Retry immediately on a detected stale lock, no sleep.
                    continue;
                }
                std::thread::sleep(retry_delay);
            }
            Err(e) => return Err(EngineError::Io(e)),
        }
    }

    Err(EngineError::LockTimeout {
        attempts: max_attempts,
    })
}

fn try_create(lock_path: &Path) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)?;
    let payload = LockPayload {
        pid: std::process::id(),
        acquired_at: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    // Best-effort: the payload is diagnostic only. A write failure after the
    // file was created is not a reason to give up the lock we already hold.
    if let Ok(json) = serde_json::to_vec(&payload) {
        let _ = file.write_all(&json);
    }
    Ok(())
}

/// A lock is stale if its recorded pid no longer exists, or it is older than
/// `STALE_AGE`. An unreadable/unparsable payload is treated as stale too
/// (diagnostics-only payload, so we err on the side of making progress).
fn is_stale(lock_path: &Path) -> bool {
    let payload = match read_payload(lock_path) {
        Some(p) => p,
        None => return true,
    };

    let age = chrono::Utc::now() - payload.acquired_at;
    if age > STALE_AGE {
        return true;
    }

    !pid_alive(payload.pid)
}

fn read_payload(lock_path: &Path) -> Option<LockPayload> {
    let contents = std::fs::read(lock_path).ok()?;
    serde_json::from_slice(&contents).ok()
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // Signal 0 performs no-op existence/permission checks only.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // Conservative default on platforms without a pid-liveness check:
    // fall back to the age-based staleness rule only.
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn second_acquire_times_out_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("coordination.lock");

        let _held = acquire(&lock_path).unwrap();
        let result = acquire_with_budget(&lock_path, 3, Duration::from_millis(10));
        assert!(matches!(result, Err(EngineError::LockTimeout { attempts: 3 })));
    }

    #[test]
    fn stale_lock_with_dead_pid_is_reclaimed_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("coordination.lock");

        // Write a lock payload with an implausible pid that is very unlikely
        // to be alive, and a fresh timestamp (so only pid-liveness is tested).
        let payload = LockPayload {
            pid: 999_999,
            acquired_at: chrono::Utc::now(),
            version: "0.0.0".to_string(),
        };
        std::fs::write(&lock_path, serde_json::to_vec(&payload).unwrap()).unwrap();

        let guard = acquire_with_budget(&lock_path, 5, Duration::from_millis(10));
        assert!(guard.is_ok());
    }

    #[test]
    fn release_then_reacquire_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("coordination.lock");

        let guard = acquire(&lock_path).unwrap();
        guard.release().unwrap();
        assert!(acquire(&lock_path).is_ok());
    }
}
