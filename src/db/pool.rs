// src/db/pool.rs
// Async connection pool over rusqlite using deadpool-sqlite.
//
// # Usage
//
// Prefer `pool.run()` for tool-handler code — it converts errors into
// `EngineError` automatically and retries transient SQLITE_BUSY/LOCKED
// contention with backoff:
// ```ignore
// let result = pool.run(move |conn| some_function(conn)).await?;
// ```
//
// Use `pool.interact()` when you want a plain `anyhow::Result` instead,
// e.g. inside migrations or tests.

use crate::error::{EngineError, Result};
use deadpool_sqlite::{Config, Hook, HookError, Pool, Runtime};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Check whether a rusqlite error is contention (SQLITE_BUSY / SQLITE_LOCKED),
/// i.e. worth retrying rather than surfacing immediately.
fn is_contention(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi;
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

/// Retry delays for SQLite contention backoff (100ms, 500ms, 2s).
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(500),
    Duration::from_millis(2000),
];

/// Pooled connection handle over the coordination store.
pub struct DatabasePool {
    pool: Pool,
}

impl DatabasePool {
    /// Open (creating if needed) the store at `path`, running all migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn_str = path.to_string_lossy().into_owned();
        let cfg = Config::new(&conn_str);
        let pool = cfg
            .builder(Runtime::Tokio1)
            .map_err(|e| EngineError::Pool(e.to_string()))?
            .post_create(file_post_create_hook(path.to_path_buf()))
            .build()
            .map_err(|e| EngineError::Pool(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Open an in-memory store (tests only). Capped at a single connection so
    /// every `run`/`interact` call sees the same private `:memory:` database.
    pub async fn open_in_memory() -> Result<Self> {
        let cfg = Config::new(":memory:");
        let pool = cfg
            .builder(Runtime::Tokio1)
            .map_err(|e| EngineError::Pool(e.to_string()))?
            .max_size(1)
            .post_create(memory_post_create_hook())
            .build()
            .map_err(|e| EngineError::Pool(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        self.interact(|conn| crate::db::schema::run_all_migrations(conn))
            .await
    }

    /// Run a closure against a pooled connection, retrying transient
    /// contention errors with backoff, and converting the result into
    /// `EngineError`. This is the primary API for domain code.
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: Fn(&Connection) -> Result<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let f = Arc::new(f);
        let mut attempts = 0usize;
        loop {
            let conn = self.pool.get().await.map_err(EngineError::from)?;
            let f = f.clone();
            let outcome = conn
                .interact(move |conn| f(conn))
                .await
                .map_err(EngineError::from)?;

            match outcome {
                Ok(value) => return Ok(value),
                Err(EngineError::Db(e)) if is_contention(&e) && attempts < RETRY_DELAYS.len() => {
                    tokio::time::sleep(RETRY_DELAYS[attempts]).await;
                    attempts += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Lower-level escape hatch returning a plain `anyhow::Result`, for
    /// migrations and internal helpers that don't need `EngineError`.
    pub async fn interact<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.pool.get().await.map_err(EngineError::from)?;
        conn.interact(move |conn| f(conn))
            .await
            .map_err(EngineError::from)?
            .map_err(EngineError::from)
    }
}

fn file_post_create_hook(path: PathBuf) -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        let path = path.clone();
        Box::pin(async move {
            conn.interact(move |conn| {
                conn.execute_batch(
                    "PRAGMA journal_mode=WAL;
                     PRAGMA synchronous=NORMAL;
                     PRAGMA foreign_keys=ON;
                     PRAGMA temp_store=MEMORY;
                     PRAGMA busy_timeout=5000;",
                )?;

                #[cfg(unix)]
                if let Ok(metadata) = std::fs::metadata(&path) {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o600);
                    if let Err(e) = std::fs::set_permissions(&path, perms) {
                        tracing::warn!("failed to set store file mode to 0600: {e}");
                    }
                }

                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| HookError::Message(format!("interact failed: {e}").into()))?
            .map_err(|e| HookError::Message(format!("connection setup failed: {e}").into()))
        })
    })
}

fn memory_post_create_hook() -> Hook {
    Hook::async_fn(|conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| {
                conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .map_err(|e| HookError::Message(format!("interact failed: {e}").into()))?
            .map_err(|e| HookError::Message(format!("connection setup failed: {e}").into()))
        })
    })
}
