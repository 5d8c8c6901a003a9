// src/db/test_support.rs
// Shared test scaffolding for async-pool-backed tests across the crate.

#![cfg(test)]

use super::pool::DatabasePool;
use std::sync::Arc;

/// An in-memory pool with migrations already applied, for async tests that
/// exercise `DatabasePool::run`/`interact` directly (as opposed to the
/// synchronous `rusqlite::Connection` tests colocated with each storage
/// module).
pub async fn setup_test_pool() -> Arc<DatabasePool> {
    Arc::new(
        DatabasePool::open_in_memory()
            .await
            .expect("in-memory pool should always open"),
    )
}

/// Run a closure against a fresh in-memory pool's connection and return its
/// result, panicking on any error. Mirrors the `db!` helper macro pattern
/// used across this crate's async test modules.
#[macro_export]
macro_rules! db {
    ($pool:expr, |$conn:ident| $body:expr) => {{
        $pool
            .run(move |$conn| Ok($body))
            .await
            .expect("db! closure should not fail")
    }};
}
