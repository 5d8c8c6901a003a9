// src/db/mod.rs
// Storage layer: connection pooling, schema/migrations, and per-table
// synchronous operations. Everything in here runs inside a `deadpool_sqlite`
// `interact` closure — see `pool::DatabasePool`.

pub mod conversations;
pub mod messages;
pub mod participants;
pub mod pool;
pub mod row;
pub mod schema;
pub mod search;

#[cfg(test)]
pub mod test_support;

pub use pool::DatabasePool;
