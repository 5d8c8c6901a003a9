// src/lib.rs
// ccp-engine: a local, multi-participant coordination message bus backed by
// an embedded SQLite store. See SPEC_FULL.md for the full module map.

pub mod compaction;
pub mod config;
pub mod datadir;
pub mod db;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod indexing;
pub mod lock;
pub mod messages;
pub mod participants;
pub mod utils;

use crate::compaction::Compactor;
use crate::config::Config;
use crate::datadir::DataDir;
use crate::db::DatabasePool;
use crate::dispatch::CcpServer;
use crate::domain::Priority;
use crate::error::Result;
use crate::indexing::Indexer;
use crate::messages::Manager;
use crate::participants::Registry;
use std::sync::Arc;

/// Everything needed to run the bus for one process: an open store, the
/// on-disk layout, and the component facades wired together (§1, §5).
pub struct Engine {
    pub pool: Arc<DatabasePool>,
    pub data_dir: DataDir,
    pub registry: Arc<Registry>,
    pub messages: Manager,
    pub indexer: Indexer,
    pub compactor: Compactor,
}

impl Engine {
    /// Open (creating if absent) the store and directory layout rooted at
    /// `config.data_directory`.
    pub async fn open(config: &Config) -> Result<Self> {
        let data_dir = DataDir::new(config.data_directory());
        data_dir.ensure_layout()?;

        let pool = Arc::new(DatabasePool::open(&data_dir.db_path()).await?);
        let registry = Arc::new(Registry::new(pool.clone()));
        let messages = Manager::new(pool.clone(), data_dir.clone(), registry.clone());
        let indexer = Indexer::new(pool.clone());
        let compactor = Compactor::new(pool.clone(), data_dir.clone());

        Ok(Self {
            pool,
            data_dir,
            registry,
            messages,
            indexer,
            compactor,
        })
    }

    /// Ensure `identity` is registered (idempotent: a pre-existing active
    /// participant is left alone) and build the tool dispatcher that acts as
    /// it.
    pub async fn dispatcher_for(&self, identity: &str) -> Result<CcpServer> {
        if self.registry.get(identity).await?.is_none() {
            self.registry
                .register(identity, Vec::new(), Priority::M)
                .await?;
        } else {
            self.registry.update_last_seen(identity).await?;
        }

        Ok(CcpServer::new(
            self.pool.clone(),
            self.registry.clone(),
            self.messages.clone(),
            self.indexer.clone(),
            self.compactor.clone(),
            identity.to_string(),
        ))
    }
}
