// src/config/mod.rs
// Runtime configuration: defaults, YAML file, environment overrides.
//
// File/path discovery and a setup wizard are explicitly out of scope for this
// crate (see SPEC_FULL.md); this module only carries the ambient concern of
// "have a Config type with sane defaults that a real deployment can override".

mod env;
mod file;

pub use env::apply_env_overrides;
pub use file::load_file;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Priority threshold for batching/notification decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PriorityThreshold {
    Critical,
    H,
    M,
    L,
}

impl Default for PriorityThreshold {
    fn default() -> Self {
        PriorityThreshold::H
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub priority_threshold: PriorityThreshold,
    #[serde(default)]
    pub batch_notifications: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            priority_threshold: PriorityThreshold::default(),
            batch_notifications: false,
        }
    }
}

/// Top-level engine configuration (§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// This process's participant identity.
    pub participant_id: Option<String>,
    /// Data directory root (holds the store, lock file, and sidecar tree).
    #[serde(default = "Config::default_data_directory")]
    pub data_directory: PathBuf,
    #[serde(default = "Config::default_archive_days")]
    pub archive_days: u32,
    #[serde(default = "Config::default_token_limit")]
    pub token_limit: u64,
    #[serde(default = "Config::default_auto_compact")]
    pub auto_compact: bool,
    /// Known participants hint; inert, carried for round-tripping a config file.
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub notification_settings: NotificationSettings,
}

impl Config {
    fn default_data_directory() -> PathBuf {
        PathBuf::from(".coordination")
    }
    fn default_archive_days() -> u32 {
        30
    }
    fn default_token_limit() -> u64 {
        1_000_000
    }
    fn default_auto_compact() -> bool {
        true
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            participant_id: None,
            data_directory: Self::default_data_directory(),
            archive_days: Self::default_archive_days(),
            token_limit: Self::default_token_limit(),
            auto_compact: Self::default_auto_compact(),
            participants: Vec::new(),
            notification_settings: NotificationSettings::default(),
        }
    }
}

impl Config {
    /// Build effective configuration: defaults, then an optional YAML file
    /// (found via `$CCP_CONFIG_PATH`, else `<data_directory>/config.yaml`),
    /// then environment variable overrides.
    pub fn load() -> Self {
        let mut cfg = Config::default();

        // A pre-pass over env vars lets CCP_DATA_DIR influence where we look
        // for the config file before the file itself can override it.
        if let Ok(dir) = std::env::var("CCP_DATA_DIR") {
            if !dir.trim().is_empty() {
                cfg.data_directory = PathBuf::from(dir);
            }
        }

        let config_path = std::env::var("CCP_CONFIG_PATH")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(|| cfg.data_directory.join("config.yaml"));

        if let Some(loaded) = load_file(&config_path) {
            cfg = loaded;
        }

        apply_env_overrides(&mut cfg);
        cfg
    }

    pub fn data_directory(&self) -> &Path {
        &self.data_directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.archive_days, 30);
        assert_eq!(cfg.token_limit, 1_000_000);
        assert!(cfg.auto_compact);
        assert_eq!(cfg.data_directory, PathBuf::from(".coordination"));
    }
}
