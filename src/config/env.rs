// src/config/env.rs
// Environment-based configuration overrides - single source of truth for env vars.

use super::Config;
use std::path::PathBuf;
use tracing::debug;

/// Apply environment variable overrides on top of whatever was loaded from
/// defaults/file. Env vars always win, matching the teacher's "env is the
/// final word" convention in `config/env.rs`.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(dir) = read("CCP_DATA_DIR") {
        cfg.data_directory = PathBuf::from(dir);
    }
    if let Some(pid) = read("CCP_PARTICIPANT_ID") {
        cfg.participant_id = Some(pid);
    }
    if let Some(days) = read("CCP_ARCHIVE_DAYS").and_then(|v| v.parse().ok()) {
        cfg.archive_days = days;
    }
    if let Some(limit) = read("CCP_TOKEN_LIMIT").and_then(|v| v.parse().ok()) {
        cfg.token_limit = limit;
    }
    if let Some(auto) = read("CCP_AUTO_COMPACT").and_then(|v| parse_bool(&v)) {
        cfg.auto_compact = auto;
    }
    debug!(data_directory = %cfg.data_directory.display(), "resolved configuration");
}

fn read(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
