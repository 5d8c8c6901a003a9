// src/config/file.rs
// YAML configuration file loading.

use super::Config;
use std::path::Path;
use tracing::{debug, warn};

/// Load configuration from a YAML file, returning `None` if it does not
/// exist or fails to parse (falling back to defaults is the caller's job).
pub fn load_file(path: &Path) -> Option<Config> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read config file");
            return None;
        }
    };

    match serde_yaml::from_str::<Config>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse config file, using defaults");
            None
        }
    }
}
