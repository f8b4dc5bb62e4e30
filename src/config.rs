//! Configuration for the alarm core.
//!
//! Loaded from `~/.config/chime/config.toml` when present. Every field has a
//! default, so a missing file or missing keys always produce a working
//! configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChimeConfig {
    /// Directory for durable alarm records (`None` = platform data dir).
    pub state_dir: Option<PathBuf>,
    /// Event bus buffer capacity per subscriber.
    pub event_capacity: usize,
    /// Maximum timer sleep slice in milliseconds.
    pub timer_slice_ms: u64,
}

impl Default for ChimeConfig {
    fn default() -> Self {
        Self {
            state_dir: None,
            event_capacity: 64,
            timer_slice_ms: crate::timer::DEFAULT_SLICE_MS,
        }
    }
}

impl ChimeConfig {
    /// Default config file path.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("chime").join("config.toml"))
    }

    /// Load from the default path; a missing file yields defaults.
    #[must_use]
    pub fn load() -> Self {
        Self::load_from(Self::default_path())
    }

    /// Load from an explicit path; `None`, a missing file, or a malformed
    /// file all yield defaults (malformed files are logged).
    #[must_use]
    pub fn load_from(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(text) => match toml::from_str(&text) {
                Ok(config) => {
                    debug!("loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("malformed config {}; using defaults: {e}", path.display());
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!("cannot read config {}; using defaults: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Resolved state directory: the configured override, else the platform
    /// default.
    #[must_use]
    pub fn resolved_state_dir(&self) -> Option<PathBuf> {
        self.state_dir
            .clone()
            .or_else(crate::store::FileStore::default_dir)
    }
}
