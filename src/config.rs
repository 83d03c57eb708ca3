//! Store configuration, optionally persisted as TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, KbResult};

/// Configuration for opening a revkb store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base directory holding the per-context revision logs.
    pub data_dir: PathBuf,
    /// Create `data_dir` when it does not exist.
    #[serde(default)]
    pub create: bool,
    /// Maximum number of contexts kept materialized in memory (0 = unbounded).
    #[serde(default = "default_max_active_contexts")]
    pub max_active_contexts: usize,
    /// fsync revision files and directories on write.
    #[serde(default = "default_sync_writes")]
    pub sync_writes: bool,
}

fn default_max_active_contexts() -> usize {
    64
}
fn default_sync_writes() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".revkb"),
            create: false,
            max_active_contexts: default_max_active_contexts(),
            sync_writes: default_sync_writes(),
        }
    }
}

impl StoreConfig {
    /// Config for `data_dir` with every other field at its default.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn with_max_active_contexts(mut self, max: usize) -> Self {
        self.max_active_contexts = max;
        self
    }

    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Load from a TOML file.
    ///
    /// A relative `data_dir` is resolved against the file's directory.
    pub fn load(path: &Path) -> KbResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let mut config: StoreConfig = toml::from_str(&content).map_err(|e| EngineError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if config.data_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.data_dir = parent.join(&config.data_dir);
            }
        }
        Ok(config)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> KbResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| EngineError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|e| {
            EngineError::Config {
                path: path.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }
}
