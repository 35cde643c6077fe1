//! Runtime configuration

use crate::arena::HeapLimits;
use crate::error::RuntimeError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(#[from] RuntimeError),
}

/// Runtime configuration, usually loaded from `modus.yml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Registry manifest to load at startup
    #[serde(default)]
    pub manifest: Option<PathBuf>,

    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_slots")]
    pub max_slots_per_arena: usize,

    #[serde(default = "default_max_context_depth")]
    pub max_context_depth: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_slots_per_arena: default_max_slots(),
            max_context_depth: default_max_context_depth(),
        }
    }
}

fn default_max_slots() -> usize {
    1 << 20
}

fn default_max_context_depth() -> usize {
    64
}

impl RuntimeConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config: RuntimeConfig = serde_yaml::from_str(&contents)?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn heap_limits(&self) -> HeapLimits {
        HeapLimits {
            max_slots_per_arena: self.limits.max_slots_per_arena,
        }
    }

    /// The manifest path, resolved relative to the config file
    pub fn manifest_path(&self) -> Option<PathBuf> {
        self.manifest.as_ref().map(|p| self.resolve_path(p))
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.config_path.as_ref().and_then(|c| c.parent()) {
            Some(parent) => parent.join(path),
            None => path.to_path_buf(),
        }
    }
}
