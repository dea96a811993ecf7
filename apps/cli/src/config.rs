//! `tuneforge` settings files.
//!
//! Flags beat `./.tuneforgerc`, which beats `~/.tuneforge/config.toml`,
//! which beats built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TuneforgeConfig {
    /// trace, debug, info, warn or error
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub training: TrainingDefaults,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// `human` or `json`; unset means `human`.
    #[serde(default)]
    pub format: Option<String>,
}

impl OutputConfig {
    pub fn is_json(&self) -> bool {
        self.format.as_deref().is_some_and(|f| f.eq_ignore_ascii_case("json"))
    }
}

/// Training defaults; unset values fall back to the library defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingDefaults {
    #[serde(default)]
    pub max_concurrent_jobs: Option<usize>,
    #[serde(default)]
    pub steps_per_epoch: Option<u32>,
    #[serde(default)]
    pub step_delay_ms: Option<u64>,
    #[serde(default)]
    pub validation_delay_ms: Option<u64>,
    #[serde(default)]
    pub evaluation_delay_ms: Option<u64>,
    /// Write checkpoint manifests here instead of keeping them in memory.
    #[serde(default)]
    pub checkpoint_dir: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("cannot read config file {0}")]
    ReadError(String),

    #[error("invalid config file {0}")]
    ParseError(String),
}

impl TuneforgeConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(ConfigError::ReadError(format!("{}: {e}", path.display()))),
        };
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))
    }

    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".tuneforge")
            .join("config.toml")
    }

    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".tuneforgerc")
    }

    /// Loads the global then the local config; the local file wins.
    ///
    /// Missing files are skipped. A file that exists but does not parse is
    /// reported and skipped.
    pub fn discover_and_load() -> Self {
        let mut config = Self::default();
        for path in [Self::default_global_path(), Self::default_local_path()] {
            match Self::load_from_file(&path) {
                Ok(found) => config.merge(&found),
                Err(ConfigError::NotFound(_)) => {}
                Err(e) => eprintln!("warning: {e}"),
            }
        }
        config
    }

    /// Overlays every value `other` sets onto `self`.
    pub fn merge(&mut self, other: &Self) {
        if other.log_level.is_some() {
            self.log_level.clone_from(&other.log_level);
        }
        if other.output.format.is_some() {
            self.output.format.clone_from(&other.output.format);
        }

        let (ours, theirs) = (&mut self.training, &other.training);
        ours.max_concurrent_jobs = theirs.max_concurrent_jobs.or(ours.max_concurrent_jobs);
        ours.steps_per_epoch = theirs.steps_per_epoch.or(ours.steps_per_epoch);
        ours.step_delay_ms = theirs.step_delay_ms.or(ours.step_delay_ms);
        ours.validation_delay_ms = theirs.validation_delay_ms.or(ours.validation_delay_ms);
        ours.evaluation_delay_ms = theirs.evaluation_delay_ms.or(ours.evaluation_delay_ms);
        if let Some(ref dir) = theirs.checkpoint_dir {
            ours.checkpoint_dir = Some(dir.clone());
        }
    }
}
