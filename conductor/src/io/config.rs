//! Conductor configuration stored as TOML (default `.conductor/config.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::no_progress::DEFAULT_NO_PROGRESS_THRESHOLD;

/// Conductor configuration (TOML).
///
/// Missing fields default to the reference behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConductorConfig {
    /// Producer attempts allowed per turn.
    pub max_retries: u32,

    /// Per-attempt wall-clock limit for the producer call, in seconds.
    pub producer_timeout_secs: u64,

    /// Identical consecutive turns tolerated before declaring no progress.
    pub no_progress_threshold: u32,

    /// Regenerate responses that break the phase grammar instead of failing
    /// the turn immediately.
    pub auto_retry_on_invalid_tags: bool,

    pub registry: RegistryConfig,

    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Idle sessions older than this are dropped from memory.
    pub ttl_secs: u64,
    /// Upper bound on sessions held in memory.
    pub max_sessions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one JSON file per conversation.
    pub dir: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60 * 60,
            max_sessions: 256,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".conductor").join("conversations"),
        }
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            producer_timeout_secs: 10 * 60,
            no_progress_threshold: DEFAULT_NO_PROGRESS_THRESHOLD,
            auto_retry_on_invalid_tags: true,
            registry: RegistryConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(anyhow!("max_retries must be > 0"));
        }
        if self.producer_timeout_secs == 0 {
            return Err(anyhow!("producer_timeout_secs must be > 0"));
        }
        if self.no_progress_threshold == 0 {
            return Err(anyhow!("no_progress_threshold must be > 0"));
        }
        if self.registry.ttl_secs == 0 {
            return Err(anyhow!("registry.ttl_secs must be > 0"));
        }
        if self.registry.max_sessions == 0 {
            return Err(anyhow!("registry.max_sessions must be > 0"));
        }
        if self.store.dir.as_os_str().is_empty() {
            return Err(anyhow!("store.dir must not be empty"));
        }
        Ok(())
    }

    pub fn producer_timeout(&self) -> Duration {
        Duration::from_secs(self.producer_timeout_secs)
    }

    pub fn registry_ttl(&self) -> Duration {
        Duration::from_secs(self.registry.ttl_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ConductorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ConductorConfig> {
    if !path.exists() {
        let cfg = ConductorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConductorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ConductorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ConductorConfig::default());
        assert_eq!(cfg.no_progress_threshold, 2);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = ConductorConfig {
            max_retries: 5,
            no_progress_threshold: 3,
            ..ConductorConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_retries = 7\n[registry]\nmax_sessions = 4\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_retries, 7);
        assert_eq!(cfg.registry.max_sessions, 4);
        assert_eq!(cfg.registry.ttl_secs, 3600);
        assert!(cfg.auto_retry_on_invalid_tags);
    }

    #[test]
    fn zero_retries_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_retries = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }
}
