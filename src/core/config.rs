// Configuration for the trade/depth synchronizer
// Defaults -> SIERRA_* environment overrides -> JSON file overrides

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Run-wide settings. Everything has a default so a config file is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Directory holding `<STEM>.scid` intraday files.
    pub scid_root: PathBuf,
    /// Directory holding `<STEM>.<YYYY-MM-DD>.depth` files.
    pub depth_root: PathBuf,
    /// Directory for run logs and manifests.
    pub logs_root: PathBuf,
    /// Contract stem suffix appended after symbol + month code + year.
    pub contract_suffix: String,
    /// Log level string understood by `setup_logging`.
    pub log_level: String,
    /// Write a per-run text manifest next to the outputs.
    pub write_manifest: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            scid_root: PathBuf::from("data"),
            depth_root: PathBuf::from("data/MarketDepthData"),
            logs_root: PathBuf::from("logs"),
            contract_suffix: "_FUT_CME".to_string(),
            log_level: "INFO".to_string(),
            write_manifest: true,
        }
    }
}

/// Partial form used when merging a JSON file over the running config.
#[derive(Debug, Default, Deserialize)]
struct SyncConfigOverrides {
    scid_root: Option<PathBuf>,
    depth_root: Option<PathBuf>,
    logs_root: Option<PathBuf>,
    contract_suffix: Option<String>,
    log_level: Option<String>,
    write_manifest: Option<bool>,
}

impl SyncConfig {
    /// Build the effective configuration: defaults, then environment
    /// variables, then (highest precedence) the optional JSON file.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = SyncConfig::default();
        cfg.apply_env();
        if let Some(path) = config_path {
            cfg.apply_file(path)?;
        }
        info!(
            scid_root = %cfg.scid_root.display(),
            depth_root = %cfg.depth_root.display(),
            "Configuration loaded"
        );
        Ok(cfg)
    }

    /// Apply `SIERRA_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("SIERRA_SCID_ROOT") {
            self.scid_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SIERRA_DEPTH_ROOT") {
            self.depth_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SIERRA_LOGS_ROOT") {
            self.logs_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SIERRA_LOG_LEVEL") {
            self.log_level = v;
        }
    }

    /// Merge a JSON settings file over the current values. Unknown keys are
    /// rejected so typos do not silently fall back to defaults.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found");
            return Ok(());
        }
        let content = fs::read_to_string(path)?;
        let overrides: SyncConfigOverrides = serde_json::from_str(&content)?;
        if let Some(v) = overrides.scid_root {
            self.scid_root = v;
        }
        if let Some(v) = overrides.depth_root {
            self.depth_root = v;
        }
        if let Some(v) = overrides.logs_root {
            self.logs_root = v;
        }
        if let Some(v) = overrides.contract_suffix {
            self.contract_suffix = v;
        }
        if let Some(v) = overrides.log_level {
            self.log_level = v;
        }
        if let Some(v) = overrides.write_manifest {
            self.write_manifest = v;
        }
        info!(path = %path.display(), "Configuration file applied");
        Ok(())
    }

    /// Validate settings that would otherwise fail deep inside a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.scid_root.as_os_str().is_empty() {
            errors.push("scid_root must not be empty".to_string());
        }
        if self.depth_root.as_os_str().is_empty() {
            errors.push("depth_root must not be empty".to_string());
        }
        if !matches!(
            self.log_level.to_uppercase().as_str(),
            "TRACE" | "DEBUG" | "INFO" | "WARN" | "WARNING" | "ERROR"
        ) {
            errors.push(format!("unknown log_level '{}'", self.log_level));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            for error in &errors {
                warn!(error = %error, "Config validation error");
            }
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }
}
