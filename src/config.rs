//! Configuration for conductor.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CONDUCTOR_HOME, CONDUCTOR_WORKSPACE)
//! 2. Config file (.conductor/config.yaml)
//! 3. Defaults (~/.conductor)
//!
//! Config file discovery:
//! - Searches current directory and parents for .conductor/config.yaml
//! - Paths in config file are relative to the .conductor/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::{DispatchSettings, PacingPolicy};
use crate::domain::DEFAULT_MAX_DURATION;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub dispatch: Option<DispatchConfig>,
    #[serde(default)]
    pub cpu_saver: Option<PacingPolicy>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory
    pub home: Option<String>,
    /// Conduct workspace file
    pub workspace: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    pub default_max_duration: Option<u64>,
    pub freshness_window_seconds: Option<f64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state directory
    pub home: PathBuf,
    /// Conduct workspace file
    pub workspace: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Dispatch tunables
    pub dispatch: DispatchSettings,
    /// Idle triggers older than this are reported overdue
    pub freshness_window: Option<f64>,
}

impl ResolvedConfig {
    pub fn triggers_dir(&self) -> PathBuf {
        self.home.join("triggers")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.home.join("audit.jsonl")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".conductor").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Build settings from a parsed config file
fn dispatch_settings(config: Option<&ConfigFile>) -> (DispatchSettings, Option<f64>) {
    let dispatch = config.and_then(|c| c.dispatch.as_ref());

    let settings = DispatchSettings {
        default_max_duration: dispatch
            .and_then(|d| d.default_max_duration)
            .filter(|d| *d > 0)
            .unwrap_or(DEFAULT_MAX_DURATION),
        pacing: config
            .and_then(|c| c.cpu_saver.clone())
            .unwrap_or_default(),
    };

    (settings, dispatch.and_then(|d| d.freshness_window_seconds))
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".conductor");

    let config_file = find_config_file();
    let parsed = match config_file {
        Some(ref path) => Some(load_config_file(path)?),
        None => None,
    };

    // Paths in the file are relative to .conductor/
    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));

    let home = if let Ok(env_home) = std::env::var("CONDUCTOR_HOME") {
        PathBuf::from(env_home)
    } else if let Some(home_path) = parsed.as_ref().and_then(|c| c.paths.home.as_deref()) {
        resolve_path(config_dir, home_path)
    } else {
        default_home
    };

    let workspace = if let Ok(env_workspace) = std::env::var("CONDUCTOR_WORKSPACE") {
        PathBuf::from(env_workspace)
    } else if let Some(ws) = parsed.as_ref().and_then(|c| c.paths.workspace.as_deref()) {
        resolve_path(config_dir, ws)
    } else {
        home.join("workspace.yaml")
    };

    let (dispatch, freshness_window) = dispatch_settings(parsed.as_ref());

    Ok(ResolvedConfig {
        home,
        workspace,
        config_file,
        dispatch,
        freshness_window,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

// ============================================================================
// Convenience functions
// ============================================================================

/// Get the triggers directory ($CONDUCTOR_HOME/triggers)
pub fn triggers_dir() -> Result<PathBuf> {
    Ok(config()?.triggers_dir())
}

/// Get the audit log path ($CONDUCTOR_HOME/audit.jsonl)
pub fn audit_log_path() -> Result<PathBuf> {
    Ok(config()?.audit_log_path())
}

/// Get the conduct workspace file
pub fn workspace_path() -> Result<PathBuf> {
    Ok(config()?.workspace.clone())
}
