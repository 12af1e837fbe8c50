//! Configuration management for rsbackup.
//!
//! Loads backup definitions from a TOML file:
//!
//! ```toml
//! [log]
//! level = "info"
//!
//! [rsync]
//! binary = "/usr/bin/rsync"
//!
//! [backups.home]
//! source = "/home/alice"
//! target = "backups/home"
//! description = "Home directory"
//! excludes = ["*.tmp", ".cache/"]
//! ```
//!
//! Relative `source` and `target` paths are resolved against the directory
//! containing the configuration file.

use crate::utils::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// File name of the configuration inside the user's config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub rsync: RsyncConfig,

    /// Backup definitions keyed by name
    #[serde(default)]
    pub backups: BTreeMap<String, BackupEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RsyncConfig {
    /// Explicit rsync binary; looked up on PATH when unset
    #[serde(default)]
    pub binary: Option<PathBuf>,
}

/// One `[backups.<name>]` table as written in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    pub source: PathBuf,
    pub target: PathBuf,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub excludes: Vec<String>,
}

/// A resolved, read-only backup definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupDefinition {
    pub name: String,
    /// Absolute path of the tree to back up
    pub source: PathBuf,
    /// Absolute path of the root holding the generations
    pub target: PathBuf,
    pub description: Option<String>,
    /// rsync exclude patterns, order preserved
    pub excludes: Vec<String>,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BackupError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&content, base_dir)
    }

    /// Parse configuration text, resolving relative paths against `base_dir`.
    pub fn parse(content: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Config = toml::from_str(content)
            .map_err(|e| BackupError::Config(format!("invalid configuration: {}", e)))?;

        let base_dir = absolute(base_dir)?;
        for (name, entry) in config.backups.iter_mut() {
            if entry.source.as_os_str().is_empty() {
                return Err(BackupError::Config(format!("backup {} has an empty source", name)));
            }
            if entry.target.as_os_str().is_empty() {
                return Err(BackupError::Config(format!("backup {} has an empty target", name)));
            }
            entry.source = resolve_path(&base_dir, &entry.source);
            entry.target = resolve_path(&base_dir, &entry.target);
        }

        if let Some(binary) = config.rsync.binary.take() {
            config.rsync.binary = Some(expand_home(&binary));
        }

        Ok(config)
    }

    /// Look up a definition by name.
    pub fn definition(&self, name: &str) -> Result<BackupDefinition> {
        self.backups
            .get(name)
            .map(|entry| entry.to_definition(name))
            .ok_or_else(|| BackupError::DefinitionNotFound(name.to_string()))
    }

    /// All definitions, sorted by name.
    pub fn definitions(&self) -> Vec<BackupDefinition> {
        self.backups
            .iter()
            .map(|(name, entry)| entry.to_definition(name))
            .collect()
    }
}

impl BackupEntry {
    fn to_definition(&self, name: &str) -> BackupDefinition {
        BackupDefinition {
            name: name.to_string(),
            source: self.source.clone(),
            target: self.target.clone(),
            description: self.description.clone(),
            excludes: self.excludes.clone(),
        }
    }
}

/// Default configuration file location (`<config dir>/rsbackup/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(env!("CARGO_PKG_NAME")).join(CONFIG_FILE_NAME))
}

fn absolute(dir: &Path) -> Result<PathBuf> {
    if dir.is_absolute() {
        Ok(normalize(dir))
    } else {
        let cwd = std::env::current_dir()?;
        Ok(normalize(&cwd.join(dir)))
    }
}

fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    let path = expand_home(path);
    if path.is_absolute() {
        normalize(&path)
    } else {
        normalize(&base_dir.join(path))
    }
}

/// Replace a leading `~` with the user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Lexically remove `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
