//! On-disk layout of a backup target root.
//!
//! ```text
//! <root>/_latest                      -> symlink to the last completed generation
//! <root>/2024-01-02_15-30-00/         generation directory
//! <root>/2024-01-02_15-30-00/.log     rsync transcript
//! ```
//!
//! Generation names are zero-padded and fixed-width, so lexicographic order
//! is creation order. Two runs started within the same second against the
//! same root map to the same generation path; the second one fails in
//! [`GenerationStore::create_generation_directory`].
//!
//! The store does no locking. Callers must not run two backups against the
//! same root concurrently.

use crate::utils::{BackupError, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the pointer to the most recently completed generation.
pub const LATEST_NAME: &str = "_latest";

/// Name of the rsync transcript inside each generation.
pub const LOG_FILE_NAME: &str = ".log";

/// `strftime` format of generation directory names.
pub const GENERATION_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Generations and the `_latest` pointer under one target root.
#[derive(Debug, Clone)]
pub struct GenerationStore {
    root: PathBuf,
}

impl GenerationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the `_latest` symlink.
    pub fn latest_path(&self) -> PathBuf {
        self.root.join(LATEST_NAME)
    }

    /// Location of the rsync transcript for a generation.
    pub fn log_path(&self, generation: &Path) -> PathBuf {
        generation.join(LOG_FILE_NAME)
    }

    /// Directory name for a generation started at `timestamp`.
    pub fn generation_name<Tz>(timestamp: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        timestamp.format(GENERATION_FORMAT).to_string()
    }

    /// Path of the generation started at `timestamp`.
    pub fn generation_path<Tz>(&self, timestamp: &DateTime<Tz>) -> PathBuf
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        self.root.join(Self::generation_name(timestamp))
    }

    /// Target of `_latest`, or `None` before the first completed generation.
    ///
    /// The link is read one level only. A relative target is resolved
    /// against the root.
    pub fn resolve_previous(&self) -> Result<Option<PathBuf>> {
        let latest = self.latest_path();
        match fs::read_link(&latest) {
            Ok(target) => {
                let target = self.root.join(target);
                debug!("{} points at {}", latest.display(), target.display());
                Ok(Some(target))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackupError::filesystem(latest, e)),
        }
    }

    /// Create a fresh generation directory.
    ///
    /// Missing ancestors are created, but the generation directory itself
    /// must not exist yet: an existing one means a timestamp collision or an
    /// interrupted earlier run, and is never reused.
    pub fn create_generation_directory(&self, generation: &Path) -> Result<()> {
        if let Some(parent) = generation.parent() {
            fs::create_dir_all(parent).map_err(|e| BackupError::filesystem(parent, e))?;
        }
        fs::create_dir(generation).map_err(|e| BackupError::filesystem(generation, e))?;
        debug!("Created generation directory {}", generation.display());
        Ok(())
    }

    /// Point `_latest` at `generation`.
    ///
    /// Remove-then-recreate: a crash between the two steps leaves no
    /// `_latest` at all, which the next run treats as a first run.
    pub fn advance_latest(&self, generation: &Path) -> Result<()> {
        let latest = self.latest_path();

        match fs::symlink_metadata(&latest) {
            Ok(_) => fs::remove_file(&latest).map_err(|e| BackupError::filesystem(&latest, e))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(BackupError::filesystem(latest, e)),
        }

        std::os::unix::fs::symlink(generation, &latest)
            .map_err(|e| BackupError::filesystem(&latest, e))?;
        debug!("{} -> {}", latest.display(), generation.display());
        Ok(())
    }

    /// Names of all generation directories, oldest first.
    ///
    /// A missing root yields an empty list.
    pub fn generations(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::filesystem(&self.root, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BackupError::filesystem(&self.root, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| BackupError::filesystem(entry.path(), e))?;
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_generation_name(&name) {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }
}

/// Whether `name` is a well-formed generation directory name.
pub fn is_generation_name(name: &str) -> bool {
    NaiveDateTime::parse_from_str(name, GENERATION_FORMAT).is_ok()
}
