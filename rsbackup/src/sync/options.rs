//! rsync option set and argument construction.

use crate::utils::{BackupError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Name of the binary looked up on `PATH` when no explicit path is configured.
pub const DEFAULT_BINARY: &str = "rsync";

/// Whether rsync should actually write to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Apply,
    DryRun,
}

impl RunMode {
    pub fn is_dry_run(self) -> bool {
        self == RunMode::DryRun
    }
}

/// Declarative rsync options for one invocation.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Run in archive mode (`--archive`)
    pub archive: bool,

    /// Log transferred files (`--verbose`)
    pub verbose: bool,

    /// Delete extraneous files from the target (`--delete`)
    pub delete: bool,

    /// Reference tree for hardlinking unchanged files (`--link-dest`)
    pub link_dest: Option<PathBuf>,

    /// Exclude patterns, passed to rsync in order
    pub excludes: Vec<String>,

    /// Explicit rsync binary; `PATH` lookup otherwise
    pub binary: Option<PathBuf>,

    /// Enable the machine-readable progress protocol
    pub progress: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            archive: true,
            verbose: true,
            delete: true,
            link_dest: None,
            excludes: Vec::new(),
            binary: None,
            progress: false,
        }
    }
}

impl SyncOptions {
    /// Resolve the rsync binary to execute.
    ///
    /// An explicit binary must exist and be executable; otherwise `rsync` is
    /// searched on `PATH`. Fails before anything is spawned.
    pub fn resolve_binary(&self) -> Result<PathBuf> {
        let wanted: &Path = self
            .binary
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_BINARY));

        which::which(wanted).map_err(|e| {
            BackupError::Config(format!(
                "rsync binary {} cannot be resolved: {}",
                wanted.display(),
                e
            ))
        })
    }

    /// Build the argument vector for copying `source` into `target`.
    pub fn args(&self, source: &Path, target: &Path, mode: RunMode) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();

        if self.archive {
            args.push("--archive".into());
        }
        if self.verbose {
            args.push("--verbose".into());
        }
        if self.delete {
            args.push("--delete".into());
        }

        if mode.is_dry_run() {
            args.push("--dry-run".into());
        }

        if self.progress {
            // Incremental recursion reorders the file list and makes the
            // progress2 totals jump; disable it for a stable line format.
            args.push("--no-i-r".into());
            args.push("--info=progress2".into());
        }

        args.push(source.into());

        if let Some(link_dest) = &self.link_dest {
            let mut arg = OsString::from("--link-dest=");
            arg.push(link_dest);
            args.push(arg);
        }

        for exclude in &self.excludes {
            args.push(format!("--exclude={}", exclude).into());
        }

        args.push(target.into());

        args
    }
}

/// Render a program and its arguments as a copy-pasteable shell line.
pub fn render_command(program: &Path, args: &[OsString]) -> String {
    std::iter::once(program.as_os_str())
        .chain(args.iter().map(OsString::as_os_str))
        .map(|arg| shell_quote(&arg.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote a single word for POSIX shells, leaving plain words untouched.
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));

    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_default_args() {
        let args = SyncOptions::default().args(
            Path::new("/home/alice"),
            Path::new("/backup/2024-01-02_15-30-00"),
            RunMode::Apply,
        );
        assert_eq!(
            strings(args),
            vec![
                "--archive",
                "--verbose",
                "--delete",
                "/home/alice",
                "/backup/2024-01-02_15-30-00",
            ]
        );
    }

    #[test]
    fn test_full_argument_order() {
        let options = SyncOptions {
            link_dest: Some(PathBuf::from("/backup/2024-01-01_10-00-00")),
            excludes: vec!["*.tmp".to_string(), ".cache/".to_string(), "a b".to_string()],
            progress: true,
            ..SyncOptions::default()
        };
        let args = options.args(
            Path::new("/src"),
            Path::new("/backup/2024-01-02_15-30-00"),
            RunMode::DryRun,
        );
        assert_eq!(
            strings(args),
            vec![
                "--archive",
                "--verbose",
                "--delete",
                "--dry-run",
                "--no-i-r",
                "--info=progress2",
                "/src",
                "--link-dest=/backup/2024-01-01_10-00-00",
                "--exclude=*.tmp",
                "--exclude=.cache/",
                "--exclude=a b",
                "/backup/2024-01-02_15-30-00",
            ]
        );
    }

    #[test]
    fn test_flags_can_be_disabled() {
        let options = SyncOptions {
            archive: false,
            verbose: false,
            delete: false,
            ..SyncOptions::default()
        };
        let args = options.args(Path::new("/a"), Path::new("/b"), RunMode::Apply);
        assert_eq!(strings(args), vec!["/a", "/b"]);
    }

    #[test]
    fn test_resolve_missing_binary() {
        let options = SyncOptions {
            binary: Some(PathBuf::from("/nonexistent/bin/rsync")),
            ..SyncOptions::default()
        };
        assert!(matches!(
            options.resolve_binary(),
            Err(BackupError::Config(_))
        ));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("--exclude=*.tmp"), "'--exclude=*.tmp'");
        assert_eq!(shell_quote("/backup/_latest"), "/backup/_latest");
        assert_eq!(shell_quote("my files"), "'my files'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_render_command() {
        let args = vec![OsString::from("--archive"), OsString::from("/my src")];
        assert_eq!(
            render_command(Path::new("/usr/bin/rsync"), &args),
            "/usr/bin/rsync --archive '/my src'"
        );
    }
}
