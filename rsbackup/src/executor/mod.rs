//! Backup engine - orchestrates one generation run.
//!
//! A run moves through `Start -> ResolvePrevious -> Invoke -> {Success,
//! Failed}`:
//! - Resolve the previous generation from `_latest`
//! - Build the rsync invocation, hardlinking against the previous generation
//! - Execute rsync, forwarding log lines and progress
//! - Repoint `_latest`, strictly after rsync exited with code 0
//!
//! `_latest` therefore only ever names a generation whose rsync run
//! succeeded. A failed or cancelled run leaves its generation directory and
//! `.log` on disk untouched.

use crate::config::BackupDefinition;
use crate::fs::GenerationStore;
use crate::report::format::format_duration;
use crate::report::Reporter;
use crate::sync::{shell_quote, ProgressSample, RunMode, SyncInvocation, SyncOptions, SyncOutput};
use crate::utils::{BackupError, Result};
use chrono::{DateTime, Local};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress reported before rsync produces its first update.
const INITIAL_ETA: &str = "0:00:00";

/// Lifecycle states of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Start,
    ResolvePrevious,
    Invoke,
    Success,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Start => "start",
            RunState::ResolvePrevious => "resolve-previous",
            RunState::Invoke => "invoke",
            RunState::Success => "success",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub name: String,
    pub mode: RunMode,
    /// Generation directory (not created in dry-run mode)
    pub generation: PathBuf,
    /// Generation rsync hardlinked against, if any
    pub previous: Option<PathBuf>,
    pub duration: Duration,
}

/// Main backup engine
pub struct BackupEngine {
    binary: Option<PathBuf>,
    link_latest: bool,
    cancel_token: CancellationToken,
}

impl BackupEngine {
    /// Create a new engine (no cancellation support)
    pub fn new() -> Self {
        Self::with_cancel(CancellationToken::new())
    }

    /// Create a new engine whose runs stop when `cancel_token` is cancelled
    pub fn with_cancel(cancel_token: CancellationToken) -> Self {
        Self {
            binary: None,
            link_latest: true,
            cancel_token,
        }
    }

    /// Use an explicit rsync binary instead of looking it up on `PATH`.
    pub fn binary(mut self, binary: Option<PathBuf>) -> Self {
        self.binary = binary;
        self
    }

    /// Whether to hardlink against `_latest` and advance it afterwards.
    pub fn link_latest(mut self, enabled: bool) -> Self {
        self.link_latest = enabled;
        self
    }

    /// Create a new generation for `definition`, starting now.
    pub async fn run(
        &self,
        definition: &BackupDefinition,
        mode: RunMode,
        reporter: &dyn Reporter,
    ) -> Result<RunSummary> {
        self.run_at(definition, mode, Local::now(), reporter).await
    }

    /// Create a new generation named after `started`.
    ///
    /// The caller must ensure no other run uses the same target root
    /// concurrently, and that `started` differs by at least one second from
    /// earlier runs against that root.
    ///
    /// Names are local wall-clock time. When the clock goes back (end of
    /// daylight saving time, manual correction) a name may repeat, which
    /// fails like a same-second collision, or sort before older
    /// generations. `_latest` still names the last completed run; name order
    /// is only creation order while the clock moves forward.
    pub async fn run_at(
        &self,
        definition: &BackupDefinition,
        mode: RunMode,
        started: DateTime<Local>,
        reporter: &dyn Reporter,
    ) -> Result<RunSummary> {
        let clock = Instant::now();
        transition(&definition.name, RunState::Start);
        reporter.info(&format!(
            "Creating new backup generation for '{}'",
            definition.source.display()
        ));

        let result = self.generate(definition, mode, &started, reporter).await;
        let elapsed = clock.elapsed();

        match result {
            Ok(mut summary) => {
                transition(&definition.name, RunState::Success);
                summary.duration = elapsed;
                reporter.success(&format!(
                    "Backup of '{}' started at {} finished",
                    definition.source.display(),
                    started.format("%Y-%m-%d %H:%M:%S")
                ));
                reporter.info(&format!("Took {}", format_duration(elapsed)));
                Ok(summary)
            }
            Err(e) => {
                transition(&definition.name, RunState::Failed);
                reporter.error(&format!(
                    "Backup of '{}' failed after {}: {}",
                    definition.source.display(),
                    format_duration(elapsed),
                    e
                ));
                Err(e)
            }
        }
    }

    async fn generate(
        &self,
        definition: &BackupDefinition,
        mode: RunMode,
        started: &DateTime<Local>,
        reporter: &dyn Reporter,
    ) -> Result<RunSummary> {
        let store = GenerationStore::new(&definition.target);
        let generation = store.generation_path(started);
        reporter.notify(&format!("Creating backup at {}", generation.display()));

        transition(&definition.name, RunState::ResolvePrevious);
        let previous = if self.link_latest {
            self.previous_generation(&store, reporter)?
        } else {
            debug!("Linking against _latest disabled");
            None
        };

        reporter.progress(0, 0.0, INITIAL_ETA);

        let options = SyncOptions {
            link_dest: previous.clone(),
            excludes: definition.excludes.clone(),
            binary: self.binary.clone(),
            progress: true,
            ..SyncOptions::default()
        };
        let invocation = SyncInvocation::new(&definition.source, &generation, options)?;

        transition(&definition.name, RunState::Invoke);
        match mode {
            RunMode::DryRun => self.dry_run(&store, &generation, &invocation, reporter).await?,
            RunMode::Apply => self.apply(&store, &generation, &invocation, reporter).await?,
        }

        Ok(RunSummary {
            name: definition.name.clone(),
            mode,
            generation,
            previous,
            duration: Duration::ZERO,
        })
    }

    /// Previous generation to hardlink against, if `_latest` names a directory.
    fn previous_generation(
        &self,
        store: &GenerationStore,
        reporter: &dyn Reporter,
    ) -> Result<Option<PathBuf>> {
        match store.resolve_previous()? {
            Some(previous) if previous.is_dir() => {
                reporter.notify(&format!(
                    "Found previous backup generation at {}",
                    previous.display()
                ));
                Ok(Some(previous))
            }
            Some(previous) => {
                reporter.warn(&format!(
                    "{} points at missing generation {}; not linking unchanged files",
                    store.latest_path().display(),
                    previous.display()
                ));
                Ok(None)
            }
            None => {
                debug!("No previous generation under {}", store.root().display());
                Ok(None)
            }
        }
    }

    /// Report what an apply run would do and let rsync plan in `--dry-run` mode.
    async fn dry_run(
        &self,
        store: &GenerationStore,
        generation: &Path,
        invocation: &SyncInvocation,
        reporter: &dyn Reporter,
    ) -> Result<()> {
        let generation_arg = shell_quote(&generation.to_string_lossy());
        let latest_arg = shell_quote(&store.latest_path().to_string_lossy());

        reporter.warn("Dry run: not going to touch any files");
        reporter.notify(&format!("mkdir -p {}", generation_arg));
        reporter.notify(&invocation.command_line(RunMode::Apply));

        let mut output = PlanOutput { reporter };
        let code = invocation
            .execute(RunMode::DryRun, &mut output, &self.cancel_token)
            .await?;
        if code != 0 {
            return Err(BackupError::SyncFailed { code });
        }

        if self.link_latest {
            reporter.notify(&format!("rm -f {}", latest_arg));
            reporter.notify(&format!("ln -s {} {}", generation_arg, latest_arg));
        }
        Ok(())
    }

    /// Create the generation, run rsync into it, and advance `_latest`.
    async fn apply(
        &self,
        store: &GenerationStore,
        generation: &Path,
        invocation: &SyncInvocation,
        reporter: &dyn Reporter,
    ) -> Result<()> {
        store.create_generation_directory(generation)?;

        let log_path = store.log_path(generation);
        let mut output = GenerationLog::create(&log_path, reporter)?;

        reporter.notify(&invocation.command_line(RunMode::Apply));
        reporter.notify(&format!("Starting rsync; writing output to {}", log_path.display()));

        let executed = invocation
            .execute(RunMode::Apply, &mut output, &self.cancel_token)
            .await;
        let flushed = output.finish();

        let code = executed?;
        flushed?;
        if code != 0 {
            warn!(
                "rsync exited with {}; leaving {} in place",
                code,
                store.latest_path().display()
            );
            return Err(BackupError::SyncFailed { code });
        }
        reporter.notify("rsync finished");

        if self.link_latest {
            store.advance_latest(generation)?;
            info!("{} now points at {}", store.latest_path().display(), generation.display());
        }
        Ok(())
    }
}

impl Default for BackupEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn transition(name: &str, state: RunState) {
    debug!(backup = %name, state = %state, "Run state changed");
}

/// Apply-mode output: transcript to `.log`, progress to the reporter.
struct GenerationLog<'a> {
    path: PathBuf,
    writer: BufWriter<File>,
    reporter: &'a dyn Reporter,
}

impl<'a> GenerationLog<'a> {
    fn create(path: &Path, reporter: &'a dyn Reporter) -> Result<Self> {
        let file = File::create(path).map_err(|e| BackupError::filesystem(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            reporter,
        })
    }

    fn finish(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| BackupError::filesystem(&self.path, e))
    }
}

impl SyncOutput for GenerationLog<'_> {
    fn log_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "{}", line).map_err(|e| BackupError::filesystem(&self.path, e))
    }

    fn progress(&mut self, sample: ProgressSample) {
        self.reporter
            .progress(sample.bytes_sent, sample.completion, &sample.eta);
    }
}

/// Dry-run output: rsync's plan goes to the reporter.
struct PlanOutput<'a> {
    reporter: &'a dyn Reporter,
}

impl SyncOutput for PlanOutput<'_> {
    fn log_line(&mut self, line: &str) -> Result<()> {
        self.reporter.info(line);
        Ok(())
    }

    fn progress(&mut self, sample: ProgressSample) {
        self.reporter
            .progress(sample.bytes_sent, sample.completion, &sample.eta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{CollectingReporter, ReportEvent};
    use tempfile::TempDir;

    fn definition(root: &Path) -> BackupDefinition {
        BackupDefinition {
            name: "test".to_string(),
            source: root.join("source"),
            target: root.join("target"),
            description: None,
            excludes: vec![],
        }
    }

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::ResolvePrevious.to_string(), "resolve-previous");
        assert_eq!(RunState::Failed.to_string(), "failed");
    }

    #[tokio::test]
    async fn test_unresolvable_binary_fails_before_touching_disk() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let definition = definition(temp_dir.path());
        let reporter = CollectingReporter::new();

        let engine = BackupEngine::new().binary(Some(temp_dir.path().join("no-rsync")));
        let err = engine
            .run(&definition, RunMode::Apply, &reporter)
            .await
            .unwrap_err();

        assert!(matches!(err, BackupError::Config(_)));
        assert!(!definition.target.exists());
        assert!(matches!(
            reporter.events().last(),
            Some(ReportEvent::Error(_))
        ));
        Ok(())
    }

    #[test]
    fn test_generation_log_writes_lines() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join(".log");
        let reporter = CollectingReporter::new();

        let mut log = GenerationLog::create(&path, &reporter)?;
        log.log_line("sending incremental file list")?;
        log.log_line("file.txt")?;
        log.progress(ProgressSample {
            bytes_sent: 5,
            completion: 1.0,
            eta: "0:00:00".to_string(),
        });
        log.finish()?;

        assert_eq!(
            std::fs::read_to_string(&path)?,
            "sending incremental file list\nfile.txt\n"
        );
        assert_eq!(reporter.events().len(), 1);
        Ok(())
    }
}
