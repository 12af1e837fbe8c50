//! Running rsync as a child process and streaming its output.
//!
//! rsync's stdout and stderr share the write end of one pipe, so the read end
//! carries its output in the order it was written. A reader task cuts that
//! stream into records at every `\n` and `\r`, decodes progress updates, and
//! forwards [`SyncEvent`]s over a channel to the caller's [`SyncOutput`]
//! handler.
//!
//! rsync rewrites its progress line with a leading `\r` and no newline. An
//! update is released as soon as the pipe is drained after it, so progress
//! streams live instead of waiting for the next newline.

use super::options::{render_command, RunMode, SyncOptions};
use super::progress::{is_progress_line, ProgressSample};
use crate::utils::{BackupError, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::ffi::OsString;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Maximum number of decoded events buffered between readers and consumer.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Size of one read from the output pipe.
const READ_CHUNK_SIZE: usize = 8192;

/// Time rsync gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Exit code reported when rsync was terminated by a signal.
pub const SIGNALLED_EXIT_CODE: i32 = -1;

/// One categorized unit of rsync output.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Ordinary output line, without trailing newline
    Log(String),

    /// Decoded `--info=progress2` update
    Progress(ProgressSample),
}

/// Receives rsync output while the process runs.
///
/// Both methods default to discarding their input.
pub trait SyncOutput {
    fn log_line(&mut self, _line: &str) -> Result<()> {
        Ok(())
    }

    fn progress(&mut self, _sample: ProgressSample) {}
}

/// Handler that drops all output.
pub struct Discard;

impl SyncOutput for Discard {}

/// A fully resolved rsync invocation.
#[derive(Debug, Clone)]
pub struct SyncInvocation {
    binary: PathBuf,
    source: PathBuf,
    target: PathBuf,
    options: SyncOptions,
}

impl SyncInvocation {
    /// Resolve the binary and bind the options to a source and target.
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>, options: SyncOptions) -> Result<Self> {
        let binary = options.resolve_binary()?;
        Ok(Self {
            binary,
            source: source.into(),
            target: target.into(),
            options,
        })
    }

    /// Argument vector for the given mode.
    pub fn args(&self, mode: RunMode) -> Vec<OsString> {
        self.options.args(&self.source, &self.target, mode)
    }

    /// Shell-equivalent command line for the given mode.
    pub fn command_line(&self, mode: RunMode) -> String {
        render_command(&self.binary, &self.args(mode))
    }

    /// Run rsync to completion and return its exit code.
    ///
    /// A non-zero exit code is returned as `Ok`; judging it is up to the
    /// caller. Malformed progress output, a failing log handler, or
    /// cancellation terminate the child and return an error.
    pub async fn execute<H>(&self, mode: RunMode, output: &mut H, cancel: &CancellationToken) -> Result<i32>
    where
        H: SyncOutput + ?Sized,
    {
        debug!("Spawning {}", self.command_line(mode));

        let (reader, writer) = std::io::pipe()?;
        let stderr_writer = writer.try_clone()?;

        // The command owns both write ends and closes them once spawned, so
        // the reader sees end-of-stream when rsync exits.
        let mut child = Command::new(&self.binary)
            .args(self.args(mode))
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr_writer)
            .kill_on_drop(true)
            .spawn()?;

        let output_pipe = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;

        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(read_events(output_pipe, tx));

        if let Err(e) = dispatch(&mut rx, output, cancel).await {
            terminate(&mut child).await;
            return Err(e);
        }

        let status = tokio::select! {
            status = child.wait() => Some(status?),
            _ = cancel.cancelled() => None,
        };
        let Some(status) = status else {
            terminate(&mut child).await;
            return Err(BackupError::Cancelled);
        };

        match status.code() {
            Some(code) => {
                debug!("rsync exited with code {}", code);
                Ok(code)
            }
            None => {
                warn!("rsync was terminated by a signal ({})", status);
                Ok(SIGNALLED_EXIT_CODE)
            }
        }
    }
}

/// Forward events to the handler until both pipes are closed.
async fn dispatch<H>(
    rx: &mut mpsc::Receiver<Result<SyncEvent>>,
    output: &mut H,
    cancel: &CancellationToken,
) -> Result<()>
where
    H: SyncOutput + ?Sized,
{
    loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = cancel.cancelled() => return Err(BackupError::Cancelled),
        };

        match event {
            Some(Ok(SyncEvent::Log(line))) => output.log_line(&line)?,
            Some(Ok(SyncEvent::Progress(sample))) => output.progress(sample),
            Some(Err(e)) => return Err(e),
            None => return Ok(()),
        }
    }
}

/// Cut the output pipe into records and send the decoded events.
async fn read_events<R>(mut reader: R, tx: mpsc::Sender<Result<SyncEvent>>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut splitter = RecordSplitter::default();

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        };

        let mut records = splitter.push(&chunk[..n]);
        // A short read means the pipe is drained; rsync writes each progress
        // update in one piece, so a pending update is complete.
        if n < chunk.len() {
            records.extend(splitter.take_progress());
        }

        for record in records {
            if !send_record(&tx, &record).await {
                return;
            }
        }
    }

    if let Some(record) = splitter.finish() {
        send_record(&tx, &record).await;
    }
}

/// Decode one record and send its events; `false` once reading should stop.
async fn send_record(tx: &mpsc::Sender<Result<SyncEvent>>, record: &[u8]) -> bool {
    let line = String::from_utf8_lossy(record);
    for event in decode_line(&line) {
        let failed = event.is_err();
        if tx.send(event).await.is_err() || failed {
            return false;
        }
    }
    true
}

/// Splits rsync output into records.
///
/// `\n` ends a record. `\r` ends the current record and starts a new one
/// that keeps the `\r` as its first byte, which marks it as a progress
/// update.
#[derive(Debug, Default)]
struct RecordSplitter {
    pending: Vec<u8>,
}

impl RecordSplitter {
    /// Feed raw bytes; returns every record completed by them.
    fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut records = Vec::new();
        for &byte in bytes {
            match byte {
                b'\n' => records.push(std::mem::take(&mut self.pending)),
                b'\r' => {
                    if !self.pending.is_empty() {
                        records.push(std::mem::take(&mut self.pending));
                    }
                    self.pending.push(b'\r');
                }
                _ => self.pending.push(byte),
            }
        }
        records
    }

    /// Release a buffered progress update that has content after its `\r`.
    fn take_progress(&mut self) -> Option<Vec<u8>> {
        match self.pending.split_first() {
            Some((b'\r', rest)) if rest.iter().any(|b| !b.is_ascii_whitespace()) => {
                Some(std::mem::take(&mut self.pending))
            }
            _ => None,
        }
    }

    /// Whatever is left once the stream has ended.
    fn finish(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

/// Categorize one raw output line.
pub fn decode_line(raw: &str) -> Vec<Result<SyncEvent>> {
    let line = raw.trim_end_matches('\n');

    if is_progress_line(line) {
        return match ProgressSample::parse_all(line) {
            Ok(samples) => samples.into_iter().map(|s| Ok(SyncEvent::Progress(s))).collect(),
            Err(e) => vec![Err(e)],
        };
    }

    let line = line.trim_end_matches('\r');
    if line.is_empty() {
        Vec::new()
    } else {
        vec![Ok(SyncEvent::Log(line.to_string()))]
    }
}

/// Ask rsync to stop, escalating to SIGKILL after the grace period.
async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        info!("Terminating rsync (pid {})", pid);
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!("Failed to send SIGTERM to rsync: {}", e);
        }
    }

    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!("rsync stopped: {}", status),
        Ok(Err(e)) => warn!("Failed to reap rsync: {}", e),
        Err(_) => {
            warn!("rsync ignored SIGTERM, killing it");
            if let Err(e) = child.kill().await {
                warn!("Failed to kill rsync: {}", e);
            }
        }
    }
}
