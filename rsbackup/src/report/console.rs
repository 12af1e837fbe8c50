//! Plain terminal reporter.

use super::format::{format_bytes, format_percent};
use super::Reporter;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

/// Writes messages line by line and keeps progress on one rewritten line.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    /// A progress line is on screen without a trailing newline
    progress_open: AtomicBool,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn close_progress(&self) {
        if self.progress_open.swap(false, Ordering::Relaxed) {
            println!();
        }
    }

    fn line(&self, prefix: &str, message: &str) {
        self.close_progress();
        println!("{}{}", prefix, message);
    }

    fn error_line(&self, prefix: &str, message: &str) {
        self.close_progress();
        eprintln!("{}{}", prefix, message);
    }
}

impl Reporter for ConsoleReporter {
    fn notify(&self, message: &str) {
        self.line("  ", message);
    }

    fn info(&self, message: &str) {
        self.line("", message);
    }

    fn warn(&self, message: &str) {
        self.error_line("warning: ", message);
    }

    fn error(&self, message: &str) {
        self.error_line("error: ", message);
    }

    fn success(&self, message: &str) {
        self.line("✓ ", message);
    }

    fn progress(&self, bytes_sent: u64, completion: f64, eta: &str) {
        self.progress_open.store(true, Ordering::Relaxed);
        let mut stdout = std::io::stdout().lock();
        let _ = write!(
            stdout,
            "\r{:>12} {} ETA {:<10}",
            format_bytes(bytes_sent),
            format_percent(completion),
            eta
        );
        let _ = stdout.flush();
    }
}

impl Drop for ConsoleReporter {
    fn drop(&mut self) {
        self.close_progress();
    }
}
