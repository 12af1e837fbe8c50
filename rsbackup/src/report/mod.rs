//! User-facing reporting of backup runs.
//!
//! The engine talks to a [`Reporter`] synchronously and in order. How the
//! calls are rendered is up to the implementation.

pub mod console;
pub mod format;

pub use console::ConsoleReporter;

use std::sync::Mutex;

/// Sink for user-visible backup events.
pub trait Reporter {
    /// Specifics of the run (paths, commands).
    fn notify(&self, message: &str);

    fn info(&self, message: &str);

    fn warn(&self, message: &str);

    fn error(&self, message: &str);

    fn success(&self, message: &str);

    /// Called frequently while rsync runs; must return promptly.
    fn progress(&self, bytes_sent: u64, completion: f64, eta: &str);
}

/// A single recorded reporter call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
    Notify(String),
    Info(String),
    Warn(String),
    Error(String),
    Success(String),
    Progress {
        bytes_sent: u64,
        completion: f64,
        eta: String,
    },
}

/// Reporter that keeps every call in memory, for inspection after a run.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<ReportEvent>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all calls so far.
    pub fn events(&self) -> Vec<ReportEvent> {
        self.lock().clone()
    }

    /// `notify` messages, in call order.
    pub fn notifications(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                ReportEvent::Notify(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ReportEvent>> {
        // A poisoned lock still holds every event recorded before the panic.
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, event: ReportEvent) {
        self.lock().push(event);
    }
}

impl Reporter for CollectingReporter {
    fn notify(&self, message: &str) {
        self.push(ReportEvent::Notify(message.to_string()));
    }

    fn info(&self, message: &str) {
        self.push(ReportEvent::Info(message.to_string()));
    }

    fn warn(&self, message: &str) {
        self.push(ReportEvent::Warn(message.to_string()));
    }

    fn error(&self, message: &str) {
        self.push(ReportEvent::Error(message.to_string()));
    }

    fn success(&self, message: &str) {
        self.push(ReportEvent::Success(message.to_string()));
    }

    fn progress(&self, bytes_sent: u64, completion: f64, eta: &str) {
        self.push(ReportEvent::Progress {
            bytes_sent,
            completion,
            eta: eta.to_string(),
        });
    }
}
