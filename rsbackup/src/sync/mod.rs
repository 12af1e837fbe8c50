//! rsync invocation: options, process execution and progress decoding.

pub mod options;
pub mod process;
pub mod progress;

pub use options::{render_command, shell_quote, RunMode, SyncOptions};
pub use process::{Discard, SyncEvent, SyncInvocation, SyncOutput};
pub use progress::ProgressSample;
