//! rsbackup library
//!
//! Generational file-tree backups driven by rsync. Every run creates a
//! timestamped generation under the target root which hardlinks unchanged
//! files against the previous one (`--link-dest`), and moves the `_latest`
//! pointer once rsync has succeeded.

pub mod config;
pub mod executor;
pub mod fs;
pub mod report;
pub mod shutdown;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use config::{BackupDefinition, Config};
pub use executor::{BackupEngine, RunSummary};
pub use fs::GenerationStore;
pub use report::{ConsoleReporter, Reporter};
pub use sync::{ProgressSample, RunMode, SyncInvocation, SyncOptions};
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
