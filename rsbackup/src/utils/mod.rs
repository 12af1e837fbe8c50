//! Utility modules for rsbackup.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, Result};
