//! Filesystem layout of backup targets.

pub mod generation;

pub use generation::GenerationStore;
