//! Job/Batch registry layer
//!
//! Owns job and batch state, persists checkpoints through a
//! [`CheckpointStore`], and fans progress out to [`ProgressObserver`]s.

pub mod checkpoint_store;
pub mod job_registry;
pub mod observer;

pub use checkpoint_store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use job_registry::JobRegistry;
pub use observer::{LogObserver, ProgressObserver};
