//! osb-tracker: last-operation bookkeeping.
//!
//! Maps opaque operation tokens to in-flight or completed lifecycle work so
//! platforms can poll `last_operation`. At most one unfinished operation
//! exists per instance; beginning a new one drops the instance's finished
//! records. Finished records expire after a retention window and are
//! removed by the [`Reaper`].

pub mod error;
pub mod memory;
pub mod reaper;
pub mod tracker;

pub use error::{TrackerError, TrackerResult};
pub use memory::MemoryTracker;
pub use reaper::Reaper;
pub use tracker::OperationTracker;
