//! Parallel batch-processing engine
//!
//! The orchestrator drives scan cycles, partitions the target address set
//! into batches, and hands them to the scheduler's fixed worker pool. Each
//! worker runs a batch executor that derives profiles and per-profile
//! patterns; the orchestrator merges completed batches in any order, runs
//! batch-level graph analysis over the cached profile set, and emits events.
//!
//! Module organization:
//! - `scheduler` - fixed worker pool and FIFO task queue
//! - `executor` - per-batch profile building and rule evaluation
//! - `orchestrator` - scan cycles, cache-first dispatch, merging, events
//! - `events` - outbound event contract
//! - `report` - pull-based performance snapshot

pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod report;
pub mod scheduler;

pub use events::MonitorEvent;
pub use executor::BatchExecutor;
pub use orchestrator::Orchestrator;
pub use report::PerformanceReport;
pub use scheduler::WorkerPool;

/// Task-level failure surfaced through a batch's completion channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The batch itself was unusable (e.g. empty)
    Malformed(String),

    /// The pool shut down before the batch ran
    Shutdown,

    /// Executor-side failure outside per-address accounting
    Failed(String),
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskError::Malformed(msg) => write!(f, "malformed batch: {}", msg),
            TaskError::Shutdown => write!(f, "worker pool shut down"),
            TaskError::Failed(msg) => write!(f, "batch failed: {}", msg),
        }
    }
}

impl std::error::Error for TaskError {}
