#![allow(clippy::result_large_err)]
//! # Jobrank Core
//!
//! Concurrent job scheduling with priority aging.
//!
//! ## Architecture
//!
//! - **Priority**: named rank (lower is more urgent) with an optional aging timeslice
//! - **Queue**: per-rank FIFO buckets; a periodic sweep promotes long-waiting entries
//! - **Job**: unit of work that runs once and broadcasts its result to every waiter
//! - **JobResult**: error slot plus typed key/value outputs
//! - **Scheduler**: worker pool driving the queue, with a completion hook
//! - **Cancellation**: tokens with explicit cancel and optional deadline
//! - **Telemetry**: structured logging and Prometheus metrics

pub mod cancel;
pub mod config;
pub mod error;
pub mod job;
pub mod priority;
pub mod queue;
pub mod result;
pub mod scheduler;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorSeverity, Result, SchedulerError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cancel::{CancelToken, StopReason};
    pub use crate::config::{Config, PriorityConfig, SchedulerConfig};
    pub use crate::error::{ErrorCode, ErrorContext, ErrorSeverity, Result, SchedulerError};
    pub use crate::job::{Job, JobId, JobStatus};
    pub use crate::priority::{Aging, Priority};
    pub use crate::queue::{AgingPriorityQueue, QueueStats, QueuedEntry};
    pub use crate::result::{JobError, JobResult};
    pub use crate::scheduler::{CompletedJob, CompletionHook, Scheduler, SchedulerStats};
}
