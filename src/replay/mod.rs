// Copyright 2025 Cowboy AI, LLC.

//! Replay layer
//!
//! Re-drives registered handlers over historical events from the event
//! store:
//! - Synchronous replay runs with filtering, progress, and cancellation
//! - Asynchronous, cancellable replay jobs
//! - Snapshot-accelerated aggregate rebuilds

pub mod cancellation;
pub mod jobs;
pub mod replayer;
pub mod snapshot;

pub use cancellation::CancellationToken;
pub use jobs::{JobError, JobStatus, ReplayJob, ReplayJobManager};
pub use replayer::{
    EventReplayer, ReplayConfig, ReplayError, ReplayEventError, ReplayObserver, ReplayProgress,
    ReplayResult,
};
pub use snapshot::{SnapshotReplayError, SnapshotReplaySummary, SnapshotReplayer};
