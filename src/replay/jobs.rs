// Copyright 2025 Cowboy AI, LLC.

//! Asynchronous replay jobs
//!
//! Runs replays as cancellable, inspectable jobs. A job is created pending,
//! started exactly once, and terminates in exactly one of completed, failed,
//! or cancelled. The manager owns the job records and their cancellation
//! tokens; mid-flight counts are visible through `get_job` while a run is
//! in progress.

use crate::replay::replayer::{
    EventReplayer, ReplayConfig, ReplayObserver, ReplayProgress, ReplayResult,
};
use crate::replay::CancellationToken;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Lifecycle states of a replay job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created but not yet started
    Pending,
    /// Replay task in flight
    Running,
    /// Replay finished without a terminal error
    Completed,
    /// Replay aborted on an error
    Failed,
    /// Replay observed its cancellation token
    Cancelled,
}

impl JobStatus {
    /// Whether the job can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// One replay run managed as an asynchronous job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayJob {
    /// Job identifier
    pub id: Uuid,
    /// The replay request this job runs
    pub config: ReplayConfig,
    /// Current lifecycle state
    pub status: JobStatus,
    /// Result counts; live while running, final once terminal
    pub result: Option<ReplayResult>,
    /// Terminal error message for failed jobs
    pub error: Option<String>,
    /// When the job record was created
    pub created_at: DateTime<Utc>,
    /// When the job transitioned to running
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state
    pub ended_at: Option<DateTime<Utc>>,
}

/// Errors from job lifecycle operations
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// No job with that id
    #[error("replay job {0} not found")]
    NotFound(Uuid),

    /// Job was started more than once
    #[error("replay job {id} cannot start from {status:?}")]
    NotPending {
        /// Job id
        id: Uuid,
        /// State the job was actually in
        status: JobStatus,
    },

    /// Cancel requested for a job that is not running
    #[error("replay job {id} is not running (status {status:?})")]
    NotRunning {
        /// Job id
        id: Uuid,
        /// State the job was actually in
        status: JobStatus,
    },

    /// Delete requested for a job that is still running
    #[error("replay job {0} is still running")]
    StillRunning(Uuid),
}

struct JobEntry {
    job: ReplayJob,
    cancel: Option<CancellationToken>,
}

/// Runs replays asynchronously as cancellable, inspectable jobs
pub struct ReplayJobManager {
    replayer: Arc<EventReplayer>,
    jobs: Arc<RwLock<HashMap<Uuid, JobEntry>>>,
}

impl ReplayJobManager {
    /// Create a manager over a replayer
    pub fn new(replayer: Arc<EventReplayer>) -> Self {
        Self {
            replayer,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store a new pending job and return its id
    pub fn create_job(&self, config: ReplayConfig) -> Uuid {
        let id = Uuid::new_v4();
        let job = ReplayJob {
            id,
            config,
            status: JobStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        };
        self.jobs.write().insert(id, JobEntry { job, cancel: None });
        info!(job_id = %id, "created replay job");
        id
    }

    /// Start a pending job; starting twice is an error
    pub fn start_job(&self, id: Uuid) -> Result<(), JobError> {
        let (config, cancel) = {
            let mut jobs = self.jobs.write();
            let entry = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
            if entry.job.status != JobStatus::Pending {
                return Err(JobError::NotPending {
                    id,
                    status: entry.job.status,
                });
            }
            entry.job.status = JobStatus::Running;
            entry.job.started_at = Some(Utc::now());
            // Each job gets its own token; cancelling one never affects another.
            let cancel = CancellationToken::new();
            entry.cancel = Some(cancel.clone());
            (entry.job.config.clone(), cancel)
        };

        let replayer = Arc::clone(&self.replayer);
        let jobs = Arc::clone(&self.jobs);
        tokio::spawn(async move {
            let observer = JobObserver {
                jobs: Arc::clone(&jobs),
                id,
            };
            let outcome = replayer.replay_observed(&cancel, &config, &observer).await;

            let mut jobs = jobs.write();
            let Some(entry) = jobs.get_mut(&id) else {
                warn!(job_id = %id, "job record vanished before completion");
                return;
            };
            match outcome {
                Ok(result) => {
                    entry.job.status = JobStatus::Completed;
                    entry.job.result = Some(result);
                    info!(job_id = %id, "replay job completed");
                }
                Err(err) => {
                    if err.is_cancelled() {
                        entry.job.status = JobStatus::Cancelled;
                        info!(job_id = %id, "replay job cancelled");
                    } else {
                        entry.job.status = JobStatus::Failed;
                        entry.job.error = Some(err.to_string());
                        warn!(job_id = %id, error = %err, "replay job failed");
                    }
                    entry.job.result = Some(err.into_partial_result());
                }
            }
            entry.job.ended_at = Some(Utc::now());
            entry.cancel = None;
        });

        Ok(())
    }

    /// Cancel a running job via its stored token
    pub fn cancel_job(&self, id: Uuid) -> Result<(), JobError> {
        let jobs = self.jobs.read();
        let entry = jobs.get(&id).ok_or(JobError::NotFound(id))?;
        if entry.job.status != JobStatus::Running {
            return Err(JobError::NotRunning {
                id,
                status: entry.job.status,
            });
        }
        if let Some(cancel) = &entry.cancel {
            cancel.cancel();
        }
        info!(job_id = %id, "cancellation requested");
        Ok(())
    }

    /// A snapshot of the job record
    pub fn get_job(&self, id: Uuid) -> Option<ReplayJob> {
        self.jobs.read().get(&id).map(|entry| entry.job.clone())
    }

    /// Snapshots of all job records
    pub fn list_jobs(&self) -> Vec<ReplayJob> {
        self.jobs
            .read()
            .values()
            .map(|entry| entry.job.clone())
            .collect()
    }

    /// Remove a job record; refuses while the job is running
    pub fn delete_job(&self, id: Uuid) -> Result<(), JobError> {
        let mut jobs = self.jobs.write();
        let entry = jobs.get(&id).ok_or(JobError::NotFound(id))?;
        if entry.job.status == JobStatus::Running {
            return Err(JobError::StillRunning(id));
        }
        jobs.remove(&id);
        Ok(())
    }
}

/// Writes mid-flight counts back onto the job record
struct JobObserver {
    jobs: Arc<RwLock<HashMap<Uuid, JobEntry>>>,
    id: Uuid,
}

impl ReplayObserver for JobObserver {
    fn on_progress(&self, progress: &ReplayProgress) {
        let mut jobs = self.jobs.write();
        if let Some(entry) = jobs.get_mut(&self.id) {
            let result = entry.job.result.get_or_insert_with(ReplayResult::default);
            result.total_events = progress.total_events;
            result.processed_count = progress.processed_count;
            result.skipped_count = progress.skipped_count;
            result.success_count = progress.success_count;
            result.error_count = progress.error_count;
        }
    }
}
