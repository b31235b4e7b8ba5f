// Copyright 2025 Cowboy AI, LLC.

//! Snapshot-accelerated replay
//!
//! Rebuilds an aggregate by applying its latest snapshot first, then only
//! the events the snapshot does not already encode. A missing snapshot is
//! non-fatal; the replay falls back to the aggregate's full history.

use crate::event::{Event, HandlerError};
use crate::store::{EventStore, Snapshot, SnapshotStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Errors from snapshot-based replay
#[derive(Debug, Error)]
pub enum SnapshotReplayError {
    /// The event or snapshot store failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The snapshot application callback failed
    #[error("applying snapshot failed: {0}")]
    SnapshotApply(String),

    /// An event application callback failed
    #[error("applying event {event_id} failed: {reason}")]
    EventApply {
        /// Id of the event whose application failed
        event_id: Uuid,
        /// Callback error message
        reason: String,
    },
}

/// Outcome of a snapshot-based replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotReplaySummary {
    /// Version of the snapshot applied, if one existed
    pub snapshot_version: Option<u64>,
    /// Events applied on top of the snapshot
    pub events_applied: u64,
}

/// Replays aggregates starting from their latest snapshot
pub struct SnapshotReplayer {
    event_store: Arc<dyn EventStore>,
    snapshot_store: Arc<dyn SnapshotStore>,
}

impl SnapshotReplayer {
    /// Create a replayer over an event store and a snapshot store
    pub fn new(event_store: Arc<dyn EventStore>, snapshot_store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            event_store,
            snapshot_store,
        }
    }

    /// Rebuild an aggregate: snapshot first, then the events past it
    ///
    /// `apply_snapshot` runs at most once, before any event. `apply_event`
    /// runs only for events at or past `snapshot.version + 1`.
    pub async fn replay_from_snapshot<S, E>(
        &self,
        aggregate_id: &str,
        mut apply_snapshot: S,
        mut apply_event: E,
    ) -> Result<SnapshotReplaySummary, SnapshotReplayError>
    where
        S: FnMut(&Snapshot) -> Result<(), HandlerError>,
        E: FnMut(&Event) -> Result<(), HandlerError>,
    {
        let snapshot = self.snapshot_store.get_latest(aggregate_id).await?;

        let (snapshot_version, start_version) = match &snapshot {
            Some(snapshot) => {
                apply_snapshot(snapshot)
                    .map_err(|err| SnapshotReplayError::SnapshotApply(err.to_string()))?;
                debug!(
                    aggregate_id = %aggregate_id,
                    version = snapshot.version,
                    "applied snapshot"
                );
                (Some(snapshot.version), snapshot.version + 1)
            }
            None => {
                debug!(aggregate_id = %aggregate_id, "no snapshot, replaying full history");
                (None, 0)
            }
        };

        let events = self.event_store.get_by_aggregate_id(aggregate_id).await?;
        let mut events_applied = 0u64;
        for event in events.iter().filter(|e| e.version >= start_version) {
            apply_event(event).map_err(|err| SnapshotReplayError::EventApply {
                event_id: event.id,
                reason: err.to_string(),
            })?;
            events_applied += 1;
        }

        info!(
            aggregate_id = %aggregate_id,
            snapshot_version = ?snapshot_version,
            events_applied,
            "snapshot replay complete"
        );
        Ok(SnapshotReplaySummary {
            snapshot_version,
            events_applied,
        })
    }
}
