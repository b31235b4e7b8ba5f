//! Event store and snapshot store contracts
//!
//! Both stores are external collaborators consumed by the replay engine;
//! their storage engines live elsewhere. The in-memory implementations here
//! back tests and embedded use.

use crate::event::Event;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors from event or snapshot store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Failed to serialize or deserialize stored data
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General storage operation failure
    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable event store contract
///
/// Reads must be monotonic and stable (ordered by timestamp, then id) so
/// that offset pagination never skips or duplicates events across page
/// boundaries.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist a single event
    async fn save(&self, event: Event) -> Result<(), StoreError>;

    /// Persist a batch of events
    async fn save_batch(&self, events: Vec<Event>) -> Result<(), StoreError>;

    /// Fetch one event by id
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Event>, StoreError>;

    /// All events for an aggregate, in order
    async fn get_by_aggregate_id(&self, aggregate_id: &str) -> Result<Vec<Event>, StoreError>;

    /// Events of one type, up to `limit`
    async fn get_by_type(&self, event_type: &str, limit: usize) -> Result<Vec<Event>, StoreError>;

    /// Events within `[start, end]`, up to `limit`
    async fn get_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError>;

    /// Events for one tenant, up to `limit`
    async fn get_by_tenant(&self, tenant_id: &str, limit: usize) -> Result<Vec<Event>, StoreError>;

    /// Offset-paginated scan over all events
    async fn get_all(&self, offset: usize, limit: usize) -> Result<Vec<Event>, StoreError>;

    /// Total number of stored events
    async fn count(&self) -> Result<u64, StoreError>;

    /// Number of stored events of one type
    async fn count_by_type(&self, event_type: &str) -> Result<u64, StoreError>;
}

/// An aggregate's materialized state at a given event version
///
/// Replaying from a snapshot skips every event the snapshot already encodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique snapshot identifier
    pub id: Uuid,
    /// Aggregate this snapshot belongs to
    pub aggregate_id: String,
    /// Aggregate version the state was materialized at
    pub version: u64,
    /// Opaque serialized state
    pub state: serde_json::Value,
    /// When the snapshot was taken
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Create a snapshot of an aggregate's state at a version
    pub fn new(aggregate_id: impl Into<String>, version: u64, state: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_id: aggregate_id.into(),
            version,
            state,
            created_at: Utc::now(),
        }
    }
}

/// Snapshot store contract
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a snapshot
    async fn save(&self, snapshot: Snapshot) -> Result<(), StoreError>;

    /// The highest-version snapshot for an aggregate
    async fn get_latest(&self, aggregate_id: &str) -> Result<Option<Snapshot>, StoreError>;

    /// The snapshot at an exact version
    async fn get_by_version(
        &self,
        aggregate_id: &str,
        version: u64,
    ) -> Result<Option<Snapshot>, StoreError>;

    /// Delete an aggregate's snapshots older than `before_version`
    async fn delete(&self, aggregate_id: &str, before_version: u64) -> Result<(), StoreError>;
}

/// In-memory event store
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<Event>>>,
}

impl InMemoryEventStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    async fn sorted(&self) -> Vec<Event> {
        let events = self.events.read().await;
        let mut sorted = events.clone();
        // Stable pagination order: timestamp, then id as tiebreaker.
        sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        sorted
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save(&self, event: Event) -> Result<(), StoreError> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn save_batch(&self, events: Vec<Event>) -> Result<(), StoreError> {
        self.events.write().await.extend(events);
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        let events = self.events.read().await;
        Ok(events.iter().find(|e| e.id == id).cloned())
    }

    async fn get_by_aggregate_id(&self, aggregate_id: &str) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .sorted()
            .await
            .into_iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .collect())
    }

    async fn get_by_type(&self, event_type: &str, limit: usize) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .sorted()
            .await
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .take(limit)
            .collect())
    }

    async fn get_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .sorted()
            .await
            .into_iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .take(limit)
            .collect())
    }

    async fn get_by_tenant(&self, tenant_id: &str, limit: usize) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .sorted()
            .await
            .into_iter()
            .filter(|e| e.tenant_id == tenant_id)
            .take(limit)
            .collect())
    }

    async fn get_all(&self, offset: usize, limit: usize) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .sorted()
            .await
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.events.read().await.len() as u64)
    }

    async fn count_by_type(&self, event_type: &str) -> Result<u64, StoreError> {
        let events = self.events.read().await;
        Ok(events.iter().filter(|e| e.event_type == event_type).count() as u64)
    }
}

/// In-memory snapshot store
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<String, Vec<Snapshot>>>>,
}

impl InMemorySnapshotStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        let mut snapshots = self.snapshots.write().await;
        let entry = snapshots.entry(snapshot.aggregate_id.clone()).or_default();
        entry.push(snapshot);
        entry.sort_by_key(|s| s.version);
        Ok(())
    }

    async fn get_latest(&self, aggregate_id: &str) -> Result<Option<Snapshot>, StoreError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(aggregate_id)
            .and_then(|entry| entry.last())
            .cloned())
    }

    async fn get_by_version(
        &self,
        aggregate_id: &str,
        version: u64,
    ) -> Result<Option<Snapshot>, StoreError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(aggregate_id)
            .and_then(|entry| entry.iter().find(|s| s.version == version))
            .cloned())
    }

    async fn delete(&self, aggregate_id: &str, before_version: u64) -> Result<(), StoreError> {
        let mut snapshots = self.snapshots.write().await;
        if let Some(entry) = snapshots.get_mut(aggregate_id) {
            entry.retain(|s| s.version >= before_version);
        }
        Ok(())
    }
}
