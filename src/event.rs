// Copyright 2025 Cowboy AI, LLC.

//! The wire-level event envelope and the handler contract
//!
//! Events are immutable facts once published. The `version` field is the
//! aggregate's business version, independent of the payload schema version
//! tracked by the versioning layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Error type returned by event handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A domain event as carried on the wire and in the event store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier
    pub id: Uuid,

    /// Event type name, also the broker routing key
    pub event_type: String,

    /// Tenant the event belongs to
    pub tenant_id: String,

    /// Aggregate the event was emitted by
    pub aggregate_id: String,

    /// Aggregate (business) version, independent of the schema version
    pub version: u64,

    /// When the event occurred
    pub timestamp: DateTime<Utc>,

    /// Opaque event payload
    pub data: serde_json::Value,

    /// String metadata; may be enriched before publish (e.g. `schema_version`)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Create a new event with a fresh id and the current timestamp
    pub fn new(
        event_type: impl Into<String>,
        tenant_id: impl Into<String>,
        aggregate_id: impl Into<String>,
        version: u64,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            tenant_id: tenant_id.into(),
            aggregate_id: aggregate_id.into(),
            version,
            timestamp: Utc::now(),
            data,
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry, returning the event for chaining
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Contract for consuming events, during live subscription or replay
///
/// Delivery is at-least-once: implementations must tolerate seeing the same
/// event more than once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle a single event
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

/// Adapter that turns a plain closure into an [`EventHandler`]
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync,
{
    /// Wrap a synchronous closure as a handler
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        (self.0)(event)
    }
}
