// Copyright 2025 Cowboy AI, LLC.

//! Event bus layer
//!
//! This module contains the publish/subscribe surface:
//! - The [`EventBus`] contract
//! - AMQP broker implementation with reconnection and consumer restoration
//! - In-memory implementation for tests and embedded use
//! - Version-aware decorator that stamps and upcasts events transparently

use crate::event::{Event, EventHandler};
use crate::versioning::VersioningError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub mod config;
pub mod memory;
pub mod rabbit;
pub mod versioned;

pub use config::BusConfig;
pub use memory::InMemoryEventBus;
pub use rabbit::{ConnectionState, RabbitEventBus};
pub use versioned::VersionedEventBus;

/// Errors from event bus operations
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus has been closed; no further operations are possible
    #[error("event bus is closed")]
    Closed,

    /// No live channel to the broker (disconnected or mid-reconnect)
    #[error("no live channel to the broker")]
    NotConnected,

    /// Error from the underlying broker client
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// A specific event failed to publish
    #[error("failed to publish event {event_id}: {reason}")]
    PublishFailed {
        /// Id of the event that failed
        event_id: Uuid,
        /// Why it failed
        reason: String,
    },

    /// Failed to serialize an event for the wire
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Version stamping or validation rejected the event
    #[error(transparent)]
    Versioning(#[from] VersioningError),
}

/// Publish/subscribe contract for domain events
///
/// Delivery is at-least-once; handlers must be idempotent. Subscriptions
/// outlive the `subscribe` call and are stopped by `unsubscribe` or `close`.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a single event
    async fn publish(&self, event: Event) -> Result<(), BusError>;

    /// Publish events sequentially, failing fast on the first error
    async fn publish_batch(&self, events: Vec<Event>) -> Result<(), BusError>;

    /// Subscribe a handler to one or more event types
    async fn subscribe(
        &self,
        event_types: Vec<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BusError>;

    /// Stop all active subscriptions
    async fn unsubscribe(&self) -> Result<(), BusError>;

    /// Close the bus; subsequent publishes and subscribes fail
    async fn close(&self) -> Result<(), BusError>;
}
