// Copyright 2025 Cowboy AI, LLC.

//! # Eventflow
//!
//! Event infrastructure for propagating domain events between services:
//!
//! - **Event model**: the wire-level [`Event`] envelope and the
//!   [`SchemaVersion`] type payload schemas evolve under
//! - **Version registry**: per-type schemas and the migration graph
//!   connecting them, with shortest-path search between versions
//! - **Event versioner**: upcasts and downcasts single events along
//!   registry migration paths, and validates payloads against schemas
//! - **Broker event bus**: publish/subscribe over a durable AMQP broker
//!   with automatic reconnection and consumer restoration
//! - **Versioned event bus**: decorator stamping the current schema version
//!   on publish and upcasting on delivery
//! - **Replay**: re-drives registered handlers over historical events, as
//!   direct runs or as cancellable jobs, optionally fast-forwarded from the
//!   latest aggregate snapshot
//!
//! Delivery is at-least-once end to end; handlers must be idempotent.
//! Exactly-once delivery and broker federation are explicitly out of scope.
//!
//! ## Design Principles
//!
//! 1. **Explicit wiring**: the registry, versioner, and buses are plain
//!    constructed objects passed by reference; no ambient singletons
//! 2. **Schema evolution without flag days**: old consumers keep working
//!    through migration paths, not coordinated deployments
//! 3. **Resilience over ceremony**: connection loss recovers transparently;
//!    poison messages dead-letter instead of wedging a queue
//! 4. **Observable recovery**: replay runs report per-event progress and
//!    record every handler failure with the offending event's identity

#![warn(missing_docs)]

mod event;
mod schema;
mod version;

pub mod bus;
pub mod registry;
pub mod replay;
pub mod store;
pub mod versioning;

// Re-export core types
pub use bus::{
    BusConfig, BusError, ConnectionState, EventBus, InMemoryEventBus, RabbitEventBus,
    VersionedEventBus,
};
pub use event::{Event, EventHandler, FnHandler, HandlerError};
pub use registry::{Migration, RegistryError, TransformError, TransformFn, VersionRegistry};
pub use replay::{
    CancellationToken, EventReplayer, JobError, JobStatus, ReplayConfig, ReplayError,
    ReplayEventError, ReplayJob, ReplayJobManager, ReplayObserver, ReplayProgress, ReplayResult,
    SnapshotReplayError, SnapshotReplaySummary, SnapshotReplayer,
};
pub use schema::{EventSchema, FieldType, SchemaField};
pub use store::{
    EventStore, InMemoryEventStore, InMemorySnapshotStore, Snapshot, SnapshotStore, StoreError,
};
pub use version::{SchemaVersion, VersionParseError};
pub use versioning::{EventVersioner, VersionedEvent, VersioningError, SCHEMA_VERSION_KEY};
