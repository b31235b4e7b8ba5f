// Copyright 2025 Cowboy AI, LLC.

//! Schema version registry and migration graph
//!
//! The registry holds, per event type, every registered payload schema and
//! the migrations connecting them. Migrations form a directed graph over
//! versions; [`VersionRegistry::migration_path`] finds the shortest chain
//! between two versions with a breadth-first search, so the fewest
//! transforms run on each upcast.
//!
//! Registration happens at startup; lookups run concurrently afterwards.
//! The registry takes its lock exclusively on register and shared on lookup.

use crate::schema::EventSchema;
use crate::version::SchemaVersion;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Transform function applied to a payload when crossing one migration edge
pub type TransformFn =
    Box<dyn Fn(&serde_json::Value) -> Result<serde_json::Value, TransformError> + Send + Sync>;

/// Failure inside a migration transform
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransformError(pub String);

impl TransformError {
    /// Create a transform error from any displayable reason
    pub fn new(reason: impl fmt::Display) -> Self {
        Self(reason.to_string())
    }
}

/// Errors from registry operations
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// A schema already exists for the `(event_type, version)` pair
    #[error("schema already registered for {event_type} {version}")]
    SchemaAlreadyRegistered {
        /// Event type of the duplicate
        event_type: String,
        /// Version of the duplicate
        version: SchemaVersion,
    },

    /// No schema registered for the `(event_type, version)` pair
    #[error("no schema registered for {event_type} {version}")]
    SchemaNotFound {
        /// Event type looked up
        event_type: String,
        /// Version looked up
        version: SchemaVersion,
    },

    /// No schemas registered for the event type at all
    #[error("event type not registered: {0}")]
    EventTypeNotRegistered(String),

    /// A migration endpoint has no registered schema
    #[error("cannot register migration for {event_type}: no schema at {version}")]
    MigrationEndpointMissing {
        /// Event type of the migration
        event_type: String,
        /// The endpoint version lacking a schema
        version: SchemaVersion,
    },

    /// No chain of migrations connects the two versions
    #[error("no migration path for {event_type} from {from} to {to}")]
    NoMigrationPath {
        /// Event type searched
        event_type: String,
        /// Start version
        from: SchemaVersion,
        /// Target version
        to: SchemaVersion,
    },
}

/// A directed edge in the version graph of one event type
///
/// The transform converts a payload shaped as `from_version` into one shaped
/// as `to_version`. An inverse transform may be declared for downcasting;
/// without one the edge is only traversable forward.
pub struct Migration {
    /// Event type this migration applies to
    pub event_type: String,
    /// Source schema version
    pub from_version: SchemaVersion,
    /// Target schema version
    pub to_version: SchemaVersion,
    /// Human-readable description of the payload change
    pub description: String,
    transform: TransformFn,
    inverse: Option<TransformFn>,
}

impl Migration {
    /// Create a migration with its forward transform
    pub fn new<F>(
        event_type: impl Into<String>,
        from_version: SchemaVersion,
        to_version: SchemaVersion,
        description: impl Into<String>,
        transform: F,
    ) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<serde_json::Value, TransformError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            event_type: event_type.into(),
            from_version,
            to_version,
            description: description.into(),
            transform: Box::new(transform),
            inverse: None,
        }
    }

    /// Declare the inverse transform, enabling downcasts across this edge
    pub fn with_inverse<F>(mut self, inverse: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<serde_json::Value, TransformError>
            + Send
            + Sync
            + 'static,
    {
        self.inverse = Some(Box::new(inverse));
        self
    }

    /// Apply the forward transform
    pub fn apply(&self, payload: &serde_json::Value) -> Result<serde_json::Value, TransformError> {
        (self.transform)(payload)
    }

    /// Whether an inverse transform was declared
    pub fn is_invertible(&self) -> bool {
        self.inverse.is_some()
    }

    /// Apply the inverse transform; errors when none was declared
    pub fn apply_inverse(
        &self,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, TransformError> {
        match &self.inverse {
            Some(inverse) => inverse(payload),
            None => Err(TransformError::new(format!(
                "migration {} -> {} has no inverse",
                self.from_version, self.to_version
            ))),
        }
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("event_type", &self.event_type)
            .field("from_version", &self.from_version)
            .field("to_version", &self.to_version)
            .field("description", &self.description)
            .field("invertible", &self.is_invertible())
            .finish()
    }
}

#[derive(Default)]
struct TypeEntry {
    // BTreeMap keeps schemas ordered by version; the maximum key is the
    // current version, so the invariant cannot drift.
    schemas: BTreeMap<SchemaVersion, EventSchema>,
    migrations: Vec<Arc<Migration>>,
}

/// Registry of schemas and migrations, keyed by event type
///
/// Constructed explicitly by whoever assembles the event-bus stack and
/// shared by reference; there is no ambient singleton.
#[derive(Default)]
pub struct VersionRegistry {
    inner: RwLock<HashMap<String, TypeEntry>>,
}

impl VersionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema; fails if the `(event_type, version)` pair exists
    pub fn register_schema(&self, schema: EventSchema) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let entry = inner.entry(schema.event_type.clone()).or_default();
        if entry.schemas.contains_key(&schema.version) {
            return Err(RegistryError::SchemaAlreadyRegistered {
                event_type: schema.event_type,
                version: schema.version,
            });
        }
        tracing::debug!(
            event_type = %schema.event_type,
            version = %schema.version,
            "registered schema"
        );
        entry.schemas.insert(schema.version, schema);
        Ok(())
    }

    /// Get the schema for an exact `(event_type, version)` pair
    pub fn get_schema(
        &self,
        event_type: &str,
        version: SchemaVersion,
    ) -> Result<EventSchema, RegistryError> {
        let inner = self.inner.read();
        inner
            .get(event_type)
            .and_then(|entry| entry.schemas.get(&version))
            .cloned()
            .ok_or_else(|| RegistryError::SchemaNotFound {
                event_type: event_type.to_string(),
                version,
            })
    }

    /// Get the schema at the event type's current (highest) version
    pub fn get_current_schema(&self, event_type: &str) -> Result<EventSchema, RegistryError> {
        let inner = self.inner.read();
        inner
            .get(event_type)
            .and_then(|entry| entry.schemas.last_key_value())
            .map(|(_, schema)| schema.clone())
            .ok_or_else(|| RegistryError::EventTypeNotRegistered(event_type.to_string()))
    }

    /// Get the event type's current version: the maximum registered version
    pub fn get_current_version(&self, event_type: &str) -> Result<SchemaVersion, RegistryError> {
        let inner = self.inner.read();
        inner
            .get(event_type)
            .and_then(|entry| entry.schemas.last_key_value())
            .map(|(version, _)| *version)
            .ok_or_else(|| RegistryError::EventTypeNotRegistered(event_type.to_string()))
    }

    /// All schemas for an event type, ascending by version
    pub fn list_schemas(&self, event_type: &str) -> Vec<EventSchema> {
        let inner = self.inner.read();
        inner
            .get(event_type)
            .map(|entry| entry.schemas.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Register a migration; both endpoint versions must have schemas
    pub fn register_migration(&self, migration: Migration) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let entry = inner
            .get_mut(&migration.event_type)
            .ok_or_else(|| RegistryError::MigrationEndpointMissing {
                event_type: migration.event_type.clone(),
                version: migration.from_version,
            })?;
        for endpoint in [migration.from_version, migration.to_version] {
            if !entry.schemas.contains_key(&endpoint) {
                return Err(RegistryError::MigrationEndpointMissing {
                    event_type: migration.event_type.clone(),
                    version: endpoint,
                });
            }
        }
        tracing::debug!(
            event_type = %migration.event_type,
            from = %migration.from_version,
            to = %migration.to_version,
            "registered migration"
        );
        entry.migrations.push(Arc::new(migration));
        entry
            .migrations
            .sort_by_key(|m| (m.from_version, m.to_version));
        Ok(())
    }

    /// Shortest migration chain from `from` to `to` for an event type
    ///
    /// Breadth-first search over the directed version graph, so the returned
    /// path has the fewest hops and cumulative transform drift is minimal.
    /// `from == to` yields an empty path.
    pub fn migration_path(
        &self,
        event_type: &str,
        from: SchemaVersion,
        to: SchemaVersion,
    ) -> Result<Vec<Arc<Migration>>, RegistryError> {
        if from == to {
            return Ok(Vec::new());
        }

        let inner = self.inner.read();
        let entry = inner
            .get(event_type)
            .ok_or_else(|| RegistryError::EventTypeNotRegistered(event_type.to_string()))?;

        let mut visited: HashSet<SchemaVersion> = HashSet::from([from]);
        let mut queue: VecDeque<SchemaVersion> = VecDeque::from([from]);
        // Edge taken to first reach each version, for path reconstruction.
        let mut arrived_by: HashMap<SchemaVersion, Arc<Migration>> = HashMap::new();

        while let Some(version) = queue.pop_front() {
            for migration in entry.migrations.iter().filter(|m| m.from_version == version) {
                if !visited.insert(migration.to_version) {
                    continue;
                }
                arrived_by.insert(migration.to_version, Arc::clone(migration));
                if migration.to_version == to {
                    let mut path = Vec::new();
                    let mut cursor = to;
                    while cursor != from {
                        let edge = &arrived_by[&cursor];
                        cursor = edge.from_version;
                        path.push(Arc::clone(edge));
                    }
                    path.reverse();
                    return Ok(path);
                }
                queue.push_back(migration.to_version);
            }
        }

        Err(RegistryError::NoMigrationPath {
            event_type: event_type.to_string(),
            from,
            to,
        })
    }
}

impl fmt::Debug for VersionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        let mut map = f.debug_map();
        for (event_type, entry) in inner.iter() {
            map.entry(
                event_type,
                &format_args!(
                    "{} schemas, {} migrations",
                    entry.schemas.len(),
                    entry.migrations.len()
                ),
            );
        }
        map.finish()
    }
}
