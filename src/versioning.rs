// Copyright 2025 Cowboy AI, LLC.

//! Event versioning: stamping, upcasting, downcasting, and validation
//!
//! The versioner reconciles events with the registry's current schema
//! version for their type. Consumers behind a [`crate::bus::VersionedEventBus`]
//! only ever see payloads at the current version.

use crate::event::Event;
use crate::registry::{RegistryError, VersionRegistry};
use crate::schema::FieldType;
use crate::version::SchemaVersion;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Metadata key carrying the schema version on published events
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// An event paired with the schema version it was produced or consumed at
///
/// Two events with identical payloads but different schema versions are
/// distinct until reconciled by an upcast or downcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedEvent {
    /// The underlying event
    pub event: Event,
    /// Schema version of the payload
    pub schema_version: SchemaVersion,
}

/// Errors from versioning operations
#[derive(Debug, Error)]
pub enum VersioningError {
    /// Registry lookup or path search failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A migration transform failed mid-path
    #[error("migration {from} -> {to} failed for {event_type}: {reason}")]
    MigrationFailed {
        /// Event type being migrated
        event_type: String,
        /// Source version of the failing migration
        from: SchemaVersion,
        /// Target version of the failing migration
        to: SchemaVersion,
        /// Underlying transform failure
        reason: String,
    },

    /// A downcast crossed a migration that declared no inverse
    #[error("migration {from} -> {to} for {event_type} declares no inverse")]
    NotInvertible {
        /// Event type being downcast
        event_type: String,
        /// Source version of the non-invertible migration
        from: SchemaVersion,
        /// Target version of the non-invertible migration
        to: SchemaVersion,
    },

    /// Downcast target is newer than the event's version
    #[error("downcast target {target} is not older than event version {current}")]
    InvalidDowncastTarget {
        /// Version the event is currently at
        current: SchemaVersion,
        /// Requested target version
        target: SchemaVersion,
    },

    /// Payload is not a JSON object and cannot be validated
    #[error("payload of {0} is not a JSON object")]
    PayloadNotObject(String),

    /// A required schema field is absent from the payload
    #[error("required field `{field}` missing from {event_type} payload")]
    MissingRequiredField {
        /// Event type validated
        event_type: String,
        /// Name of the missing field
        field: String,
    },

    /// A present field does not match its declared type
    #[error("field `{field}` of {event_type} is not of type {expected}")]
    FieldTypeMismatch {
        /// Event type validated
        event_type: String,
        /// Name of the mismatched field
        field: String,
        /// Declared field type
        expected: FieldType,
    },
}

/// Upcasts and downcasts single events using paths from the registry
pub struct EventVersioner {
    registry: Arc<VersionRegistry>,
}

impl EventVersioner {
    /// Create a versioner over a shared registry
    pub fn new(registry: Arc<VersionRegistry>) -> Self {
        Self { registry }
    }

    /// The registry backing this versioner
    pub fn registry(&self) -> &Arc<VersionRegistry> {
        &self.registry
    }

    /// Stamp an event with its type's current registry version
    ///
    /// Types with no registered schema default to `1.0.0`, so unversioned
    /// producers keep working once a schema appears later.
    pub fn stamp(&self, event: Event) -> VersionedEvent {
        let schema_version = self
            .registry
            .get_current_version(&event.event_type)
            .unwrap_or_else(|_| SchemaVersion::initial());
        VersionedEvent {
            event,
            schema_version,
        }
    }

    /// Upcast an event to its type's current schema version
    ///
    /// No-op when the event is already at or above the current version, or
    /// when the type has no registered schema. A transform failure aborts
    /// the whole upcast, naming the failing migration's endpoints.
    pub fn upcast(&self, event: VersionedEvent) -> Result<VersionedEvent, VersioningError> {
        let current = match self.registry.get_current_version(&event.event.event_type) {
            Ok(current) => current,
            // Unversioned types pass through unchanged.
            Err(RegistryError::EventTypeNotRegistered(_)) => return Ok(event),
            Err(err) => return Err(err.into()),
        };
        if event.schema_version >= current {
            return Ok(event);
        }

        let path =
            self.registry
                .migration_path(&event.event.event_type, event.schema_version, current)?;

        let mut data = event.event.data.clone();
        for migration in &path {
            data = migration
                .apply(&data)
                .map_err(|err| VersioningError::MigrationFailed {
                    event_type: event.event.event_type.clone(),
                    from: migration.from_version,
                    to: migration.to_version,
                    reason: err.to_string(),
                })?;
        }

        let mut upcast = event.event;
        upcast.data = data;
        Ok(VersionedEvent {
            event: upcast,
            schema_version: current,
        })
    }

    /// Downcast an event to the version a legacy consumer expects
    ///
    /// Prefers a directly registered downgrade path through the version
    /// graph. When none exists, takes the forward upgrade path
    /// `target -> event.version` and applies each migration's declared
    /// inverse in reverse order; any non-invertible migration on that path
    /// fails the downcast.
    pub fn downcast(
        &self,
        event: VersionedEvent,
        target: SchemaVersion,
    ) -> Result<VersionedEvent, VersioningError> {
        if event.schema_version == target {
            return Ok(event);
        }
        if target > event.schema_version {
            return Err(VersioningError::InvalidDowncastTarget {
                current: event.schema_version,
                target,
            });
        }

        let event_type = event.event.event_type.clone();
        let mut data = event.event.data.clone();

        match self
            .registry
            .migration_path(&event_type, event.schema_version, target)
        {
            Ok(path) => {
                // Explicit downgrade migrations exist; run them forward.
                for migration in &path {
                    data = migration
                        .apply(&data)
                        .map_err(|err| VersioningError::MigrationFailed {
                            event_type: event_type.clone(),
                            from: migration.from_version,
                            to: migration.to_version,
                            reason: err.to_string(),
                        })?;
                }
            }
            Err(RegistryError::NoMigrationPath { .. }) => {
                let upgrade_path =
                    self.registry
                        .migration_path(&event_type, target, event.schema_version)?;
                if let Some(blocked) = upgrade_path.iter().find(|m| !m.is_invertible()) {
                    return Err(VersioningError::NotInvertible {
                        event_type,
                        from: blocked.from_version,
                        to: blocked.to_version,
                    });
                }
                for migration in upgrade_path.iter().rev() {
                    data = migration.apply_inverse(&data).map_err(|err| {
                        VersioningError::MigrationFailed {
                            event_type: event_type.clone(),
                            from: migration.to_version,
                            to: migration.from_version,
                            reason: err.to_string(),
                        }
                    })?;
                }
            }
            Err(err) => return Err(err.into()),
        }

        let mut downcast = event.event;
        downcast.data = data;
        Ok(VersionedEvent {
            event: downcast,
            schema_version: target,
        })
    }

    /// Validate an event's payload against the schema at its exact version
    ///
    /// Validation is skipped (non-fatal) when no schema is registered for
    /// that exact version. Checks are shallow: required-field presence and
    /// declared JSON types. A deprecated schema logs a warning but passes.
    pub fn validate(&self, event: &VersionedEvent) -> Result<(), VersioningError> {
        let schema = match self
            .registry
            .get_schema(&event.event.event_type, event.schema_version)
        {
            Ok(schema) => schema,
            Err(RegistryError::SchemaNotFound { .. }) => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        if schema.deprecated {
            warn!(
                event_type = %schema.event_type,
                version = %schema.version,
                message = schema.deprecation_message.as_deref().unwrap_or(""),
                "event published against deprecated schema"
            );
        }

        let payload = event
            .event
            .data
            .as_object()
            .ok_or_else(|| VersioningError::PayloadNotObject(schema.event_type.clone()))?;

        for field in &schema.fields {
            match payload.get(&field.name) {
                None => {
                    if field.required {
                        return Err(VersioningError::MissingRequiredField {
                            event_type: schema.event_type.clone(),
                            field: field.name.clone(),
                        });
                    }
                }
                Some(serde_json::Value::Null) if !field.required => {}
                Some(value) => {
                    if !field.field_type.matches(value) {
                        return Err(VersioningError::FieldTypeMismatch {
                            event_type: schema.event_type.clone(),
                            field: field.name.clone(),
                            expected: field.field_type,
                        });
                    }
                }
            }
        }

        Ok(())
    }
}
