// Copyright 2025 Cowboy AI, LLC.

//! Event schema definitions
//!
//! A schema describes the payload shape of one `(event_type, version)` pair.
//! Validation against a schema is shallow: required-field presence and
//! JSON type checks only.

use crate::version::SchemaVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// JSON payload types a schema field may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 string
    String,
    /// Integer number; JSON numbers transported as floating point are accepted
    Int,
    /// Floating point number
    Float,
    /// Boolean
    Bool,
    /// JSON array
    Array,
    /// JSON object
    Object,
    /// RFC 3339 timestamp carried as a string
    DateTime,
    /// UUID carried as a string
    Uuid,
    /// Any JSON value
    Json,
}

impl FieldType {
    /// Shallow check that a payload value matches this declared type
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            // JSON has one number type on the wire; ints arriving as floats pass
            FieldType::Int | FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::DateTime => value
                .as_str()
                .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok()),
            FieldType::Uuid => value.as_str().is_some_and(|s| uuid::Uuid::parse_str(s).is_ok()),
            FieldType::Json => true,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::DateTime => "datetime",
            FieldType::Uuid => "uuid",
            FieldType::Json => "json",
        };
        f.write_str(name)
    }
}

/// One field of an event payload schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    /// Field name within the payload object
    pub name: String,
    /// Declared JSON type
    pub field_type: FieldType,
    /// Whether the field must be present
    pub required: bool,
    /// Default value newer consumers may assume for absent fields
    pub default: Option<serde_json::Value>,
    /// Human-readable description
    pub description: Option<String>,
    /// Whether the field is slated for removal
    pub deprecated: bool,
}

impl SchemaField {
    /// A required field of the given type
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            default: None,
            description: None,
            deprecated: false,
        }
    }

    /// An optional field of the given type
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type)
        }
    }

    /// Set the default value
    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the field deprecated
    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }
}

/// Payload schema for one `(event_type, version)` pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSchema {
    /// Event type this schema describes
    pub event_type: String,
    /// Schema version
    pub version: SchemaVersion,
    /// Declared payload fields
    pub fields: Vec<SchemaField>,
    /// Human-readable description
    pub description: String,
    /// Whether producers should stop emitting this version
    pub deprecated: bool,
    /// Guidance shown when the deprecated version is still seen
    pub deprecation_message: Option<String>,
    /// When the schema was registered
    pub created_at: DateTime<Utc>,
}

impl EventSchema {
    /// Create a schema for an event type at a version
    pub fn new(
        event_type: impl Into<String>,
        version: SchemaVersion,
        fields: Vec<SchemaField>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            version,
            fields,
            description: String::new(),
            deprecated: false,
            deprecation_message: None,
            created_at: Utc::now(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark the schema deprecated with a message for consumers
    pub fn deprecate(mut self, message: impl Into<String>) -> Self {
        self.deprecated = true;
        self.deprecation_message = Some(message.into());
        self
    }

    /// Look up a declared field by name
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }
}
