// Copyright 2025 Cowboy AI, LLC.

//! Version-aware event bus decorator
//!
//! Wraps any [`EventBus`] so producers always publish at the current schema
//! version and consumers never see stale payload shapes: publish stamps and
//! validates, delivery upcasts before the caller's handler runs.

use crate::bus::{BusError, EventBus};
use crate::event::{Event, EventHandler, HandlerError};
use crate::versioning::{EventVersioner, VersionedEvent, SCHEMA_VERSION_KEY};
use async_trait::async_trait;
use std::sync::Arc;

/// Decorator adding version stamping and upcasting to a bus
pub struct VersionedEventBus {
    inner: Arc<dyn EventBus>,
    versioner: Arc<EventVersioner>,
}

impl VersionedEventBus {
    /// Wrap a bus with a versioner
    pub fn new(inner: Arc<dyn EventBus>, versioner: Arc<EventVersioner>) -> Self {
        Self { inner, versioner }
    }

    fn stamp_for_publish(&self, event: Event) -> Result<Event, BusError> {
        let stamped = self.versioner.stamp(event);
        self.versioner.validate(&stamped)?;
        let VersionedEvent {
            mut event,
            schema_version,
        } = stamped;
        event
            .metadata
            .insert(SCHEMA_VERSION_KEY.to_string(), schema_version.to_string());
        Ok(event)
    }
}

#[async_trait]
impl EventBus for VersionedEventBus {
    async fn publish(&self, event: Event) -> Result<(), BusError> {
        let event = self.stamp_for_publish(event)?;
        self.inner.publish(event).await
    }

    async fn publish_batch(&self, events: Vec<Event>) -> Result<(), BusError> {
        let mut stamped = Vec::with_capacity(events.len());
        for event in events {
            let event_id = event.id;
            let event = self
                .stamp_for_publish(event)
                .map_err(|err| BusError::PublishFailed {
                    event_id,
                    reason: err.to_string(),
                })?;
            stamped.push(event);
        }
        self.inner.publish_batch(stamped).await
    }

    async fn subscribe(
        &self,
        event_types: Vec<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BusError> {
        let wrapped = Arc::new(UpcastingHandler {
            versioner: Arc::clone(&self.versioner),
            inner: handler,
        });
        self.inner.subscribe(event_types, wrapped).await
    }

    async fn unsubscribe(&self) -> Result<(), BusError> {
        self.inner.unsubscribe().await
    }

    async fn close(&self) -> Result<(), BusError> {
        self.inner.close().await
    }
}

/// Handler wrapper that upcasts deliveries before invoking the inner handler
struct UpcastingHandler {
    versioner: Arc<EventVersioner>,
    inner: Arc<dyn EventHandler>,
}

#[async_trait]
impl EventHandler for UpcastingHandler {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let versioned = match event.metadata.get(SCHEMA_VERSION_KEY) {
            Some(raw) => VersionedEvent {
                event: event.clone(),
                schema_version: raw.parse()?,
            },
            // Unversioned producer: treated as already current
            None => self.versioner.stamp(event.clone()),
        };

        let mut upcast = self.versioner.upcast(versioned)?;
        upcast.event.metadata.insert(
            SCHEMA_VERSION_KEY.to_string(),
            upcast.schema_version.to_string(),
        );
        self.inner.handle(&upcast.event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryEventBus;
    use crate::registry::{Migration, VersionRegistry};
    use crate::schema::{EventSchema, FieldType, SchemaField};
    use crate::version::SchemaVersion;
    use serde_json::json;
    use std::sync::Mutex;

    fn v(s: &str) -> SchemaVersion {
        s.parse().unwrap()
    }

    struct Recorder {
        seen: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn versioned_stack() -> (Arc<InMemoryEventBus>, VersionedEventBus) {
        let registry = Arc::new(VersionRegistry::new());
        registry
            .register_schema(EventSchema::new(
                "customer.created",
                v("1.0.0"),
                vec![SchemaField::required("customer_id", FieldType::String)],
            ))
            .unwrap();
        registry
            .register_schema(EventSchema::new(
                "customer.created",
                v("1.1.0"),
                vec![
                    SchemaField::required("customer_id", FieldType::String),
                    SchemaField::optional("address", FieldType::Object),
                ],
            ))
            .unwrap();
        registry
            .register_migration(Migration::new(
                "customer.created",
                v("1.0.0"),
                v("1.1.0"),
                "add optional address",
                |data| {
                    let mut next = data.clone();
                    if let Some(obj) = next.as_object_mut() {
                        obj.insert("address".to_string(), json!(null));
                    }
                    Ok(next)
                },
            ))
            .unwrap();

        let inner = Arc::new(InMemoryEventBus::new());
        let bus = VersionedEventBus::new(
            inner.clone(),
            Arc::new(EventVersioner::new(registry)),
        );
        (inner, bus)
    }

    #[tokio::test]
    async fn publish_stamps_current_schema_version() {
        let (inner, bus) = versioned_stack();
        bus.publish(Event::new(
            "customer.created",
            "t1",
            "c1",
            1,
            json!({"customer_id": "c1", "address": null}),
        ))
        .await
        .unwrap();

        let published = inner.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(
            published[0].metadata.get(SCHEMA_VERSION_KEY).unwrap(),
            "1.1.0"
        );
    }

    #[tokio::test]
    async fn publish_aborts_on_schema_violation() {
        let (inner, bus) = versioned_stack();
        let result = bus
            .publish(Event::new(
                "customer.created",
                "t1",
                "c1",
                1,
                json!({"address": null}),
            ))
            .await;

        assert!(matches!(result, Err(BusError::Versioning(_))));
        assert!(inner.published().await.is_empty());
    }

    #[tokio::test]
    async fn delivery_upcasts_old_events_before_handler() {
        let (inner, bus) = versioned_stack();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe(vec!["customer.created".to_string()], recorder.clone())
            .await
            .unwrap();

        // An old producer publishes a 1.0.0 payload straight to the inner bus.
        let old = Event::new(
            "customer.created",
            "t1",
            "c1",
            1,
            json!({"customer_id": "c1"}),
        )
        .with_metadata(SCHEMA_VERSION_KEY, "1.0.0");
        inner.publish(old).await.unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].data,
            json!({"customer_id": "c1", "address": null})
        );
        assert_eq!(seen[0].metadata.get(SCHEMA_VERSION_KEY).unwrap(), "1.1.0");
    }

    #[tokio::test]
    async fn unversioned_delivery_passes_through() {
        let (inner, bus) = versioned_stack();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe(vec!["customer.created".to_string()], recorder.clone())
            .await
            .unwrap();

        // No schema_version metadata: treated as already current.
        let unversioned = Event::new(
            "customer.created",
            "t1",
            "c1",
            1,
            json!({"customer_id": "c1", "address": {"city": "Austin"}}),
        );
        inner.publish(unversioned).await.unwrap();

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].data["address"]["city"], "Austin");
    }

    #[tokio::test]
    async fn batch_stamps_every_event() {
        let (inner, bus) = versioned_stack();
        bus.publish_batch(vec![
            Event::new("customer.created", "t1", "c1", 1, json!({"customer_id": "c1"})),
            Event::new("customer.created", "t1", "c2", 1, json!({"customer_id": "c2"})),
        ])
        .await
        .unwrap();

        let published = inner.published().await;
        assert_eq!(published.len(), 2);
        for event in published {
            assert_eq!(event.metadata.get(SCHEMA_VERSION_KEY).unwrap(), "1.1.0");
        }
    }
}
