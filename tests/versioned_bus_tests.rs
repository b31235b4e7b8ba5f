// Copyright 2025 Cowboy AI, LLC.

//! Integration tests for the versioned event stack
//!
//! Assembles registry, versioner, bus, store, and replayer the way an
//! application would and exercises schema evolution end to end.

use async_trait::async_trait;
use eventflow::{
    CancellationToken, Event, EventBus, EventHandler, EventReplayer, EventSchema, EventStore,
    EventVersioner, FieldType, HandlerError, InMemoryEventBus, InMemoryEventStore, Migration,
    ReplayConfig, SchemaField, SchemaVersion, VersionRegistry, VersionedEvent, VersionedEventBus,
    SCHEMA_VERSION_KEY,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn v(s: &str) -> SchemaVersion {
    s.parse().unwrap()
}

/// customer.created evolved twice:
/// 1.0.0 {customer_id} -> 1.1.0 {customer_id, address} -> 2.0.0 {id, address}
fn customer_registry() -> Arc<VersionRegistry> {
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
                SchemaField::optional("address", FieldType::Object).with_default(json!(null)),
            ],
        ))
        .unwrap();
    registry
        .register_schema(EventSchema::new(
            "customer.created",
            v("2.0.0"),
            vec![
                SchemaField::required("id", FieldType::String),
                SchemaField::optional("address", FieldType::Object),
            ],
        ))
        .unwrap();

    registry
        .register_migration(
            Migration::new(
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
            )
            .with_inverse(|data| {
                let mut next = data.clone();
                if let Some(obj) = next.as_object_mut() {
                    obj.remove("address");
                }
                Ok(next)
            }),
        )
        .unwrap();
    registry
        .register_migration(
            Migration::new(
                "customer.created",
                v("1.1.0"),
                v("2.0.0"),
                "rename customer_id to id",
                |data| {
                    let mut next = data.clone();
                    if let Some(obj) = next.as_object_mut() {
                        if let Some(id) = obj.remove("customer_id") {
                            obj.insert("id".to_string(), id);
                        }
                    }
                    Ok(next)
                },
            )
            .with_inverse(|data| {
                let mut next = data.clone();
                if let Some(obj) = next.as_object_mut() {
                    if let Some(id) = obj.remove("id") {
                        obj.insert("customer_id".to_string(), id);
                    }
                }
                Ok(next)
            }),
        )
        .unwrap();
    registry
}

struct Recorder {
    seen: Mutex<Vec<Event>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl EventHandler for Recorder {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[tokio::test]
async fn two_hop_upcast_on_delivery() {
    let registry = customer_registry();
    let inner = Arc::new(InMemoryEventBus::new());
    let bus = VersionedEventBus::new(inner.clone(), Arc::new(EventVersioner::new(registry)));

    let recorder = Recorder::new();
    bus.subscribe(vec!["customer.created".to_string()], recorder.clone())
        .await
        .unwrap();

    // A producer still on 1.0.0 publishes straight to the broker bus.
    let old = Event::new(
        "customer.created",
        "tenant-1",
        "cust-9",
        1,
        json!({"customer_id": "cust-9"}),
    )
    .with_metadata(SCHEMA_VERSION_KEY, "1.0.0");
    inner.publish(old).await.unwrap();

    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].data, json!({"id": "cust-9", "address": null}));
    assert_eq!(seen[0].metadata.get(SCHEMA_VERSION_KEY).unwrap(), "2.0.0");
}

#[tokio::test]
async fn publish_stamps_and_validates_against_current_schema() {
    let registry = customer_registry();
    let inner = Arc::new(InMemoryEventBus::new());
    let bus = VersionedEventBus::new(
        inner.clone(),
        Arc::new(EventVersioner::new(registry)),
    );

    // Valid at 2.0.0
    bus.publish(Event::new(
        "customer.created",
        "tenant-1",
        "cust-1",
        1,
        json!({"id": "cust-1"}),
    ))
    .await
    .unwrap();

    // 1.0.0-shaped payload no longer validates at the current version.
    let err = bus
        .publish(Event::new(
            "customer.created",
            "tenant-1",
            "cust-2",
            1,
            json!({"customer_id": "cust-2"}),
        ))
        .await;
    assert!(err.is_err());

    let published = inner.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].metadata.get(SCHEMA_VERSION_KEY).unwrap(), "2.0.0");
}

#[tokio::test]
async fn downcast_round_trip_for_legacy_consumer() {
    let registry = customer_registry();
    let versioner = EventVersioner::new(registry);

    let current = versioner.stamp(Event::new(
        "customer.created",
        "tenant-1",
        "cust-1",
        1,
        json!({"id": "cust-1", "address": null}),
    ));
    assert_eq!(current.schema_version, v("2.0.0"));

    // Down to the oldest shape across both inverses.
    let legacy = versioner.downcast(current.clone(), v("1.0.0")).unwrap();
    assert_eq!(legacy.schema_version, v("1.0.0"));
    assert_eq!(legacy.event.data, json!({"customer_id": "cust-1"}));

    // And back up.
    let restored = versioner
        .upcast(VersionedEvent {
            event: legacy.event,
            schema_version: legacy.schema_version,
        })
        .unwrap();
    assert_eq!(restored.event.data, current.event.data);
}

#[tokio::test]
async fn replay_drives_stored_events_through_upcasting_handlers() {
    let registry = customer_registry();
    let versioner = Arc::new(EventVersioner::new(registry));

    // Historical events persisted at the schema versions of their day.
    let store = Arc::new(InMemoryEventStore::new());
    let mut old = Event::new(
        "customer.created",
        "tenant-1",
        "cust-1",
        1,
        json!({"customer_id": "cust-1"}),
    )
    .with_metadata(SCHEMA_VERSION_KEY, "1.0.0");
    old.timestamp = chrono::Utc::now() - chrono::Duration::days(30);
    store.save(old).await.unwrap();
    store
        .save(
            Event::new(
                "customer.created",
                "tenant-1",
                "cust-2",
                1,
                json!({"id": "cust-2", "address": null}),
            )
            .with_metadata(SCHEMA_VERSION_KEY, "2.0.0"),
        )
        .await
        .unwrap();

    // The projection handler upcasts before applying, so it only ever
    // deals in the current shape.
    let replayer = EventReplayer::new(store);
    let ids = Arc::new(Mutex::new(Vec::new()));
    let handler_ids = ids.clone();
    let handler_versioner = versioner.clone();
    replayer.register_handler(
        "customer.created",
        Arc::new(eventflow::FnHandler::new(move |event: &Event| {
            let schema_version = event
                .metadata
                .get(SCHEMA_VERSION_KEY)
                .map(|raw| raw.parse())
                .transpose()?
                .unwrap_or_else(SchemaVersion::initial);
            let upcast = handler_versioner.upcast(VersionedEvent {
                event: event.clone(),
                schema_version,
            })?;
            handler_ids
                .lock()
                .unwrap()
                .push(upcast.event.data["id"].as_str().unwrap().to_string());
            Ok(())
        })),
    );

    let result = replayer
        .replay(&CancellationToken::new(), &ReplayConfig::default())
        .await
        .unwrap();

    assert_eq!(result.processed_count, 2);
    assert_eq!(result.success_count, 2);
    assert_eq!(*ids.lock().unwrap(), vec!["cust-1", "cust-2"]);
}
