// Copyright 2025 Cowboy AI, LLC.

//! In-memory event bus
//!
//! Dispatches published events directly to matching subscribers on the
//! caller's task. Used in tests and embedded deployments where a broker is
//! unnecessary; delivery semantics are best-effort with no requeue.

use crate::bus::{BusError, EventBus};
use crate::event::{Event, EventHandler};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

struct Subscription {
    event_types: Vec<String>,
    handler: Arc<dyn EventHandler>,
}

/// Event bus that delivers in-process, without a broker
#[derive(Default)]
pub struct InMemoryEventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    published: RwLock<Vec<Event>>,
    closed: AtomicBool,
}

impl InMemoryEventBus {
    /// Create an open bus with no subscriptions
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event published so far, in publish order
    pub async fn published(&self) -> Vec<Event> {
        self.published.read().await.clone()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: Event) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        self.published.write().await.push(event.clone());

        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions
                .iter()
                .filter(|s| s.event_types.iter().any(|t| t == &event.event_type))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };

        for handler in handlers {
            if let Err(err) = handler.handle(&event).await {
                // No broker, no requeue: surface and move on
                warn!(event_id = %event.id, error = %err, "in-memory handler failed");
            }
        }
        Ok(())
    }

    async fn publish_batch(&self, events: Vec<Event>) -> Result<(), BusError> {
        for event in events {
            let event_id = event.id;
            if let Err(err) = self.publish(event).await {
                return Err(BusError::PublishFailed {
                    event_id,
                    reason: err.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        event_types: Vec<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        self.subscriptions.write().await.push(Subscription {
            event_types,
            handler,
        });
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), BusError> {
        self.subscriptions.write().await.clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        self.closed.store(true, Ordering::SeqCst);
        self.subscriptions.write().await.clear();
        Ok(())
    }
}
