// Copyright 2025 Cowboy AI, LLC.

//! Event replay engine
//!
//! Pulls historical events from the event store and re-invokes registered
//! handlers, for operational recovery and backfill. A replay run paginates
//! the store, applies the configured filters, reports per-event progress,
//! and honors cancellation between pages and between events. Every abort
//! path returns the partial result alongside the triggering error.

use crate::event::{Event, EventHandler};
use crate::replay::CancellationToken;
use crate::store::{EventStore, StoreError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Describes one replay request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Only replay these event types (None = all)
    pub event_types: Option<Vec<String>>,

    /// Only replay events of this tenant
    pub tenant_id: Option<String>,

    /// Only replay events of this aggregate
    pub aggregate_id: Option<String>,

    /// Lower bound of the time range page source
    pub start_time: Option<DateTime<Utc>>,

    /// Upper bound of the time range page source
    pub end_time: Option<DateTime<Utc>>,

    /// Page size when fetching from the store
    pub batch_size: usize,

    /// Count and report without invoking handlers
    pub dry_run: bool,

    /// Accumulate handler errors instead of aborting on the first
    pub skip_errors: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            event_types: None,
            tenant_id: None,
            aggregate_id: None,
            start_time: None,
            end_time: None,
            batch_size: 100,
            dry_run: false,
            skip_errors: false,
        }
    }
}

/// A handler failure recorded during replay, with the offending event's identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayEventError {
    /// Id of the event whose handler failed
    pub event_id: Uuid,
    /// Type of the event
    pub event_type: String,
    /// Timestamp of the event
    pub timestamp: DateTime<Utc>,
    /// Handler error message
    pub reason: String,
}

/// Counters and error records for one replay run
///
/// On early abort these are the counts up to the abort point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayResult {
    /// Events fetched across all pages (the progress denominator)
    pub total_events: u64,
    /// Events that passed the filters and were (or would be) handled
    pub processed_count: u64,
    /// Events excluded by the filters
    pub skipped_count: u64,
    /// Events every handler completed without error
    pub success_count: u64,
    /// Handler failures observed
    pub error_count: u64,
    /// Individual handler failures, for post-mortem inspection
    pub errors: Vec<ReplayEventError>,
    /// When the run started
    pub started_at: Option<DateTime<Utc>>,
    /// When the run finished or aborted
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReplayResult {
    fn started() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    fn progress(&self) -> ReplayProgress {
        ReplayProgress {
            total_events: self.total_events,
            processed_count: self.processed_count,
            skipped_count: self.skipped_count,
            success_count: self.success_count,
            error_count: self.error_count,
        }
    }
}

/// Point-in-time counters reported while a replay runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReplayProgress {
    /// Events fetched across all pages
    pub total_events: u64,
    /// Events that passed the filters so far
    pub processed_count: u64,
    /// Events excluded by the filters so far
    pub skipped_count: u64,
    /// Events handled without error so far
    pub success_count: u64,
    /// Handler failures so far
    pub error_count: u64,
}

/// Receives progress and error notifications during a replay run
pub trait ReplayObserver: Send + Sync {
    /// Called after each fetched event is counted
    fn on_progress(&self, _progress: &ReplayProgress) {}

    /// Called for each recorded handler failure
    fn on_event_error(&self, _error: &ReplayEventError) {}
}

struct NoopObserver;

impl ReplayObserver for NoopObserver {}

/// Errors terminating a replay run; each carries the partial result
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The event store failed mid-run
    #[error("event store error: {source}")]
    Store {
        /// Underlying store failure
        #[source]
        source: StoreError,
        /// Counts up to the abort point
        partial: Box<ReplayResult>,
    },

    /// A handler failed and `skip_errors` was off
    #[error("handler failed for event {event_id} ({event_type}): {reason}")]
    Handler {
        /// Id of the event whose handler failed
        event_id: Uuid,
        /// Type of the event
        event_type: String,
        /// Handler error message
        reason: String,
        /// Counts up to the abort point
        partial: Box<ReplayResult>,
    },

    /// The cancellation token fired
    #[error("replay cancelled")]
    Cancelled {
        /// Counts up to the cancellation point
        partial: Box<ReplayResult>,
    },
}

impl ReplayError {
    /// The partial result accumulated before the abort
    pub fn partial_result(&self) -> &ReplayResult {
        match self {
            ReplayError::Store { partial, .. }
            | ReplayError::Handler { partial, .. }
            | ReplayError::Cancelled { partial } => partial,
        }
    }

    /// Consume the error, keeping only the partial result
    pub fn into_partial_result(self) -> ReplayResult {
        match self {
            ReplayError::Store { partial, .. }
            | ReplayError::Handler { partial, .. }
            | ReplayError::Cancelled { partial } => *partial,
        }
    }

    /// Whether the run ended due to cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReplayError::Cancelled { .. })
    }
}

enum Pages {
    Prefetched(Vec<Event>),
    Scan,
}

/// Replays historical events from an event store through registered handlers
pub struct EventReplayer {
    store: Arc<dyn EventStore>,
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl EventReplayer {
    /// Create a replayer over an event store
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for an event type
    ///
    /// Multiple handlers per type run in registration order.
    pub fn register_handler(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .entry(event_type.into())
            .or_default()
            .push(handler);
    }

    /// Run a replay, honoring the cancellation token
    pub async fn replay(
        &self,
        cancel: &CancellationToken,
        config: &ReplayConfig,
    ) -> Result<ReplayResult, ReplayError> {
        self.replay_observed(cancel, config, &NoopObserver).await
    }

    /// Run a replay, reporting progress and errors to the observer
    pub async fn replay_observed(
        &self,
        cancel: &CancellationToken,
        config: &ReplayConfig,
        observer: &dyn ReplayObserver,
    ) -> Result<ReplayResult, ReplayError> {
        let mut result = ReplayResult::started();
        let batch_size = config.batch_size.max(1);

        // Page source precedence: time range, then aggregate, then full scan.
        let pages = if config.start_time.is_some() || config.end_time.is_some() {
            let start = config.start_time.unwrap_or(DateTime::<Utc>::MIN_UTC);
            let end = config.end_time.unwrap_or_else(Utc::now);
            match self.store.get_by_time_range(start, end, usize::MAX).await {
                Ok(events) => Pages::Prefetched(events),
                Err(err) => return Err(abort_store(result, err)),
            }
        } else if let Some(aggregate_id) = &config.aggregate_id {
            match self.store.get_by_aggregate_id(aggregate_id).await {
                Ok(events) => Pages::Prefetched(events),
                Err(err) => return Err(abort_store(result, err)),
            }
        } else {
            Pages::Scan
        };

        // Total count up front, so progress has a denominator from the start.
        result.total_events = match &pages {
            Pages::Prefetched(events) => events.len() as u64,
            Pages::Scan => match self.store.count().await {
                Ok(count) => count,
                Err(err) => return Err(abort_store(result, err)),
            },
        };

        info!(
            total_events = result.total_events,
            dry_run = config.dry_run,
            "starting replay"
        );

        let mut cursor = 0usize;
        let mut offset = 0usize;
        loop {
            if cancel.is_cancelled() {
                return Err(abort_cancelled(result));
            }

            let page = match &pages {
                Pages::Prefetched(events) => {
                    if cursor >= events.len() {
                        break;
                    }
                    let end = (cursor + batch_size).min(events.len());
                    let page = events[cursor..end].to_vec();
                    cursor = end;
                    page
                }
                Pages::Scan => {
                    let page = match self.store.get_all(offset, batch_size).await {
                        Ok(page) => page,
                        Err(err) => return Err(abort_store(result, err)),
                    };
                    if page.is_empty() {
                        break;
                    }
                    offset += page.len();
                    page
                }
            };
            debug!(page_len = page.len(), "fetched replay page");

            for event in &page {
                if cancel.is_cancelled() {
                    return Err(abort_cancelled(result));
                }

                if !matches_filters(config, event) {
                    result.skipped_count += 1;
                    observer.on_progress(&result.progress());
                    continue;
                }

                result.processed_count += 1;
                observer.on_progress(&result.progress());

                if config.dry_run {
                    result.success_count += 1;
                    continue;
                }

                let handlers: Vec<Arc<dyn EventHandler>> = self
                    .handlers
                    .read()
                    .get(&event.event_type)
                    .cloned()
                    .unwrap_or_default();

                let mut event_failed = false;
                for handler in handlers {
                    if let Err(err) = handler.handle(event).await {
                        event_failed = true;
                        result.error_count += 1;
                        let record = ReplayEventError {
                            event_id: event.id,
                            event_type: event.event_type.clone(),
                            timestamp: event.timestamp,
                            reason: err.to_string(),
                        };
                        warn!(
                            event_id = %record.event_id,
                            event_type = %record.event_type,
                            error = %record.reason,
                            "handler failed during replay"
                        );
                        observer.on_event_error(&record);
                        result.errors.push(record);

                        if !config.skip_errors {
                            result.completed_at = Some(Utc::now());
                            return Err(ReplayError::Handler {
                                event_id: event.id,
                                event_type: event.event_type.clone(),
                                reason: err.to_string(),
                                partial: Box::new(result),
                            });
                        }
                    }
                }
                if !event_failed {
                    result.success_count += 1;
                }
            }
        }

        result.completed_at = Some(Utc::now());
        observer.on_progress(&result.progress());
        info!(
            processed = result.processed_count,
            skipped = result.skipped_count,
            errors = result.error_count,
            "replay complete"
        );
        Ok(result)
    }
}

fn matches_filters(config: &ReplayConfig, event: &Event) -> bool {
    if let Some(types) = &config.event_types {
        if !types.iter().any(|t| t == &event.event_type) {
            return false;
        }
    }
    if let Some(tenant_id) = &config.tenant_id {
        if &event.tenant_id != tenant_id {
            return false;
        }
    }
    if let Some(aggregate_id) = &config.aggregate_id {
        if &event.aggregate_id != aggregate_id {
            return false;
        }
    }
    true
}

fn abort_store(mut result: ReplayResult, source: StoreError) -> ReplayError {
    result.completed_at = Some(Utc::now());
    ReplayError::Store {
        source,
        partial: Box::new(result),
    }
}

fn abort_cancelled(mut result: ReplayResult) -> ReplayError {
    result.completed_at = Some(Utc::now());
    ReplayError::Cancelled {
        partial: Box::new(result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::HandlerError;
    use crate::store::InMemoryEventStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    struct Counter {
        handled: AtomicU64,
    }

    impl Counter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                handled: AtomicU64::new(0),
            })
        }
        fn count(&self) -> u64 {
            self.handled.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler for Counter {
        async fn handle(&self, _event: &Event) -> Result<(), HandlerError> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailOn {
        target: String,
        seen: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl EventHandler for FailOn {
        async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push(event.id);
            if event.aggregate_id == self.target {
                return Err("simulated handler failure".into());
            }
            Ok(())
        }
    }

    async fn seeded_store() -> Arc<InMemoryEventStore> {
        let store = Arc::new(InMemoryEventStore::new());
        for i in 0..10 {
            let event_type = if i % 2 == 0 { "customer.created" } else { "sale.closed" };
            let mut event = Event::new(
                event_type,
                if i < 5 { "tenant-a" } else { "tenant-b" },
                format!("agg-{i}"),
                1,
                json!({"i": i}),
            );
            event.timestamp = Utc::now() + chrono::Duration::seconds(i);
            store.save(event).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn processed_plus_skipped_equals_total() {
        let store = seeded_store().await;
        let replayer = EventReplayer::new(store);
        let counter = Counter::new();
        replayer.register_handler("customer.created", counter.clone());

        let config = ReplayConfig {
            event_types: Some(vec!["customer.created".to_string()]),
            batch_size: 3,
            ..Default::default()
        };
        let result = replayer
            .replay(&CancellationToken::new(), &config)
            .await
            .unwrap();

        assert_eq!(result.total_events, 10);
        assert_eq!(result.processed_count + result.skipped_count, 10);
        assert_eq!(result.processed_count, 5);
        assert_eq!(result.success_count, 5);
        assert_eq!(counter.count(), 5);
    }

    #[tokio::test]
    async fn tenant_filter_applies() {
        let store = seeded_store().await;
        let replayer = EventReplayer::new(store);
        let counter = Counter::new();
        replayer.register_handler("customer.created", counter.clone());
        replayer.register_handler("sale.closed", counter.clone());

        let config = ReplayConfig {
            tenant_id: Some("tenant-a".to_string()),
            ..Default::default()
        };
        let result = replayer
            .replay(&CancellationToken::new(), &config)
            .await
            .unwrap();

        assert_eq!(result.processed_count, 5);
        assert_eq!(result.skipped_count, 5);
        assert_eq!(counter.count(), 5);
    }

    #[tokio::test]
    async fn aggregate_filter_uses_aggregate_page_source() {
        let store = seeded_store().await;
        let replayer = EventReplayer::new(store);
        let counter = Counter::new();
        replayer.register_handler("customer.created", counter.clone());

        let config = ReplayConfig {
            aggregate_id: Some("agg-2".to_string()),
            ..Default::default()
        };
        let result = replayer
            .replay(&CancellationToken::new(), &config)
            .await
            .unwrap();

        // Page source is the aggregate's own history.
        assert_eq!(result.total_events, 1);
        assert_eq!(result.processed_count, 1);
        assert_eq!(counter.count(), 1);
    }

    #[tokio::test]
    async fn time_range_takes_precedence() {
        let store = seeded_store().await;
        let all = store.get_all(0, 100).await.unwrap();
        let cutoff = all[4].timestamp;

        let replayer = EventReplayer::new(store);
        let counter = Counter::new();
        replayer.register_handler("customer.created", counter.clone());
        replayer.register_handler("sale.closed", counter.clone());

        let config = ReplayConfig {
            end_time: Some(cutoff),
            ..Default::default()
        };
        let result = replayer
            .replay(&CancellationToken::new(), &config)
            .await
            .unwrap();

        assert_eq!(result.total_events, 5);
        assert_eq!(result.processed_count, 5);
    }

    #[tokio::test]
    async fn dry_run_never_invokes_handlers() {
        let store = seeded_store().await;
        let replayer = EventReplayer::new(store);
        let counter = Counter::new();
        replayer.register_handler("customer.created", counter.clone());
        replayer.register_handler("sale.closed", counter.clone());

        let config = ReplayConfig {
            dry_run: true,
            ..Default::default()
        };
        let result = replayer
            .replay(&CancellationToken::new(), &config)
            .await
            .unwrap();

        assert_eq!(counter.count(), 0);
        assert_eq!(result.processed_count, 10);
        assert_eq!(result.success_count, 10);
        assert_eq!(result.error_count, 0);
    }

    #[tokio::test]
    async fn first_error_aborts_with_partial_result() {
        let store = seeded_store().await;
        let replayer = EventReplayer::new(store);
        let failer = Arc::new(FailOn {
            target: "agg-4".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        replayer.register_handler("customer.created", failer);

        let config = ReplayConfig {
            event_types: Some(vec!["customer.created".to_string()]),
            ..Default::default()
        };
        let err = replayer
            .replay(&CancellationToken::new(), &config)
            .await
            .unwrap_err();

        match &err {
            ReplayError::Handler { event_type, .. } => {
                assert_eq!(event_type, "customer.created");
            }
            other => panic!("expected Handler error, got {other:?}"),
        }
        let partial = err.partial_result();
        assert_eq!(partial.error_count, 1);
        assert_eq!(partial.errors.len(), 1);
        // agg-0 and agg-2 succeeded before agg-4 failed.
        assert_eq!(partial.success_count, 2);
        assert!(partial.completed_at.is_some());
    }

    #[tokio::test]
    async fn skip_errors_accumulates_and_completes() {
        let store = seeded_store().await;
        let replayer = EventReplayer::new(store);
        let failer = Arc::new(FailOn {
            target: "agg-4".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        replayer.register_handler("customer.created", failer);

        let config = ReplayConfig {
            event_types: Some(vec!["customer.created".to_string()]),
            skip_errors: true,
            ..Default::default()
        };
        let result = replayer
            .replay(&CancellationToken::new(), &config)
            .await
            .unwrap();

        assert_eq!(result.processed_count, 5);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.success_count, 4);
        assert_eq!(result.errors[0].event_type, "customer.created");
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let store = Arc::new(InMemoryEventStore::new());
        store
            .save(Event::new("a", "t", "agg", 1, json!({})))
            .await
            .unwrap();
        let replayer = EventReplayer::new(store);

        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = order.clone();
            replayer.register_handler(
                "a",
                Arc::new(crate::event::FnHandler::new(move |_e: &Event| {
                    order.lock().unwrap().push(label);
                    Ok(())
                })),
            );
        }

        replayer
            .replay(&CancellationToken::new(), &ReplayConfig::default())
            .await
            .unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn cancellation_returns_partial_counts() {
        let store = seeded_store().await;
        let replayer = EventReplayer::new(store);
        let cancel = CancellationToken::new();

        let trip = cancel.clone();
        let tripped = Arc::new(AtomicU64::new(0));
        let tripped_in_handler = tripped.clone();
        replayer.register_handler(
            "customer.created",
            Arc::new(crate::event::FnHandler::new(move |_e: &Event| {
                // Cancel mid-run from inside a handler; the loop notices
                // before the next event.
                if tripped_in_handler.fetch_add(1, Ordering::SeqCst) == 1 {
                    trip.cancel();
                }
                Ok(())
            })),
        );

        let config = ReplayConfig {
            event_types: Some(vec!["customer.created".to_string()]),
            ..Default::default()
        };
        let err = replayer.replay(&cancel, &config).await.unwrap_err();

        assert!(err.is_cancelled());
        let partial = err.into_partial_result();
        assert_eq!(partial.processed_count, 2);
        assert!(partial.completed_at.is_some());
    }
}
