// Copyright 2025 Cowboy AI, LLC.

//! AMQP-backed event bus
//!
//! Owns the broker connection lifecycle. A monitor task watches each
//! connection's error notification; on unexpected close it reconnects with
//! exponential backoff and restores every active consumer, so subscriptions
//! survive broker outages without callers re-subscribing.
//!
//! Connection states: disconnected -> connecting -> connected ->
//! reconnecting -> connected | closed.

use crate::bus::{BusConfig, BusError, EventBus};
use crate::event::{Event, EventHandler};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Connection lifecycle states of the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection has been established yet
    Disconnected,
    /// Initial connection attempt in progress
    Connecting,
    /// Live connection and channel
    Connected,
    /// Connection lost; backoff/retry loop running
    Reconnecting,
    /// Explicitly closed; terminal
    Closed,
}

/// Exponential backoff between reconnect attempts
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    /// The delay to wait before the next attempt; doubles up to the cap
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }
}

struct ConsumerEntry {
    queue: String,
    event_types: Vec<String>,
    handler: Arc<dyn EventHandler>,
    shutdown: watch::Sender<bool>,
}

struct BusInner {
    state: ConnectionState,
    connection: Option<Connection>,
    channel: Option<Channel>,
    consumers: Vec<ConsumerEntry>,
}

/// Event bus over an AMQP 0-9-1 broker
///
/// Cloning is cheap and shares the same connection and consumer registry.
#[derive(Clone)]
pub struct RabbitEventBus {
    config: Arc<BusConfig>,
    inner: Arc<RwLock<BusInner>>,
}

impl RabbitEventBus {
    /// Connect to the broker and declare the configured exchanges
    pub async fn connect(config: BusConfig) -> Result<Self, BusError> {
        let bus = Self {
            config: Arc::new(config),
            inner: Arc::new(RwLock::new(BusInner {
                state: ConnectionState::Disconnected,
                connection: None,
                channel: None,
                consumers: Vec::new(),
            })),
        };
        bus.establish().await?;
        Ok(bus)
    }

    /// Current connection state
    pub async fn state(&self) -> ConnectionState {
        self.inner.read().await.state
    }

    async fn establish(&self) -> Result<(), BusError> {
        {
            let mut inner = self.inner.write().await;
            match inner.state {
                ConnectionState::Closed => return Err(BusError::Closed),
                ConnectionState::Disconnected => inner.state = ConnectionState::Connecting,
                _ => {}
            }
        }

        let connection = Connection::connect(
            &self.config.url,
            ConnectionProperties::default()
                .with_connection_name(self.config.connection_name.as_str().into()),
        )
        .await?;
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await?;
        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .exchange_declare(
                &self.config.dead_letter_exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        let (close_tx, close_rx) = oneshot::channel();
        let close_tx = parking_lot::Mutex::new(Some(close_tx));
        connection.on_error(move |err| {
            if let Some(tx) = close_tx.lock().take() {
                let _ = tx.send(err);
            }
        });

        let mut stale = None;
        {
            let mut inner = self.inner.write().await;
            if inner.state == ConnectionState::Closed {
                stale = Some(connection);
            } else {
                inner.connection = Some(connection);
                inner.channel = Some(channel);
                inner.state = ConnectionState::Connected;
            }
        }
        if let Some(connection) = stale {
            // close() raced us while connecting
            let _ = connection.close(200, "bus closed").await;
            return Err(BusError::Closed);
        }

        self.spawn_monitor(close_rx);
        info!(
            url = %self.config.url,
            exchange = %self.config.exchange,
            "connected to broker"
        );
        Ok(())
    }

    fn spawn_monitor(&self, close_rx: oneshot::Receiver<lapin::Error>) {
        let bus = self.clone();
        tokio::spawn(async move {
            let err = match close_rx.await {
                Ok(err) => err,
                // Notification sender dropped without firing
                Err(_) => return,
            };
            if bus.state().await == ConnectionState::Closed {
                return;
            }
            warn!(error = %err, "broker connection lost, reconnecting");
            bus.reconnect_loop().await;
        });
    }

    async fn reconnect_loop(&self) {
        {
            let mut inner = self.inner.write().await;
            if inner.state == ConnectionState::Closed {
                return;
            }
            inner.state = ConnectionState::Reconnecting;
            inner.connection = None;
            inner.channel = None;
        }

        let mut backoff = Backoff::new(
            Duration::from_millis(self.config.reconnect_initial_delay_ms),
            Duration::from_millis(self.config.reconnect_max_delay_ms),
        );
        // Retries until it succeeds; an explicit close() is the only way out.
        loop {
            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "waiting before reconnect attempt");
            tokio::time::sleep(delay).await;
            if self.state().await == ConnectionState::Closed {
                return;
            }
            match self.establish().await {
                Ok(()) => break,
                Err(BusError::Closed) => return,
                Err(err) => warn!(error = %err, "reconnect attempt failed"),
            }
        }

        if let Err(err) = self.restore_consumers().await {
            error!(error = %err, "failed to restore consumers after reconnect");
        }
    }

    async fn restore_consumers(&self) -> Result<(), BusError> {
        let (channel, entries) = {
            let inner = self.inner.read().await;
            let channel = inner.channel.clone().ok_or(BusError::NotConnected)?;
            let entries: Vec<_> = inner
                .consumers
                .iter()
                .map(|c| {
                    (
                        c.queue.clone(),
                        c.event_types.clone(),
                        Arc::clone(&c.handler),
                        c.shutdown.subscribe(),
                    )
                })
                .collect();
            (channel, entries)
        };

        for (queue, event_types, handler, shutdown) in entries {
            self.bind_and_consume(&channel, &queue, &event_types, handler, shutdown)
                .await?;
            info!(queue = %queue, "restored consumer after reconnect");
        }
        Ok(())
    }

    /// Declare the queue (with its dead-letter target), bind it per event
    /// type, and start the consuming task.
    async fn bind_and_consume(
        &self,
        channel: &Channel,
        queue: &str,
        event_types: &[String],
        handler: Arc<dyn EventHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BusError> {
        let dead_letter_queue = format!("{queue}.dead-letter");
        channel
            .queue_declare(
                &dead_letter_queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                &dead_letter_queue,
                &self.config.dead_letter_exchange,
                queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(self.config.dead_letter_exchange.as_str().into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(queue.into()),
        );
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await?;

        for event_type in event_types {
            channel
                .queue_bind(
                    queue,
                    &self.config.exchange,
                    event_type,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        let consumer_tag = format!("{queue}.consumer");
        let mut consumer = channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let queue_name = queue.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    delivery = consumer.next() => {
                        let delivery = match delivery {
                            Some(Ok(delivery)) => delivery,
                            Some(Err(err)) => {
                                warn!(queue = %queue_name, error = %err, "consumer stream error");
                                break;
                            }
                            // Channel gone; the reconnect monitor restores us
                            None => break,
                        };
                        match serde_json::from_slice::<Event>(&delivery.data) {
                            Ok(event) => match handler.handle(&event).await {
                                Ok(()) => {
                                    if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                                        warn!(queue = %queue_name, error = %err, "failed to ack delivery");
                                    }
                                }
                                Err(err) => {
                                    warn!(
                                        queue = %queue_name,
                                        event_id = %event.id,
                                        error = %err,
                                        "handler failed, requeueing delivery"
                                    );
                                    if let Err(err) = delivery
                                        .reject(BasicRejectOptions { requeue: true })
                                        .await
                                    {
                                        warn!(queue = %queue_name, error = %err, "failed to requeue delivery");
                                    }
                                }
                            },
                            Err(err) => {
                                // Poison message: dead-letter, never retry
                                warn!(queue = %queue_name, error = %err, "undecodable delivery, dead-lettering");
                                if let Err(err) = delivery
                                    .reject(BasicRejectOptions { requeue: false })
                                    .await
                                {
                                    warn!(queue = %queue_name, error = %err, "failed to dead-letter delivery");
                                }
                            }
                        }
                    }
                }
            }
            debug!(queue = %queue_name, "consumer task stopped");
        });

        Ok(())
    }

    async fn live_channel(&self) -> Result<Channel, BusError> {
        let inner = self.inner.read().await;
        if inner.state == ConnectionState::Closed {
            return Err(BusError::Closed);
        }
        inner.channel.clone().ok_or(BusError::NotConnected)
    }
}

#[async_trait]
impl EventBus for RabbitEventBus {
    async fn publish(&self, event: Event) -> Result<(), BusError> {
        let channel = self.live_channel().await?;
        let payload = serde_json::to_vec(&event)?;

        let mut headers = FieldTable::default();
        headers.insert(
            "tenant_id".into(),
            AMQPValue::LongString(event.tenant_id.as_str().into()),
        );
        headers.insert(
            "aggregate_id".into(),
            AMQPValue::LongString(event.aggregate_id.as_str().into()),
        );
        headers.insert("version".into(), AMQPValue::LongLongInt(event.version as i64));

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2)
            .with_message_id(event.id.to_string().into())
            .with_kind(event.event_type.as_str().into())
            .with_headers(headers);

        let confirm = channel
            .basic_publish(
                &self.config.exchange,
                &event.event_type,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await?;
        confirm.await?;

        debug!(event_id = %event.id, event_type = %event.event_type, "published event");
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
        let channel = self.live_channel().await?;
        let queue = format!("{}.{}", self.config.queue_prefix, Uuid::new_v4());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.bind_and_consume(&channel, &queue, &event_types, Arc::clone(&handler), shutdown_rx)
            .await?;

        let mut inner = self.inner.write().await;
        inner.consumers.push(ConsumerEntry {
            queue: queue.clone(),
            event_types,
            handler,
            shutdown: shutdown_tx,
        });
        info!(queue = %queue, "subscribed");
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<(), BusError> {
        let mut inner = self.inner.write().await;
        for consumer in inner.consumers.drain(..) {
            let _ = consumer.shutdown.send(true);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        let (connection, channel, consumers) = {
            let mut inner = self.inner.write().await;
            if inner.state == ConnectionState::Closed {
                return Ok(());
            }
            inner.state = ConnectionState::Closed;
            (
                inner.connection.take(),
                inner.channel.take(),
                std::mem::take(&mut inner.consumers),
            )
        };
        for consumer in consumers {
            let _ = consumer.shutdown.send(true);
        }
        if let Some(channel) = channel {
            let _ = channel.close(200, "bus closed").await;
        }
        if let Some(connection) = connection {
            let _ = connection.close(200, "bus closed").await;
        }
        info!("event bus closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(
            delays,
            vec![500, 1000, 2000, 4000, 8000, 16000, 30000, 30000]
        );
    }

    #[test]
    fn backoff_clamps_initial_to_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(30));
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
    }
}
