// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Facade
//!
//! `Broker` is the public operation surface of the emulator. It owns the topology
//! registry, the consumer registry, the delivery tag counter and the connection
//! state, all behind one lock so operations never mutate state in parallel.
//!
//! A `Broker` is a cheap handle: clones share the same state. Topology, publish
//! and consume operations open the connection implicitly when it is closed.
//!
//! ```ignore
//! let broker = Broker::new(BrokerConfig::default());
//! broker.assert_exchange(ExchangeDefinition::new("events").topic()).await;
//! broker.assert_queue(QueueDefinition::new("q1")).await;
//! broker.bind_queue("q1", "events", "health.*").await?;
//! broker.publish("events", "health.sleep", payload, PublishOptions::new()).await?;
//! let scheduler = broker.start();
//! ```

use crate::{
    channel::{self, ConnectionState},
    config::BrokerConfig,
    consumer::{ConsumeOptions, Consumer, ConsumerHandler, ConsumerRegistry},
    dispatcher::{Dispatcher, DispatcherHandle},
    errors::AmqpError,
    events::{BrokerEvent, EventBus},
    exchange::{ExchangeDefinition, ExchangeInfo, ExchangeKind},
    message::{encode_json, DeliveryTag, Message, PublishOptions, JSON_CONTENT_TYPE},
    queue::{QueueDefinition, QueueInfo},
    router,
    topology::TopologyRegistry,
};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, warn};

/// A delivery handed to a consumer that has not been acknowledged yet.
#[derive(Debug)]
pub(crate) struct Unacked {
    pub(crate) queue: String,
    pub(crate) message: Message,
}

/// Everything the broker mutates, guarded by a single lock.
#[derive(Default)]
pub(crate) struct BrokerState {
    pub(crate) connection: ConnectionState,
    pub(crate) topology: TopologyRegistry,
    pub(crate) consumers: ConsumerRegistry,
    pub(crate) last_delivery_tag: DeliveryTag,
    pub(crate) unacked: HashMap<DeliveryTag, Unacked>,
}

impl BrokerState {
    fn next_delivery_tag(&mut self) -> DeliveryTag {
        self.last_delivery_tag += 1;
        self.last_delivery_tag
    }

    fn queue_info(&self, name: &str) -> Result<QueueInfo, AmqpError> {
        let queue = self
            .topology
            .queue(name)
            .ok_or_else(|| AmqpError::QueueNotFound(name.to_owned()))?;

        Ok(QueueInfo {
            queue: name.to_owned(),
            message_count: queue.message_count(),
            consumer_count: self.consumers.count(name),
        })
    }

    /// Stamps a copy of the content with a fresh delivery tag and appends it to `queue`.
    fn enqueue(
        &mut self,
        events: &EventBus,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        content: &[u8],
        properties: &lapin::BasicProperties,
    ) -> bool {
        let delivery_tag = self.next_delivery_tag();
        let Some(target) = self.topology.queue_mut(queue) else {
            return false;
        };

        target.enqueue(Message::new(
            content.to_vec(),
            properties.clone(),
            exchange,
            routing_key,
            delivery_tag,
        ));
        events.emit(BrokerEvent::Published {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            queue: queue.to_owned(),
            delivery_tag,
        });
        true
    }

    /// Puts a message back at the front of its queue, or drops it if the
    /// queue no longer exists.
    pub(crate) fn requeue(&mut self, events: &EventBus, queue: &str, message: Message) {
        let delivery_tag = message.delivery_tag();
        match self.topology.queue_mut(queue) {
            Some(target) => {
                debug!(queue, delivery_tag, "requeuing message");
                target.requeue(message);
                events.emit(BrokerEvent::Requeued {
                    queue: queue.to_owned(),
                    delivery_tag,
                });
            }
            None => {
                warn!(queue, delivery_tag, "queue gone, dropping message instead of requeuing");
                events.emit(BrokerEvent::Dropped {
                    queue: queue.to_owned(),
                    delivery_tag,
                });
            }
        }
    }
}

pub(crate) struct Shared {
    pub(crate) config: BrokerConfig,
    pub(crate) state: Mutex<BrokerState>,
    pub(crate) connect_lock: Mutex<()>,
    pub(crate) events: EventBus,
}

/// Handle to an in-process broker.
#[derive(Clone)]
pub struct Broker {
    pub(crate) shared: Arc<Shared>,
}

impl Default for Broker {
    fn default() -> Self {
        Broker::new(BrokerConfig::default())
    }
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Broker {
        let events = EventBus::new(config.event_capacity.max(1));

        Broker {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(BrokerState::default()),
                connect_lock: Mutex::new(()),
                events,
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.shared.config
    }

    /// Subscribes to the stream of broker state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.shared.events.subscribe()
    }

    /// Starts the delivery scheduler on the current tokio runtime.
    pub fn start(&self) -> DispatcherHandle {
        Dispatcher::new(self.clone()).spawn()
    }

    pub async fn connect(&self) {
        channel::open_connection(self).await
    }

    /// Closes the connection. Pending messages stay queued and the scheduler
    /// stops dispatching until the next connect.
    pub async fn disconnect(&self) {
        channel::close_connection(self).await
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.shared.state.lock().await.connection
    }

    async fn ensure_connected(&self) {
        if !self.connection_state().await.is_connected() {
            self.connect().await;
        }
    }

    /// Declares a queue if absent and reports its current counters.
    pub async fn assert_queue(&self, def: QueueDefinition) -> QueueInfo {
        self.ensure_connected().await;

        let name = def.name.clone();
        let mut state = self.shared.state.lock().await;
        if state.topology.assert_queue(def) {
            debug!(queue = %name, "queue created");
            self.shared
                .events
                .emit(BrokerEvent::QueueAsserted { queue: name.clone() });
        }

        QueueInfo {
            message_count: state.topology.queue(&name).map_or(0, |q| q.message_count()),
            consumer_count: state.consumers.count(&name),
            queue: name,
        }
    }

    /// Declares an exchange if absent. An existing exchange is returned as is,
    /// whatever type was requested.
    ///
    /// The empty name is reserved for the default exchange and is never stored.
    pub async fn assert_exchange(&self, def: ExchangeDefinition) -> ExchangeInfo {
        if def.name.is_empty() {
            debug!("the default exchange is implicit, nothing to declare");
            return ExchangeInfo {
                exchange: String::new(),
                kind: ExchangeKind::Direct,
            };
        }

        self.ensure_connected().await;

        let mut state = self.shared.state.lock().await;
        let (info, created) = state.topology.assert_exchange(def);
        if created {
            debug!(exchange = %info.exchange, kind = %info.kind, "exchange created");
            self.shared.events.emit(BrokerEvent::ExchangeAsserted {
                exchange: info.exchange.clone(),
            });
        }

        info
    }

    /// Reports a queue's counters, failing if it is not declared.
    pub async fn check_queue(&self, name: &str) -> Result<QueueInfo, AmqpError> {
        self.shared.state.lock().await.queue_info(name)
    }

    pub async fn check_exchange(&self, name: &str) -> Result<ExchangeInfo, AmqpError> {
        let state = self.shared.state.lock().await;
        state
            .topology
            .exchange(name)
            .map(|ex| ExchangeInfo {
                exchange: ex.name().to_owned(),
                kind: ex.kind(),
            })
            .ok_or_else(|| AmqpError::ExchangeNotFound(name.to_owned()))
    }

    pub async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), AmqpError> {
        self.ensure_connected().await;

        let mut state = self.shared.state.lock().await;
        state.topology.bind_queue(queue, exchange, pattern)?;

        debug!(queue, exchange, pattern, "queue bound");
        self.shared.events.emit(BrokerEvent::QueueBound {
            queue: queue.to_owned(),
            exchange: exchange.to_owned(),
            pattern: pattern.to_owned(),
        });
        Ok(())
    }

    /// Removes every binding of `queue` on `exchange` under `pattern`.
    pub async fn unbind_queue(
        &self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), AmqpError> {
        self.ensure_connected().await;

        let mut state = self.shared.state.lock().await;
        if state.topology.unbind_queue(queue, exchange, pattern)? > 0 {
            self.shared.events.emit(BrokerEvent::QueueUnbound {
                queue: queue.to_owned(),
                exchange: exchange.to_owned(),
                pattern: pattern.to_owned(),
            });
        }
        Ok(())
    }

    /// Deletes a queue with its bindings and consumers. Returns the number of
    /// pending messages discarded.
    pub async fn delete_queue(&self, name: &str) -> Result<usize, AmqpError> {
        self.ensure_connected().await;

        let mut state = self.shared.state.lock().await;
        let queue = state.topology.delete_queue(name)?;
        let cancelled = state.consumers.remove_queue(name);

        for consumer in cancelled {
            self.shared.events.emit(BrokerEvent::ConsumerCancelled {
                queue: name.to_owned(),
                consumer_tag: consumer.tag,
            });
        }
        self.shared.events.emit(BrokerEvent::QueueDeleted {
            queue: name.to_owned(),
        });

        debug!(queue = name, "queue deleted");
        Ok(queue.message_count())
    }

    /// Deletes an exchange; its bindings go with it.
    pub async fn delete_exchange(&self, name: &str) -> Result<(), AmqpError> {
        self.ensure_connected().await;

        let mut state = self.shared.state.lock().await;
        state.topology.delete_exchange(name)?;

        debug!(exchange = name, "exchange deleted");
        self.shared.events.emit(BrokerEvent::ExchangeDeleted {
            exchange: name.to_owned(),
        });
        Ok(())
    }

    /// Drops every pending message of a queue, returning how many were removed.
    pub async fn purge_queue(&self, name: &str) -> Result<usize, AmqpError> {
        self.ensure_connected().await;

        let mut state = self.shared.state.lock().await;
        let queue = state
            .topology
            .queue_mut(name)
            .ok_or_else(|| AmqpError::QueueNotFound(name.to_owned()))?;

        let count = queue.purge();
        self.shared.events.emit(BrokerEvent::QueuePurged {
            queue: name.to_owned(),
            count,
        });
        Ok(count)
    }

    /// Publishes `content` on `exchange`.
    ///
    /// The empty exchange name addresses the default exchange, which delivers
    /// to the queue named by `routing_key`. Returns whether at least one queue
    /// received the message; unroutable messages are dropped.
    pub async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        content: Vec<u8>,
        options: PublishOptions,
    ) -> Result<bool, AmqpError> {
        self.ensure_connected().await;

        let properties = options.into_properties();
        let mut state = self.shared.state.lock().await;

        let targets = if exchange.is_empty() {
            match state.topology.queue(routing_key) {
                Some(_) => vec![routing_key.to_owned()],
                None => vec![],
            }
        } else {
            let Some(ex) = state.topology.exchange(exchange) else {
                error!(exchange, routing_key, "failure to publish, exchange not declared");
                return Err(AmqpError::ExchangeNotFound(exchange.to_owned()));
            };
            router::route(ex, routing_key)
        };

        if targets.is_empty() {
            debug!(exchange, routing_key, "message unroutable, dropping it");
            return Ok(false);
        }

        let mut routed = false;
        for queue in &targets {
            routed |= state.enqueue(
                &self.shared.events,
                queue,
                exchange,
                routing_key,
                &content,
                &properties,
            );
        }

        debug!(exchange, routing_key, copies = targets.len(), "message published");
        Ok(routed)
    }

    /// Serializes `payload` as JSON and publishes it with the JSON content type.
    pub async fn publish_json<T: Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &T,
        options: PublishOptions,
    ) -> Result<bool, AmqpError> {
        let content = encode_json(payload)?;
        self.publish(
            exchange,
            routing_key,
            content,
            options.content_type(JSON_CONTENT_TYPE),
        )
        .await
    }

    /// Appends `content` directly to `queue`, bypassing routing. The message
    /// records an empty exchange and the queue name as routing key.
    pub async fn send_to_queue(
        &self,
        queue: &str,
        content: Vec<u8>,
        options: PublishOptions,
    ) -> Result<bool, AmqpError> {
        self.ensure_connected().await;

        let properties = options.into_properties();
        let mut state = self.shared.state.lock().await;

        if state.topology.queue(queue).is_none() {
            error!(queue, "failure to send, queue not declared");
            return Err(AmqpError::QueueNotFound(queue.to_owned()));
        }

        Ok(state.enqueue(&self.shared.events, queue, "", queue, &content, &properties))
    }

    /// Registers `handler` as a consumer of `queue` and returns its consumer tag.
    pub async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn ConsumerHandler>,
        options: ConsumeOptions,
    ) -> Result<String, AmqpError> {
        self.ensure_connected().await;

        let mut state = self.shared.state.lock().await;
        if state.topology.queue(queue).is_none() {
            error!(queue, "failure to consume, queue not declared");
            return Err(AmqpError::QueueNotFound(queue.to_owned()));
        }

        let consumer = Consumer::new(queue, handler, options);
        let tag = consumer.tag.clone();
        state.consumers.register(consumer)?;

        debug!(queue, consumer_tag = %tag, no_ack = options.no_ack, "consumer registered");
        self.shared.events.emit(BrokerEvent::ConsumerRegistered {
            queue: queue.to_owned(),
            consumer_tag: tag.clone(),
        });
        Ok(tag)
    }

    /// Unregisters a consumer. Deliveries it has not acknowledged stay outstanding.
    pub async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        let mut state = self.shared.state.lock().await;
        let consumer = state
            .consumers
            .cancel(consumer_tag)
            .ok_or_else(|| AmqpError::ConsumerNotFound(consumer_tag.to_owned()))?;

        debug!(queue = %consumer.queue, consumer_tag, "consumer cancelled");
        self.shared.events.emit(BrokerEvent::ConsumerCancelled {
            queue: consumer.queue,
            consumer_tag: consumer_tag.to_owned(),
        });
        Ok(())
    }

    /// Acknowledges a delivery, discarding the message for good. Unknown or
    /// already settled deliveries are ignored.
    pub async fn ack(&self, message: &Message) {
        let mut state = self.shared.state.lock().await;
        let delivery_tag = message.delivery_tag();

        if state.unacked.remove(&delivery_tag).is_some() {
            debug!(delivery_tag, "message acked");
            self.shared
                .events
                .emit(BrokerEvent::Acked { delivery_tag });
        } else {
            debug!(delivery_tag, "ack for unknown delivery ignored");
        }
    }

    /// Rejects a delivery: back to the front of its queue when `requeue` is
    /// set, discarded otherwise. Unknown or already settled deliveries are ignored.
    pub async fn reject(&self, message: &Message, requeue: bool) {
        let mut state = self.shared.state.lock().await;
        let delivery_tag = message.delivery_tag();

        let Some(unacked) = state.unacked.remove(&delivery_tag) else {
            debug!(delivery_tag, "reject for unknown delivery ignored");
            return;
        };

        if requeue {
            state.requeue(&self.shared.events, &unacked.queue, unacked.message);
        } else {
            debug!(queue = %unacked.queue, delivery_tag, "message rejected");
            self.shared.events.emit(BrokerEvent::Dropped {
                queue: unacked.queue,
                delivery_tag,
            });
        }
    }

    pub async fn get_message_count(&self, queue: &str) -> Result<usize, AmqpError> {
        self.check_queue(queue).await.map(|info| info.message_count)
    }

    pub async fn get_consumer_count(&self, queue: &str) -> Result<usize, AmqpError> {
        self.check_queue(queue).await.map(|info| info.consumer_count)
    }

    /// Number of deliveries waiting for an ack or reject.
    pub async fn unacked_count(&self) -> usize {
        self.shared.state.lock().await.unacked.len()
    }

    /// Queues in declaration order.
    pub async fn list_queues(&self) -> Vec<QueueInfo> {
        let state = self.shared.state.lock().await;
        state
            .topology
            .queue_names()
            .iter()
            .filter_map(|name| state.queue_info(name).ok())
            .collect()
    }

    /// Exchanges sorted by name.
    pub async fn list_exchanges(&self) -> Vec<ExchangeInfo> {
        let state = self.shared.state.lock().await;
        let mut exchanges: Vec<ExchangeInfo> = state
            .topology
            .exchanges()
            .map(|ex| ExchangeInfo {
                exchange: ex.name().to_owned(),
                kind: ex.kind(),
            })
            .collect();
        exchanges.sort_by(|a, b| a.exchange.cmp(&b.exchange));
        exchanges
    }

    /// Snapshot of the pending messages of a queue, oldest first.
    pub async fn peek_messages(&self, queue: &str) -> Result<Vec<Message>, AmqpError> {
        let state = self.shared.state.lock().await;
        state
            .topology
            .queue(queue)
            .map(|q| q.messages().cloned().collect())
            .ok_or_else(|| AmqpError::QueueNotFound(queue.to_owned()))
    }
}
