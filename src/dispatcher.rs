// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Scheduler
//!
//! The dispatcher moves messages from queues to consumers. Each tick visits the
//! queues in declaration order and, for every queue holding a message and at
//! least one consumer, pops the oldest message and hands it to one consumer.
//!
//! Outcome handling:
//! - success in no-ack mode: the message is gone
//! - success otherwise: the delivery stays outstanding until `Broker::ack` or
//!   `Broker::reject`; nothing resolves it automatically
//! - failure in no-ack mode: the message is lost
//! - failure otherwise: the message goes back to the front of its queue, flagged
//!   redelivered, unless the handler already settled it
//!
//! A queue with a delivery still inside its handler is skipped, so a handler
//! that never returns only stalls its own queue.

use crate::{
    broker::{Broker, Unacked},
    consumer::{self, Consumer},
    errors::AmqpError,
    events::BrokerEvent,
    message::Message,
};
use futures_util::future::join_all;
use opentelemetry::global;
use std::time::Duration;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Name of the tracer used for consumer spans.
pub const TRACER_NAME: &str = "amqp consumer";

/// A message popped for a consumer, not yet settled.
struct PendingDelivery {
    queue: String,
    queue_id: u64,
    consumer: Consumer,
    message: Message,
}

/// Runs scheduling rounds against one broker.
#[derive(Clone)]
pub struct Dispatcher {
    broker: Broker,
}

impl Dispatcher {
    pub fn new(broker: Broker) -> Dispatcher {
        Dispatcher { broker }
    }

    /// Runs one scheduling round and waits for the handlers it invoked.
    ///
    /// Returns the number of messages dispatched. Does nothing while the
    /// broker is disconnected.
    pub async fn tick(&self) -> usize {
        let deliveries = self.take_deliveries().await;
        let count = deliveries.len();

        join_all(deliveries.into_iter().map(|d| self.deliver(d))).await;

        count
    }

    /// Pops at most one message per eligible queue, recording outstanding
    /// deliveries before any handler runs.
    async fn take_deliveries(&self) -> Vec<PendingDelivery> {
        let shared = &self.broker.shared;
        let mut guard = shared.state.lock().await;
        let state = &mut *guard;

        if !state.connection.is_connected() {
            return vec![];
        }

        let mut deliveries = vec![];
        for name in state.topology.queue_names().to_vec() {
            let ready = state
                .topology
                .queue(&name)
                .is_some_and(|q| !q.in_flight && q.message_count() > 0);
            if !ready {
                continue;
            }

            let Some(consumer) = state
                .consumers
                .select(&name, shared.config.consumer_selection)
            else {
                continue;
            };

            let Some((queue_id, message)) = state.topology.queue_mut(&name).and_then(|q| {
                let message = q.dequeue()?;
                q.in_flight = true;
                Some((q.id, message))
            }) else {
                continue;
            };

            if !consumer.options.no_ack {
                state.unacked.insert(
                    message.delivery_tag(),
                    Unacked {
                        queue: name.clone(),
                        message: message.clone(),
                    },
                );
            }

            shared.events.emit(BrokerEvent::Delivered {
                queue: name.clone(),
                consumer_tag: consumer.tag.clone(),
                delivery_tag: message.delivery_tag(),
                redelivered: message.redelivered(),
            });

            deliveries.push(PendingDelivery {
                queue: name,
                queue_id,
                consumer,
                message,
            });
        }

        deliveries
    }

    async fn deliver(&self, delivery: PendingDelivery) {
        let tracer = global::tracer(TRACER_NAME);
        let result = consumer::consume(&tracer, &delivery.message, &delivery.consumer).await;

        let shared = &self.broker.shared;
        let mut state = shared.state.lock().await;
        // a queue recreated under the same name meanwhile is not ours to release
        if let Some(queue) = state.topology.queue_mut(&delivery.queue) {
            if queue.id == delivery.queue_id {
                queue.in_flight = false;
            }
        }

        let delivery_tag = delivery.message.delivery_tag();
        let no_ack = delivery.consumer.options.no_ack;

        match result {
            Ok(()) if no_ack => {
                shared.events.emit(BrokerEvent::Acked { delivery_tag });
            }
            Ok(()) => {
                if state.unacked.contains_key(&delivery_tag) {
                    debug!(
                        queue = %delivery.queue,
                        delivery_tag,
                        "handler returned without settling, waiting for explicit ack"
                    );
                }
            }
            Err(_) if no_ack => {
                warn!(queue = %delivery.queue, delivery_tag, "handler failed in no-ack mode, message lost");
                shared.events.emit(BrokerEvent::Dropped {
                    queue: delivery.queue,
                    delivery_tag,
                });
            }
            Err(_) => {
                let outstanding = state.unacked.remove(&delivery_tag);
                match outstanding {
                    Some(unacked) => {
                        state.requeue(&shared.events, &unacked.queue, unacked.message)
                    }
                    None => debug!(delivery_tag, "failed delivery already settled by its handler"),
                }
            }
        }
    }

    /// Runs ticks on the configured interval until the returned handle is shut down.
    ///
    /// Every tick runs in its own task so a slow handler does not hold back
    /// queues that are ready.
    pub fn spawn(self) -> DispatcherHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = self
            .broker
            .config()
            .tick_interval()
            .max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(interval_ms = period.as_millis() as u64, "delivery scheduler started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("delivery scheduler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let dispatcher = self.clone();
                        tokio::spawn(async move {
                            dispatcher.tick().await;
                        });
                    }
                }
            }
        });

        DispatcherHandle { cancel, task }
    }
}

/// Owner of a running scheduler task.
pub struct DispatcherHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Token cancelling the scheduler, for callers wiring it into their own shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops scheduling new rounds and waits for the loop to exit. Handlers
    /// already running are left to finish on their own.
    pub async fn shutdown(self) -> Result<(), AmqpError> {
        self.cancel.cancel();
        self.task.await.map_err(|err| {
            error!(error = err.to_string(), "delivery scheduler task failed");
            AmqpError::InternalError
        })
    }
}
