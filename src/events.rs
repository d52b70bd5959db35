// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Events
//!
//! Observers follow broker state changes through a `tokio::sync::broadcast`
//! channel. Every receiver sees events in the order the broker emitted them.
//! This stream is separate from message delivery: it never carries payloads and
//! a lagging observer cannot slow the broker down.

use crate::message::DeliveryTag;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Connected,
    Disconnected,
    ExchangeAsserted {
        exchange: String,
    },
    ExchangeDeleted {
        exchange: String,
    },
    QueueAsserted {
        queue: String,
    },
    QueueDeleted {
        queue: String,
    },
    QueueBound {
        queue: String,
        exchange: String,
        pattern: String,
    },
    QueueUnbound {
        queue: String,
        exchange: String,
        pattern: String,
    },
    QueuePurged {
        queue: String,
        count: usize,
    },
    Published {
        exchange: String,
        routing_key: String,
        queue: String,
        delivery_tag: DeliveryTag,
    },
    ConsumerRegistered {
        queue: String,
        consumer_tag: String,
    },
    ConsumerCancelled {
        queue: String,
        consumer_tag: String,
    },
    Delivered {
        queue: String,
        consumer_tag: String,
        delivery_tag: DeliveryTag,
        redelivered: bool,
    },
    Acked {
        delivery_tag: DeliveryTag,
    },
    Requeued {
        queue: String,
        delivery_tag: DeliveryTag,
    },
    /// A message left the broker without being acknowledged: handler failure
    /// in no-ack mode, or a reject without requeue.
    Dropped {
        queue: String,
        delivery_tag: DeliveryTag,
    },
}

/// Sending side of the event stream, owned by the broker.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<BrokerEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> EventBus {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.sender.subscribe()
    }

    /// Emits an event. Having no subscriber is not an error.
    pub(crate) fn emit(&self, event: BrokerEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_emission_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(BrokerEvent::Connected);
        bus.emit(BrokerEvent::QueueAsserted {
            queue: "q1".to_owned(),
        });

        assert_eq!(rx.recv().await.unwrap(), BrokerEvent::Connected);
        assert_eq!(
            rx.recv().await.unwrap(),
            BrokerEvent::QueueAsserted {
                queue: "q1".to_owned()
            }
        );
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new(1);
        bus.emit(BrokerEvent::Disconnected);
    }
}
