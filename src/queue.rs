// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Management
//!
//! This module provides types for defining queues, binding them to exchanges and
//! holding their pending messages. A queue is FIFO except for requeued
//! messages, which go back to the front to be retried before newer arrivals.

use crate::message::Message;
use std::collections::VecDeque;

/// Definition of a queue with its configuration parameters.
///
/// This struct implements the builder pattern to create and configure queue definitions.
/// The flags are recorded for introspection; the emulator keeps every queue in memory
/// for the lifetime of the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name.
    ///
    /// By default, the queue is created with standard settings (non-durable, non-exclusive, etc.)
    ///
    /// # Parameters
    /// * `name` - The name of the queue
    ///
    /// # Returns
    /// A new queue definition with default settings
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            durable: false,
            delete: false,
            exclusive: false,
        }
    }

    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

/// Configuration for binding a queue to an exchange.
///
/// Queue bindings define how messages flow from exchanges to queues based on
/// routing keys and exchange types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding<'qeb> {
    pub(crate) queue_name: &'qeb str,
    pub(crate) exchange_name: &'qeb str,
    pub(crate) routing_key: &'qeb str,
}

impl<'qeb> QueueBinding<'qeb> {
    /// Creates a new queue binding for the given queue.
    ///
    /// By default, the exchange name and routing key are empty strings.
    /// These should be set using the `exchange` and `routing_key` methods.
    pub fn new(queue: &'qeb str) -> QueueBinding<'qeb> {
        QueueBinding {
            queue_name: queue,
            exchange_name: "",
            routing_key: "",
        }
    }

    pub fn exchange(mut self, exchange: &'qeb str) -> Self {
        self.exchange_name = exchange;
        self
    }

    /// Sets the binding pattern matched against routing keys.
    pub fn routing_key(mut self, key: &'qeb str) -> Self {
        self.routing_key = key;
        self
    }
}

/// A declared queue and its pending messages.
#[derive(Debug, Clone)]
pub struct Queue {
    /// Distinguishes this queue from earlier ones declared under the same name.
    pub(crate) id: u64,
    pub(crate) definition: QueueDefinition,
    pub(crate) messages: VecDeque<Message>,
    /// Set while one of its messages is inside a handler.
    pub(crate) in_flight: bool,
}

impl Queue {
    pub(crate) fn new(id: u64, definition: QueueDefinition) -> Queue {
        Queue {
            id,
            definition,
            messages: VecDeque::new(),
            in_flight: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &QueueDefinition {
        &self.definition
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Pending messages, oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub(crate) fn enqueue(&mut self, message: Message) {
        self.messages.push_back(message);
    }

    pub(crate) fn dequeue(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    /// Puts a message back at the front, flagged as redelivered. It lands
    /// behind messages already requeued there so retries keep their order.
    pub(crate) fn requeue(&mut self, mut message: Message) {
        message.mark_redelivered();
        let at = self
            .messages
            .iter()
            .take_while(|m| m.redelivered())
            .count();
        self.messages.insert(at, message);
    }

    pub(crate) fn purge(&mut self) -> usize {
        let count = self.messages.len();
        self.messages.clear();
        count
    }
}

/// Result of asserting or checking a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub queue: String,
    pub message_count: usize,
    pub consumer_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::BasicProperties;

    fn msg(tag: u64) -> Message {
        Message::new(vec![], BasicProperties::default(), "", "q", tag)
    }

    fn tags(queue: &Queue) -> Vec<u64> {
        queue.messages().map(|m| m.delivery_tag()).collect()
    }

    #[test]
    fn dequeues_in_insertion_order() {
        let mut queue = Queue::new(1, QueueDefinition::new("q"));
        for tag in 1..=5 {
            queue.enqueue(msg(tag));
        }

        let drained: Vec<u64> = std::iter::from_fn(|| queue.dequeue())
            .map(|m| m.delivery_tag())
            .collect();
        assert_eq!(drained, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn requeue_goes_to_front_behind_earlier_requeues() {
        let mut queue = Queue::new(1, QueueDefinition::new("q"));
        for tag in 1..=4 {
            queue.enqueue(msg(tag));
        }
        let first = queue.dequeue().unwrap();
        let second = queue.dequeue().unwrap();

        queue.requeue(first);
        queue.requeue(second);

        assert_eq!(tags(&queue), vec![1, 2, 3, 4]);
        assert!(queue.messages().take(2).all(|m| m.redelivered()));
        assert!(queue.messages().skip(2).all(|m| !m.redelivered()));
    }

    #[test]
    fn purge_reports_removed_count() {
        let mut queue = Queue::new(1, QueueDefinition::new("q"));
        queue.enqueue(msg(1));
        queue.enqueue(msg(2));

        assert_eq!(queue.purge(), 2);
        assert_eq!(queue.message_count(), 0);
    }
}
