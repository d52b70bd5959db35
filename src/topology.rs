// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Management
//!
//! This module owns the broker's exchanges, queues and the bindings between them.
//!
//! The main components are:
//! - `TopologyRegistry`: the in-memory registry consulted by routing and scheduling
//! - `Topology` trait: declarative interface for describing a topology up front
//! - `AmqpTopology`: implementation of the Topology trait that installs on a `Broker`

use crate::{
    broker::Broker,
    errors::AmqpError,
    exchange::{Exchange, ExchangeDefinition, ExchangeInfo},
    queue::{Queue, QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, error};

/// Exchanges and queues of one broker, keyed by name.
///
/// Queues are iterated in declaration order, which is the order the delivery
/// scheduler visits them in.
#[derive(Debug, Default)]
pub(crate) struct TopologyRegistry {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    queue_order: Vec<String>,
    last_queue_id: u64,
}

impl TopologyRegistry {
    /// Declares an exchange unless one with the same name exists. An existing
    /// exchange keeps its original type and flags.
    ///
    /// Returns the stored exchange info and whether it was created.
    pub(crate) fn assert_exchange(&mut self, def: ExchangeDefinition) -> (ExchangeInfo, bool) {
        if let Some(existing) = self.exchanges.get(&def.name) {
            if existing.kind() != def.kind {
                debug!(
                    exchange = %def.name,
                    stored = %existing.kind(),
                    requested = %def.kind,
                    "exchange already declared with another type, keeping the stored one"
                );
            }
            return (
                ExchangeInfo {
                    exchange: def.name,
                    kind: existing.kind(),
                },
                false,
            );
        }

        let info = ExchangeInfo {
            exchange: def.name.clone(),
            kind: def.kind,
        };
        self.exchanges.insert(def.name.clone(), Exchange::new(def));
        (info, true)
    }

    /// Declares a queue unless one with the same name exists. Returns whether it was created.
    pub(crate) fn assert_queue(&mut self, def: QueueDefinition) -> bool {
        if self.queues.contains_key(&def.name) {
            return false;
        }

        self.last_queue_id += 1;
        self.queue_order.push(def.name.clone());
        self.queues
            .insert(def.name.clone(), Queue::new(self.last_queue_id, def));
        true
    }

    pub(crate) fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), AmqpError> {
        if !self.queues.contains_key(queue) {
            error!(queue, exchange, "failure to bind, queue not declared");
            return Err(AmqpError::QueueNotFound(queue.to_owned()));
        }

        let Some(ex) = self.exchanges.get_mut(exchange) else {
            error!(queue, exchange, "failure to bind, exchange not declared");
            return Err(AmqpError::ExchangeNotFound(exchange.to_owned()));
        };

        ex.bind(queue, pattern);
        Ok(())
    }

    /// Removes the bindings of `queue` on `exchange` under `pattern`; returns how many were removed.
    pub(crate) fn unbind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<usize, AmqpError> {
        if !self.queues.contains_key(queue) {
            return Err(AmqpError::QueueNotFound(queue.to_owned()));
        }

        match self.exchanges.get_mut(exchange) {
            Some(ex) => Ok(ex.unbind(queue, pattern)),
            None => Err(AmqpError::ExchangeNotFound(exchange.to_owned())),
        }
    }

    /// Removes a queue and every binding that points at it.
    pub(crate) fn delete_queue(&mut self, name: &str) -> Result<Queue, AmqpError> {
        let Some(queue) = self.queues.remove(name) else {
            return Err(AmqpError::QueueNotFound(name.to_owned()));
        };

        self.queue_order.retain(|q| q != name);
        for exchange in self.exchanges.values_mut() {
            exchange.unbind_queue(name);
        }

        Ok(queue)
    }

    /// Removes an exchange together with its bindings.
    pub(crate) fn delete_exchange(&mut self, name: &str) -> Result<Exchange, AmqpError> {
        self.exchanges
            .remove(name)
            .ok_or_else(|| AmqpError::ExchangeNotFound(name.to_owned()))
    }

    pub(crate) fn exchange(&self, name: &str) -> Option<&Exchange> {
        self.exchanges.get(name)
    }

    pub(crate) fn queue(&self, name: &str) -> Option<&Queue> {
        self.queues.get(name)
    }

    pub(crate) fn queue_mut(&mut self, name: &str) -> Option<&mut Queue> {
        self.queues.get_mut(name)
    }

    /// Queue names in declaration order.
    pub(crate) fn queue_names(&self) -> &[String] {
        &self.queue_order
    }

    pub(crate) fn exchanges(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.values()
    }
}

/// Trait defining the interface for declarative topology management.
///
/// This trait provides methods for registering exchanges, queues, and bindings,
/// and then installing all of them in one call.
#[async_trait]
pub trait Topology<'tp> {
    /// Adds an exchange definition to the topology.
    fn exchange(self, def: &'tp ExchangeDefinition) -> Self;

    /// Adds a queue definition to the topology.
    fn queue(self, def: &'tp QueueDefinition) -> Self;

    /// Adds a queue-to-exchange binding to the topology.
    fn queue_binding(self, binding: &'tp QueueBinding<'tp>) -> Self;

    /// Declares every exchange, then every queue, then every binding.
    async fn install(&self) -> Result<(), AmqpError>;
}

/// Topology collected from definitions and installed on a `Broker`.
pub struct AmqpTopology<'tp> {
    broker: Broker,
    pub(crate) queues: Vec<&'tp QueueDefinition>,
    pub(crate) queues_binding: Vec<&'tp QueueBinding<'tp>>,
    pub(crate) exchanges: Vec<&'tp ExchangeDefinition>,
}

impl<'tp> AmqpTopology<'tp> {
    pub fn new(broker: &Broker) -> AmqpTopology<'tp> {
        AmqpTopology {
            broker: broker.clone(),
            queues: vec![],
            queues_binding: vec![],
            exchanges: vec![],
        }
    }
}

#[async_trait]
impl<'tp> Topology<'tp> for AmqpTopology<'tp> {
    fn exchange(mut self, def: &'tp ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    fn queue(mut self, def: &'tp QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    fn queue_binding(mut self, binding: &'tp QueueBinding<'tp>) -> Self {
        self.queues_binding.push(binding);
        self
    }

    async fn install(&self) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!("creating exchange: {}", exch.name);
            self.broker.assert_exchange((*exch).clone()).await;
        }

        for def in &self.queues {
            debug!("creating queue: {}", def.name);
            self.broker.assert_queue((*def).clone()).await;
        }

        for binding in &self.queues_binding {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );
            self.broker
                .bind_queue(
                    binding.queue_name,
                    binding.exchange_name,
                    binding.routing_key,
                )
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::BrokerConfig, exchange::ExchangeKind};
    use std::time::Duration;

    #[test]
    fn assert_is_idempotent_and_first_writer_wins() {
        let mut registry = TopologyRegistry::default();

        let (info, created) = registry.assert_exchange(ExchangeDefinition::new("events").topic());
        assert!(created);
        assert_eq!(info.kind, ExchangeKind::Topic);

        let (info, created) = registry.assert_exchange(ExchangeDefinition::new("events").fanout());
        assert!(!created);
        assert_eq!(info.kind, ExchangeKind::Topic);

        assert!(registry.assert_queue(QueueDefinition::new("q1")));
        assert!(!registry.assert_queue(QueueDefinition::new("q1").durable()));
        assert_eq!(registry.queue_names(), &["q1".to_owned()]);
        assert!(!registry.queue("q1").unwrap().definition().is_durable());
    }

    #[test]
    fn bind_requires_both_sides() {
        let mut registry = TopologyRegistry::default();
        registry.assert_queue(QueueDefinition::new("q1"));

        assert_eq!(
            registry.bind_queue("q1", "missing", "a"),
            Err(AmqpError::ExchangeNotFound("missing".to_owned()))
        );

        registry.assert_exchange(ExchangeDefinition::new("events"));
        assert_eq!(
            registry.bind_queue("ghost", "events", "a"),
            Err(AmqpError::QueueNotFound("ghost".to_owned()))
        );
        assert!(registry.bind_queue("q1", "events", "a").is_ok());
    }

    #[test]
    fn delete_queue_drops_its_bindings() {
        let mut registry = TopologyRegistry::default();
        registry.assert_exchange(ExchangeDefinition::new("events").fanout());
        registry.assert_queue(QueueDefinition::new("q1"));
        registry.assert_queue(QueueDefinition::new("q2"));
        registry.bind_queue("q1", "events", "").unwrap();
        registry.bind_queue("q2", "events", "").unwrap();

        registry.delete_queue("q1").unwrap();

        let bindings = registry.exchange("events").unwrap().bindings();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].queue, "q2");
        assert_eq!(registry.queue_names(), &["q2".to_owned()]);
        assert!(matches!(
            registry.delete_queue("q1"),
            Err(AmqpError::QueueNotFound(_))
        ));
    }

    #[test]
    fn delete_exchange_fails_when_missing() {
        let mut registry = TopologyRegistry::default();
        assert!(matches!(
            registry.delete_exchange("nope"),
            Err(AmqpError::ExchangeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn install_declares_everything_in_order() {
        let broker = Broker::new(BrokerConfig::default().with_connect_latency(Duration::ZERO));

        let exchange = ExchangeDefinition::new("events").topic();
        let queue = QueueDefinition::new("sleep");
        let binding = QueueBinding::new("sleep")
            .exchange("events")
            .routing_key("health.sleep.#");

        AmqpTopology::new(&broker)
            .exchange(&exchange)
            .queue(&queue)
            .queue_binding(&binding)
            .install()
            .await
            .unwrap();

        assert!(broker.publish("events", "health.sleep.nightly", vec![1], Default::default())
            .await
            .unwrap());
        assert_eq!(broker.get_message_count("sleep").await, Ok(1));
    }

    #[tokio::test]
    async fn install_fails_on_dangling_binding() {
        let broker = Broker::new(BrokerConfig::default().with_connect_latency(Duration::ZERO));
        let binding = QueueBinding::new("ghost").exchange("events");

        let result = AmqpTopology::new(&broker)
            .queue_binding(&binding)
            .install()
            .await;

        assert_eq!(result, Err(AmqpError::QueueNotFound("ghost".to_owned())));
    }
}
