// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Management
//!
//! This module provides types for defining exchanges and the bindings attached
//! to them. Exchanges are the routing entities of the broker: they receive
//! published messages and forward them to bound queues according to their type.

use crate::errors::AmqpError;
use std::{fmt, str::FromStr};

/// Represents the types of exchanges supported by the broker.
///
/// Each exchange type has specific routing behavior:
/// - Direct: Routes messages to queues whose binding pattern equals the routing key
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Currently routes like Fanout; header matching is not implemented
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = AmqpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(ExchangeKind::Direct),
            "fanout" => Ok(ExchangeKind::Fanout),
            "topic" => Ok(ExchangeKind::Topic),
            "headers" => Ok(ExchangeKind::Headers),
            other => Err(AmqpError::InvalidExchangeKind(other.to_owned())),
        }
    }
}

/// Definition of an exchange with its configuration parameters.
///
/// This struct implements the builder pattern to create and configure exchange definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
}

impl ExchangeDefinition {
    /// Creates a new exchange definition with the given name.
    ///
    /// By default, the exchange is created as a Direct exchange with default parameters.
    ///
    /// # Parameters
    /// * `name` - The name of the exchange
    ///
    /// # Returns
    /// A new exchange definition with default settings
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Direct,
            durable: false,
            delete: false,
        }
    }

    /// Sets the exchange type.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn direct(self) -> Self {
        self.kind(ExchangeKind::Direct)
    }

    pub fn fanout(self) -> Self {
        self.kind(ExchangeKind::Fanout)
    }

    pub fn topic(self) -> Self {
        self.kind(ExchangeKind::Topic)
    }

    pub fn headers(self) -> Self {
        self.kind(ExchangeKind::Headers)
    }

    /// Marks the exchange durable. The flag is recorded but nothing survives
    /// the broker value.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the exchange to auto-delete when no longer used. Recorded only.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Association of a queue to an exchange under a routing pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub queue: String,
    pub pattern: String,
}

/// A declared exchange with its ordered bindings.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub(crate) definition: ExchangeDefinition,
    pub(crate) bindings: Vec<Binding>,
}

impl Exchange {
    pub(crate) fn new(definition: ExchangeDefinition) -> Exchange {
        Exchange {
            definition,
            bindings: vec![],
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn kind(&self) -> ExchangeKind {
        self.definition.kind
    }

    pub fn definition(&self) -> &ExchangeDefinition {
        &self.definition
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Appends a binding. Identical bindings are kept side by side.
    pub(crate) fn bind(&mut self, queue: &str, pattern: &str) {
        self.bindings.push(Binding {
            queue: queue.to_owned(),
            pattern: pattern.to_owned(),
        });
    }

    /// Removes every binding matching `queue` and `pattern`, returning how many went.
    pub(crate) fn unbind(&mut self, queue: &str, pattern: &str) -> usize {
        let before = self.bindings.len();
        self.bindings
            .retain(|b| !(b.queue == queue && b.pattern == pattern));
        before - self.bindings.len()
    }

    pub(crate) fn unbind_queue(&mut self, queue: &str) {
        self.bindings.retain(|b| b.queue != queue);
    }
}

/// Result of asserting an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeInfo {
    pub exchange: String,
    /// Type of the exchange as stored, which may differ from the requested one
    /// when the exchange already existed.
    pub kind: ExchangeKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_its_name() {
        for kind in [
            ExchangeKind::Direct,
            ExchangeKind::Fanout,
            ExchangeKind::Topic,
            ExchangeKind::Headers,
        ] {
            assert_eq!(kind.to_string().parse::<ExchangeKind>().unwrap(), kind);
        }
        assert_eq!(
            "x-delayed-message".parse::<ExchangeKind>().unwrap_err(),
            AmqpError::InvalidExchangeKind("x-delayed-message".to_owned())
        );
    }

    #[test]
    fn unbind_removes_only_matching_pairs() {
        let mut exchange = Exchange::new(ExchangeDefinition::new("events").topic());
        exchange.bind("q1", "health.*");
        exchange.bind("q1", "health.*");
        exchange.bind("q1", "health.#");
        exchange.bind("q2", "health.*");

        assert_eq!(exchange.unbind("q1", "health.*"), 2);
        assert_eq!(exchange.bindings().len(), 2);

        exchange.unbind_queue("q2");
        assert_eq!(
            exchange.bindings(),
            &[Binding {
                queue: "q1".to_owned(),
                pattern: "health.#".to_owned()
            }]
        );
    }
}
