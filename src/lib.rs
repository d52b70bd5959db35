// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-process AMQP-style message broker emulator.
//!
//! Exchanges, queues and bindings are declared on a [`broker::Broker`]; published
//! messages are routed to queues by exchange type (direct, fanout, topic, headers)
//! and handed to registered consumers by the delivery scheduler in
//! [`dispatcher`], with acknowledgment and requeue on failure.

mod otel;

pub mod broker;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod errors;
pub mod events;
pub mod exchange;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod router;
pub mod topology;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use errors::AmqpError;
