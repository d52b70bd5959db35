// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Broker Emulator
//!
//! This module provides the error type shared by every broker operation.
//! Topology errors are returned synchronously to the caller that triggered them,
//! while handler failures are only observed by the delivery scheduler.

use thiserror::Error;

/// Represents errors that can occur during broker operations.
///
/// `ExchangeNotFound` and `QueueNotFound` are topology errors and are never
/// retried by the broker. `HandlerFailure` is what a consumer handler returns
/// to ask for a redelivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// The named exchange is not declared
    #[error("exchange `{0}` not found")]
    ExchangeNotFound(String),

    /// The named queue is not declared
    #[error("queue `{0}` not found")]
    QueueNotFound(String),

    /// No consumer is registered under the given tag
    #[error("consumer `{0}` not found")]
    ConsumerNotFound(String),

    /// The queue already has an exclusive consumer, or exclusivity was requested
    /// on a queue that already has consumers
    #[error("queue `{0}` is locked by an exclusive consumer")]
    ExclusiveConsumerError(String),

    /// Unknown exchange type name
    #[error("invalid exchange type `{0}`")]
    InvalidExchangeKind(String),

    /// Error parsing a message payload
    #[error("failure to parse payload")]
    ParsePayloadError,

    /// A consumer handler could not process a message
    #[error("handler failure: {0}")]
    HandlerFailure(String),

    /// Invalid broker configuration value
    #[error("invalid configuration `{0}`")]
    ConfigError(String),
}
