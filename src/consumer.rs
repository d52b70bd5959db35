// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Consumers
//!
//! This module provides the consumer side of the broker: the handler trait
//! invoked for every delivery, the options a consumer registers with, the
//! per-queue registry of consumers and the processing of a single delivery.

use crate::{config::ConsumerSelection, errors::AmqpError, message::Message, otel};
use async_trait::async_trait;
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
    Context,
};
use std::{borrow::Cow, collections::HashMap, future::Future, marker::PhantomData, sync::Arc};
use tracing::{debug, warn};
use uuid::Uuid;

/// Prefix of the generated consumer tags.
pub const CONSUMER_TAG_PREFIX: &str = "amq.ctag-";

/// Handler invoked by the delivery scheduler for each message of a queue.
///
/// Returning an error asks for a redelivery unless the consumer runs in no-ack
/// mode. Handlers registered without no-ack are expected to call
/// `Broker::ack` or `Broker::reject` themselves.
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn exec(&self, ctx: &Context, msg: &Message) -> Result<(), AmqpError>;
}

/// Adapter turning an async closure into a `ConsumerHandler`.
pub struct FnHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> ConsumerHandler for FnHandler<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AmqpError>> + Send + 'static,
{
    async fn exec(&self, _ctx: &Context, msg: &Message) -> Result<(), AmqpError> {
        (self.f)(msg.clone()).await
    }
}

/// Wraps an async closure receiving an owned `Message` into a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ConsumerHandler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AmqpError>> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _fut: PhantomData,
    })
}

/// Options a consumer registers with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    pub(crate) no_ack: bool,
    pub(crate) exclusive: bool,
    pub(crate) prefetch: Option<u16>,
}

impl ConsumeOptions {
    pub fn new() -> ConsumeOptions {
        ConsumeOptions::default()
    }

    /// Deliveries count as acknowledged as soon as they are handed out.
    pub fn no_ack(mut self) -> Self {
        self.no_ack = true;
        self
    }

    /// Requests to be the only consumer of the queue.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Advisory prefetch count. Stored but not enforced: the scheduler hands
    /// out at most one message per queue at a time anyway.
    pub fn prefetch(mut self, count: u16) -> Self {
        self.prefetch = Some(count);
        self
    }

    pub fn is_no_ack(&self) -> bool {
        self.no_ack
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn prefetch_count(&self) -> Option<u16> {
        self.prefetch
    }
}

/// A registered consumer.
#[derive(Clone)]
pub struct Consumer {
    pub(crate) tag: String,
    pub(crate) queue: String,
    pub(crate) handler: Arc<dyn ConsumerHandler>,
    pub(crate) options: ConsumeOptions,
}

impl Consumer {
    pub(crate) fn new(queue: &str, handler: Arc<dyn ConsumerHandler>, options: ConsumeOptions) -> Consumer {
        Consumer {
            tag: format!("{}{}", CONSUMER_TAG_PREFIX, Uuid::new_v4()),
            queue: queue.to_owned(),
            handler,
            options,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn options(&self) -> &ConsumeOptions {
        &self.options
    }
}

/// Consumers of every queue, in registration order.
#[derive(Default)]
pub(crate) struct ConsumerRegistry {
    consumers: HashMap<String, Vec<Consumer>>,
    cursors: HashMap<String, usize>,
}

impl ConsumerRegistry {
    pub(crate) fn register(&mut self, consumer: Consumer) -> Result<(), AmqpError> {
        let registered = self.consumers.entry(consumer.queue.clone()).or_default();

        let locked = registered.iter().any(|c| c.options.exclusive);
        if locked || (consumer.options.exclusive && !registered.is_empty()) {
            warn!(queue = %consumer.queue, "queue is exclusively consumed");
            return Err(AmqpError::ExclusiveConsumerError(consumer.queue));
        }

        registered.push(consumer);
        Ok(())
    }

    /// Unregisters the consumer with `tag`, returning it.
    pub(crate) fn cancel(&mut self, tag: &str) -> Option<Consumer> {
        let (queue, pos) = self.consumers.iter().find_map(|(queue, list)| {
            list.iter()
                .position(|c| c.tag == tag)
                .map(|pos| (queue.clone(), pos))
        })?;

        let list = self.consumers.get_mut(&queue)?;
        let consumer = list.remove(pos);
        if list.is_empty() {
            self.consumers.remove(&queue);
            self.cursors.remove(&queue);
        }

        Some(consumer)
    }

    pub(crate) fn remove_queue(&mut self, queue: &str) -> Vec<Consumer> {
        self.cursors.remove(queue);
        self.consumers.remove(queue).unwrap_or_default()
    }

    pub(crate) fn count(&self, queue: &str) -> usize {
        self.consumers.get(queue).map_or(0, Vec::len)
    }

    /// Picks the consumer that receives the next message of `queue`.
    pub(crate) fn select(&mut self, queue: &str, selection: ConsumerSelection) -> Option<Consumer> {
        let list = self.consumers.get(queue)?;
        if list.is_empty() {
            return None;
        }

        match selection {
            ConsumerSelection::FirstRegistered => list.first().cloned(),
            ConsumerSelection::RoundRobin => {
                let cursor = self.cursors.entry(queue.to_owned()).or_default();
                let consumer = list[*cursor % list.len()].clone();
                *cursor = (*cursor + 1) % list.len();
                Some(consumer)
            }
        }
    }
}

/// Hands one message to a consumer's handler inside a consumer span.
///
/// Returns the handler's outcome; settling the message (ack, requeue or drop)
/// is up to the caller.
pub(crate) async fn consume(
    tracer: &BoxedTracer,
    msg: &Message,
    consumer: &Consumer,
) -> Result<(), AmqpError> {
    let (ctx, mut span) = otel::consumer_span(msg, &consumer.queue, tracer);

    debug!(
        queue = %consumer.queue,
        consumer_tag = %consumer.tag,
        delivery_tag = msg.delivery_tag(),
        redelivered = msg.redelivered(),
        "delivering message"
    );

    match consumer.handler.exec(&ctx, msg).await {
        Ok(()) => {
            debug!("message successfully processed");
            span.set_status(Status::Ok);
            Ok(())
        }
        Err(err) => {
            warn!(
                error = err.to_string(),
                queue = %consumer.queue,
                delivery_tag = msg.delivery_tag(),
                "error whiling handling msg"
            );
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from(err.to_string()),
            });
            Err(err)
        }
    }
}
