// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! This module provides the producer-side abstraction used by the rest of an
//! application. `BrokerPublisher` stamps every message with a JSON content type,
//! a unique message id and its message type, converts typed header values to
//! AMQP field values and propagates the OpenTelemetry context in the headers.

use crate::{
    broker::Broker,
    errors::AmqpError,
    message::{encode_json, PublishOptions, JSON_CONTENT_TYPE},
    otel,
};
use async_trait::async_trait;
use lapin::types::{
    AMQPValue, LongInt, LongLongInt, LongString, LongUInt, ShortInt, ShortString,
};
use opentelemetry::Context;
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tracing::{debug, error};

/// Typed header values accepted from producers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValues {
    ShortString(String),
    LongString(String),
    Int(i16),
    LongInt(i32),
    LongLongInt(i64),
    Uint(u32),
    LongUint(u32),
    LongLongUint(u64),
}

/// A message as handed over by a producer.
#[derive(Debug, Clone, Default)]
pub struct PublishMessage {
    /// Exchange name; empty for the default exchange.
    pub to: String,
    pub key: Option<String>,
    pub msg_type: Option<String>,
    pub data: Vec<u8>,
    pub headers: Option<HashMap<String, HeaderValues>>,
}

impl PublishMessage {
    pub fn new(to: &str, key: Option<&str>, msg_type: Option<&str>, data: Vec<u8>) -> PublishMessage {
        PublishMessage {
            to: to.to_owned(),
            key: key.map(str::to_owned),
            msg_type: msg_type.map(str::to_owned),
            data,
            headers: None,
        }
    }

    /// Builds a message whose payload is `payload` serialized as JSON.
    pub fn json<T: Serialize>(
        to: &str,
        key: Option<&str>,
        msg_type: Option<&str>,
        payload: &T,
    ) -> Result<PublishMessage, AmqpError> {
        Ok(PublishMessage::new(to, key, msg_type, encode_json(payload)?))
    }

    pub fn header(mut self, key: &str, value: HeaderValues) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(key.to_owned(), value);
        self
    }
}

/// Producer interface.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, ctx: &Context, infos: &PublishMessage) -> Result<(), AmqpError>;
}

/// `Publisher` writing into an in-process `Broker`.
pub struct BrokerPublisher {
    broker: Broker,
}

impl BrokerPublisher {
    /// Creates a new publisher on `broker`.
    ///
    /// # Returns
    /// An Arc-wrapped BrokerPublisher instance for thread-safe sharing
    pub fn new(broker: &Broker) -> Arc<BrokerPublisher> {
        Arc::new(BrokerPublisher {
            broker: broker.clone(),
        })
    }
}

#[async_trait]
impl Publisher for BrokerPublisher {
    /// Publishes a message on the exchange named by `infos.to`.
    ///
    /// Unroutable messages are dropped by the broker and are not an error here.
    async fn publish(&self, ctx: &Context, infos: &PublishMessage) -> Result<(), AmqpError> {
        let mut btree = BTreeMap::<ShortString, AMQPValue>::default();

        otel::inject_context(ctx, &mut btree);

        if let Some(headers) = &infos.headers {
            self.btree_map(headers, &mut btree);
        }

        let mut options = PublishOptions::new()
            .content_type(JSON_CONTENT_TYPE)
            .headers(btree);
        if let Some(msg_type) = &infos.msg_type {
            options = options.kind(msg_type);
        }

        let key = infos.key.clone().unwrap_or_default();
        match self
            .broker
            .publish(&infos.to, &key, infos.data.clone(), options)
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(err)
            }
            Ok(routed) => {
                debug!(exchange = %infos.to, key = %key, routed, "message handed to broker");
                Ok(())
            }
        }
    }
}

impl BrokerPublisher {
    /// Converts a HashMap of header values to a BTreeMap of AMQP values.
    fn btree_map(
        &self,
        hash_map: &HashMap<String, HeaderValues>,
        btree: &mut BTreeMap<ShortString, AMQPValue>,
    ) {
        for (key, value) in hash_map {
            let amqp_value = match value.clone() {
                HeaderValues::ShortString(v) => AMQPValue::ShortString(ShortString::from(v)),
                HeaderValues::LongString(v) => AMQPValue::LongString(LongString::from(v)),
                HeaderValues::Int(v) => AMQPValue::ShortInt(ShortInt::from(v)),
                HeaderValues::LongInt(v) => AMQPValue::LongInt(LongInt::from(v)),
                HeaderValues::LongLongInt(v) => AMQPValue::LongLongInt(LongLongInt::from(v)),
                HeaderValues::Uint(v) => AMQPValue::LongUInt(LongUInt::from(v)),
                HeaderValues::LongUint(v) => AMQPValue::LongUInt(LongUInt::from(v)),
                // AMQP 0-9-1 has no unsigned 64-bit field type
                HeaderValues::LongLongUint(v) => match (u32::try_from(v), i64::try_from(v)) {
                    (Ok(v), _) => AMQPValue::LongUInt(v),
                    (_, Ok(v)) => AMQPValue::LongLongInt(v),
                    _ => AMQPValue::LongString(LongString::from(v.to_string())),
                },
            };

            btree.insert(ShortString::from(key.as_str()), amqp_value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::BrokerConfig, exchange::ExchangeDefinition, queue::QueueDefinition};
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct HeartRate {
        bpm: u16,
    }

    async fn setup() -> Broker {
        let broker = Broker::new(BrokerConfig::default().with_connect_latency(Duration::ZERO));
        broker
            .assert_exchange(ExchangeDefinition::new("vitals").topic())
            .await;
        broker.assert_queue(QueueDefinition::new("heart")).await;
        broker
            .bind_queue("heart", "vitals", "vitals.heart.#")
            .await
            .unwrap();
        broker
    }

    #[tokio::test]
    async fn publishes_json_with_type_and_headers() {
        let broker = setup().await;
        let publisher = BrokerPublisher::new(&broker);

        let msg = PublishMessage::json(
            "vitals",
            Some("vitals.heart.rate"),
            Some("heart.rate"),
            &HeartRate { bpm: 61 },
        )
        .unwrap()
        .header("device", HeaderValues::LongString("watch".to_owned()))
        .header("seq", HeaderValues::LongInt(12));

        publisher.publish(&Context::new(), &msg).await.unwrap();

        let queued = broker.peek_messages("heart").await.unwrap();
        assert_eq!(queued.len(), 1);

        let received = &queued[0];
        assert_eq!(received.json::<HeartRate>().unwrap(), HeartRate { bpm: 61 });
        assert_eq!(received.kind(), Some("heart.rate"));
        assert_eq!(
            received.properties().content_type().as_ref().map(|v| v.as_str()),
            Some(JSON_CONTENT_TYPE)
        );

        let headers = received.properties().headers().clone().unwrap_or_default();
        assert_eq!(
            headers.inner().get("device"),
            Some(&AMQPValue::LongString(LongString::from("watch")))
        );
        assert_eq!(headers.inner().get("seq"), Some(&AMQPValue::LongInt(12)));
    }

    #[test]
    fn wide_unsigned_headers_keep_their_value() {
        let publisher = BrokerPublisher::new(&Broker::default());
        let headers = HashMap::from([
            ("small".to_owned(), HeaderValues::LongLongUint(7)),
            ("wide".to_owned(), HeaderValues::LongLongUint(u64::from(u32::MAX) + 1)),
            ("huge".to_owned(), HeaderValues::LongLongUint(u64::MAX)),
        ]);

        let mut btree = BTreeMap::default();
        publisher.btree_map(&headers, &mut btree);

        assert_eq!(btree.get("small"), Some(&AMQPValue::LongUInt(7)));
        assert_eq!(
            btree.get("wide"),
            Some(&AMQPValue::LongLongInt(i64::from(u32::MAX) + 1))
        );
        assert_eq!(
            btree.get("huge"),
            Some(&AMQPValue::LongString(LongString::from(u64::MAX.to_string())))
        );
    }

    #[tokio::test]
    async fn unknown_exchange_is_an_error() {
        let broker = setup().await;
        let publisher = BrokerPublisher::new(&broker);

        let msg = PublishMessage::new("missing", None, None, vec![]);
        assert_eq!(
            publisher.publish(&Context::new(), &msg).await,
            Err(AmqpError::ExchangeNotFound("missing".to_owned()))
        );
    }

    #[tokio::test]
    async fn unroutable_message_is_accepted() {
        let broker = setup().await;
        let publisher = BrokerPublisher::new(&broker);

        let msg = PublishMessage::new("vitals", Some("vitals.sleep"), None, vec![1]);
        assert!(publisher.publish(&Context::new(), &msg).await.is_ok());
        assert_eq!(broker.get_message_count("heart").await, Ok(0));
    }
}
