// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Model
//!
//! A message is the unit of transport: an opaque payload, an AMQP properties bag
//! and the routing metadata assigned by the broker at publish time. The broker
//! never looks inside the payload; typed encoding and decoding is left to
//! producers and consumers through the JSON helpers.

use crate::errors::AmqpError;
use lapin::{
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties,
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use tracing::error;
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Broker-wide message identifier, strictly increasing and never reused.
pub type DeliveryTag = u64;

/// Routing metadata recorded by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFields {
    /// Originating exchange, empty for messages sent straight to a queue.
    pub exchange: String,
    pub routing_key: String,
    pub delivery_tag: DeliveryTag,
    /// Set once the message has been requeued after a failed delivery.
    pub redelivered: bool,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub(crate) content: Vec<u8>,
    pub(crate) properties: BasicProperties,
    pub(crate) fields: MessageFields,
}

impl Message {
    pub(crate) fn new(
        content: Vec<u8>,
        properties: BasicProperties,
        exchange: &str,
        routing_key: &str,
        delivery_tag: DeliveryTag,
    ) -> Message {
        Message {
            content,
            properties,
            fields: MessageFields {
                exchange: exchange.to_owned(),
                routing_key: routing_key.to_owned(),
                delivery_tag,
                redelivered: false,
            },
        }
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn properties(&self) -> &BasicProperties {
        &self.properties
    }

    pub fn fields(&self) -> &MessageFields {
        &self.fields
    }

    pub fn delivery_tag(&self) -> DeliveryTag {
        self.fields.delivery_tag
    }

    pub fn redelivered(&self) -> bool {
        self.fields.redelivered
    }

    /// Returns the message type carried in the `type` property, if any.
    pub fn kind(&self) -> Option<&str> {
        self.properties.kind().as_ref().map(|k| k.as_str())
    }

    /// Deserializes the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AmqpError> {
        serde_json::from_slice(&self.content).map_err(|err| {
            error!(
                error = err.to_string(),
                delivery_tag = self.fields.delivery_tag,
                "failure to parse payload"
            );
            AmqpError::ParsePayloadError
        })
    }

    pub(crate) fn mark_redelivered(&mut self) {
        self.fields.redelivered = true;
    }
}

/// Properties attached to a message at publish time.
///
/// Builds the AMQP `BasicProperties` stored on every enqueued copy. A `uuid` v4
/// message id is generated when none is given.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    content_type: Option<String>,
    kind: Option<String>,
    message_id: Option<String>,
    correlation_id: Option<String>,
    reply_to: Option<String>,
    priority: Option<u8>,
    persistent: bool,
    headers: BTreeMap<ShortString, AMQPValue>,
}

impl PublishOptions {
    pub fn new() -> PublishOptions {
        PublishOptions::default()
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_owned());
        self
    }

    /// Sets the message type (`type` property).
    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_owned());
        self
    }

    pub fn message_id(mut self, id: &str) -> Self {
        self.message_id = Some(id.to_owned());
        self
    }

    pub fn correlation_id(mut self, id: &str) -> Self {
        self.correlation_id = Some(id.to_owned());
        self
    }

    pub fn reply_to(mut self, queue: &str) -> Self {
        self.reply_to = Some(queue.to_owned());
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Marks the message persistent (delivery mode 2). Recorded only; the
    /// emulator keeps everything in memory.
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn header(mut self, key: &str, value: AMQPValue) -> Self {
        self.headers.insert(ShortString::from(key), value);
        self
    }

    pub fn headers(mut self, headers: BTreeMap<ShortString, AMQPValue>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub(crate) fn into_properties(self) -> BasicProperties {
        let mut props = BasicProperties::default()
            .with_message_id(ShortString::from(
                self.message_id
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
            ))
            .with_delivery_mode(if self.persistent { 2 } else { 1 });

        if let Some(content_type) = self.content_type {
            props = props.with_content_type(ShortString::from(content_type));
        }
        if let Some(kind) = self.kind {
            props = props.with_type(ShortString::from(kind));
        }
        if let Some(id) = self.correlation_id {
            props = props.with_correlation_id(ShortString::from(id));
        }
        if let Some(reply_to) = self.reply_to {
            props = props.with_reply_to(ShortString::from(reply_to));
        }
        if let Some(priority) = self.priority {
            props = props.with_priority(priority);
        }
        if !self.headers.is_empty() {
            props = props.with_headers(FieldTable::from(self.headers));
        }

        props
    }
}

/// Encodes a payload as JSON, for producers that publish typed values.
pub(crate) fn encode_json<T: Serialize>(payload: &T) -> Result<Vec<u8>, AmqpError> {
    serde_json::to_vec(payload).map_err(|err| {
        error!(error = err.to_string(), "failure to encode payload");
        AmqpError::ParsePayloadError
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::LongString;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct SleepSample {
        minutes: u32,
    }

    #[test]
    fn options_build_amqp_properties() {
        let props = PublishOptions::new()
            .content_type(JSON_CONTENT_TYPE)
            .kind("sleep.recorded")
            .correlation_id("c-1")
            .priority(5)
            .header("source", AMQPValue::LongString(LongString::from("watch")))
            .into_properties();

        assert_eq!(
            props.content_type().as_ref().map(|v| v.as_str()),
            Some(JSON_CONTENT_TYPE)
        );
        assert_eq!(props.kind().as_ref().map(|v| v.as_str()), Some("sleep.recorded"));
        assert_eq!(props.correlation_id().as_ref().map(|v| v.as_str()), Some("c-1"));
        assert_eq!(*props.priority(), Some(5));
        assert!(props.message_id().is_some());

        let headers = props.headers().clone().unwrap_or_default();
        assert!(headers.inner().contains_key("source"));
    }

    #[test]
    fn explicit_message_id_is_kept() {
        let props = PublishOptions::new().message_id("m-42").into_properties();
        assert_eq!(props.message_id().as_ref().map(|v| v.as_str()), Some("m-42"));
    }

    #[test]
    fn json_payload_decodes() {
        let content = encode_json(&SleepSample { minutes: 420 }).unwrap();
        let msg = Message::new(content, BasicProperties::default(), "events", "health.sleep", 1);

        assert_eq!(msg.json::<SleepSample>().unwrap(), SleepSample { minutes: 420 });
        assert!(!msg.redelivered());
    }

    #[test]
    fn invalid_json_payload_is_a_parse_error() {
        let msg = Message::new(b"not json".to_vec(), BasicProperties::default(), "", "q", 1);
        assert_eq!(
            msg.json::<SleepSample>().unwrap_err(),
            AmqpError::ParsePayloadError
        );
    }
}
