// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Management
//!
//! The emulated connection has no transport behind it, only a state machine:
//! `Disconnected --connect--> Connecting --> Connected --disconnect--> Disconnected`.
//! Opening a connection suspends the caller for the configured latency without
//! blocking the runtime.

use crate::{broker::Broker, events::BrokerEvent};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Opens the broker's connection unless it is already open.
///
/// Concurrent callers are serialized: the first one pays the latency and the
/// others find the connection established.
pub(crate) async fn open_connection(broker: &Broker) {
    let _guard = broker.shared.connect_lock.lock().await;

    {
        let mut state = broker.shared.state.lock().await;
        if state.connection.is_connected() {
            return;
        }
        state.connection = ConnectionState::Connecting;
    }

    debug!(name = %broker.shared.config.name, "creating amqp connection...");
    tokio::time::sleep(broker.shared.config.connect_latency()).await;

    broker.shared.state.lock().await.connection = ConnectionState::Connected;
    broker.shared.events.emit(BrokerEvent::Connected);
    debug!("amqp connected");
}

/// Closes the connection. Queue contents and topology are kept.
pub(crate) async fn close_connection(broker: &Broker) {
    let _guard = broker.shared.connect_lock.lock().await;

    let mut state = broker.shared.state.lock().await;
    if state.connection == ConnectionState::Disconnected {
        return;
    }

    state.connection = ConnectionState::Disconnected;
    broker.shared.events.emit(BrokerEvent::Disconnected);
    debug!(name = %broker.shared.config.name, "amqp disconnected");
}
