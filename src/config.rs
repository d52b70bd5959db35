// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Configuration
//!
//! Settings for the emulated broker: scheduler tick interval, simulated connection
//! latency, event channel capacity and consumer selection policy. Values can come
//! from defaults, environment variables or a JSON document.

use crate::errors::AmqpError;
use serde::Deserialize;
use std::{env, str::FromStr, time::Duration};
use tracing::error;

pub const ENV_BROKER_NAME: &str = "BROKER_NAME";
pub const ENV_TICK_INTERVAL_MS: &str = "BROKER_TICK_INTERVAL_MS";
pub const ENV_CONNECT_LATENCY_MS: &str = "BROKER_CONNECT_LATENCY_MS";
pub const ENV_EVENT_CAPACITY: &str = "BROKER_EVENT_CAPACITY";
pub const ENV_CONSUMER_SELECTION: &str = "BROKER_CONSUMER_SELECTION";

/// How the scheduler picks a consumer when a queue has several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerSelection {
    /// Always the consumer registered first on the queue.
    #[default]
    FirstRegistered,
    /// Rotate through the queue's consumers, one delivery each.
    RoundRobin,
}

impl FromStr for ConsumerSelection {
    type Err = AmqpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "first_registered" | "first" => Ok(ConsumerSelection::FirstRegistered),
            "round_robin" => Ok(ConsumerSelection::RoundRobin),
            other => Err(AmqpError::ConfigError(format!(
                "{}={}",
                ENV_CONSUMER_SELECTION, other
            ))),
        }
    }
}

/// Broker settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Connection name reported in logs.
    pub name: String,
    /// Period between two scheduler ticks, in milliseconds.
    pub tick_interval_ms: u64,
    /// Simulated latency of `connect`, in milliseconds.
    pub connect_latency_ms: u64,
    /// Capacity of the broadcast channel carrying broker events.
    pub event_capacity: usize,
    pub consumer_selection: ConsumerSelection,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            name: "rabbitmq-emulator".to_owned(),
            tick_interval_ms: 100,
            connect_latency_ms: 50,
            event_capacity: 1024,
            consumer_selection: ConsumerSelection::FirstRegistered,
        }
    }
}

impl BrokerConfig {
    /// Builds a configuration from the `BROKER_*` environment variables,
    /// falling back to the defaults for unset ones.
    pub fn from_env() -> Result<BrokerConfig, AmqpError> {
        let mut cfg = BrokerConfig::default();

        if let Ok(name) = env::var(ENV_BROKER_NAME) {
            cfg.name = name;
        }
        if let Some(v) = parse_env(ENV_TICK_INTERVAL_MS)? {
            cfg.tick_interval_ms = v;
        }
        if let Some(v) = parse_env(ENV_CONNECT_LATENCY_MS)? {
            cfg.connect_latency_ms = v;
        }
        if let Some(v) = parse_env(ENV_EVENT_CAPACITY)? {
            cfg.event_capacity = v;
        }
        if let Ok(v) = env::var(ENV_CONSUMER_SELECTION) {
            cfg.consumer_selection = v.parse()?;
        }

        cfg.validate()
    }

    /// Parses a JSON document; missing fields take their default value.
    pub fn from_json(raw: &str) -> Result<BrokerConfig, AmqpError> {
        let cfg: BrokerConfig = serde_json::from_str(raw).map_err(|err| {
            error!(error = err.to_string(), "failure to parse broker config");
            AmqpError::ConfigError(err.to_string())
        })?;

        cfg.validate()
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency_ms = latency.as_millis() as u64;
        self
    }

    pub fn with_consumer_selection(mut self, selection: ConsumerSelection) -> Self {
        self.consumer_selection = selection;
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn connect_latency(&self) -> Duration {
        Duration::from_millis(self.connect_latency_ms)
    }

    fn validate(self) -> Result<BrokerConfig, AmqpError> {
        // tokio's interval panics on a zero period, and a zero-capacity
        // broadcast channel panics on creation.
        if self.tick_interval_ms == 0 {
            return Err(AmqpError::ConfigError(ENV_TICK_INTERVAL_MS.to_owned()));
        }
        if self.event_capacity == 0 {
            return Err(AmqpError::ConfigError(ENV_EVENT_CAPACITY.to_owned()));
        }
        Ok(self)
    }
}

fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, AmqpError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            error!(key, value = %raw, "invalid broker config value");
            AmqpError::ConfigError(format!("{}={}", key, raw))
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Holds the process environment for one test and clears the broker
    /// variables on drop.
    struct EnvGuard {
        _lock: MutexGuard<'static, ()>,
    }

    impl EnvGuard {
        fn set(vars: &[(&str, &str)]) -> EnvGuard {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            clear_broker_env();
            for (key, value) in vars {
                env::set_var(key, value);
            }
            EnvGuard { _lock: lock }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            clear_broker_env();
        }
    }

    fn clear_broker_env() {
        for key in [
            ENV_BROKER_NAME,
            ENV_TICK_INTERVAL_MS,
            ENV_CONNECT_LATENCY_MS,
            ENV_EVENT_CAPACITY,
            ENV_CONSUMER_SELECTION,
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn env_overrides_defaults() {
        let _env = EnvGuard::set(&[
            (ENV_BROKER_NAME, "vitals-broker"),
            (ENV_TICK_INTERVAL_MS, " 25 "),
            (ENV_CONSUMER_SELECTION, "round_robin"),
        ]);

        let cfg = BrokerConfig::from_env().unwrap();

        assert_eq!(cfg.name, "vitals-broker");
        assert_eq!(cfg.tick_interval(), Duration::from_millis(25));
        assert_eq!(cfg.consumer_selection, ConsumerSelection::RoundRobin);
        assert_eq!(cfg.connect_latency(), Duration::from_millis(50));
        assert_eq!(cfg.event_capacity, 1024);
    }

    #[test]
    fn env_rejects_non_numeric_interval() {
        let _env = EnvGuard::set(&[(ENV_TICK_INTERVAL_MS, "fast")]);

        assert_eq!(
            BrokerConfig::from_env(),
            Err(AmqpError::ConfigError(format!("{}=fast", ENV_TICK_INTERVAL_MS)))
        );
    }

    #[test]
    fn env_rejects_zero_interval() {
        let _env = EnvGuard::set(&[(ENV_TICK_INTERVAL_MS, "0")]);

        assert_eq!(
            BrokerConfig::from_env(),
            Err(AmqpError::ConfigError(ENV_TICK_INTERVAL_MS.to_owned()))
        );
    }

    #[test]
    fn env_without_overrides_is_default() {
        let _env = EnvGuard::set(&[]);
        assert_eq!(BrokerConfig::from_env(), Ok(BrokerConfig::default()));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let cfg = BrokerConfig::from_json(r#"{"tick_interval_ms": 10, "consumer_selection": "round_robin"}"#)
            .unwrap();

        assert_eq!(cfg.tick_interval(), Duration::from_millis(10));
        assert_eq!(cfg.consumer_selection, ConsumerSelection::RoundRobin);
        assert_eq!(cfg.name, "rabbitmq-emulator");
        assert_eq!(cfg.event_capacity, 1024);
    }

    #[test]
    fn json_rejects_zero_interval() {
        let err = BrokerConfig::from_json(r#"{"tick_interval_ms": 0}"#).unwrap_err();
        assert!(matches!(err, AmqpError::ConfigError(_)));
    }

    #[test]
    fn json_rejects_unknown_selection() {
        assert!(BrokerConfig::from_json(r#"{"consumer_selection": "random"}"#).is_err());
    }

    #[test]
    fn selection_parses_from_env_style_strings() {
        assert_eq!(
            "ROUND_ROBIN".parse::<ConsumerSelection>().unwrap(),
            ConsumerSelection::RoundRobin
        );
        assert_eq!(
            "first".parse::<ConsumerSelection>().unwrap(),
            ConsumerSelection::FirstRegistered
        );
        assert!("sticky".parse::<ConsumerSelection>().is_err());
    }
}
