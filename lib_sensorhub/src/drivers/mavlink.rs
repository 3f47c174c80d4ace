//! # MAVLink Telemetry Driver
//!
//! Reads MAVLink v1 frames from a TCP link and publishes each enabled message
//! type on its own output (`HEARTBEAT`, `ATTITUDE`, `GLOBAL_POSITION_INT`,
//! `RPM`). The link is reopened with exponential backoff when it drops.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::assemble::MessageAssembler;
use crate::core::{DriverSetup, Prepared, Schedule};
use crate::errors::ConfigurationError;
use crate::schema::SchemaOptions;
use crate::source::mavlink::{spec_for_name, MessageSpec, MESSAGES};
use crate::source::message::Backoff;
use crate::source::{Connect, MessageReader, TcpConnector};

use super::period_from_secs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MavlinkConfig {
    /// `host:port` of the telemetry TCP server.
    pub address: String,
    /// Message outputs to enable. Empty enables every known message.
    pub messages: Vec<String>,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    /// Nominal record cadence in seconds.
    pub sampling_period: f64,
    /// Schema options per output name.
    pub schema_options: BTreeMap<String, SchemaOptions>,
}

impl Default for MavlinkConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            messages: Vec::new(),
            reconnect_base_ms: 1000,
            reconnect_max_ms: 60_000,
            sampling_period: 1.0,
            schema_options: BTreeMap::new(),
        }
    }
}

impl MavlinkConfig {
    /// Resolves `messages` against the message table.
    pub fn enabled_messages(&self) -> Result<Vec<&'static MessageSpec>, ConfigurationError> {
        if self.messages.is_empty() {
            return Ok(MESSAGES.to_vec());
        }
        let mut enabled: Vec<&'static MessageSpec> = Vec::with_capacity(self.messages.len());
        for name in &self.messages {
            let spec = spec_for_name(name.trim()).ok_or_else(|| ConfigurationError::UnknownOption(name.clone()))?;
            if !enabled.iter().any(|m| m.id == spec.id) {
                enabled.push(spec);
            }
        }
        Ok(enabled)
    }

    fn backoff(&self) -> Result<Backoff, ConfigurationError> {
        if self.reconnect_base_ms == 0 || self.reconnect_max_ms < self.reconnect_base_ms {
            return Err(ConfigurationError::MalformedOption {
                key: "reconnect_max_ms".to_string(),
                value: format!("{} (base {})", self.reconnect_max_ms, self.reconnect_base_ms),
                expected: "a positive base no larger than the max",
            });
        }
        Ok(Backoff {
            base: Duration::from_millis(self.reconnect_base_ms),
            max: Duration::from_millis(self.reconnect_max_ms),
        })
    }
}

/// Validates a `host:port` address and builds a TCP connector for it.
pub fn tcp_connector(address: &str) -> Result<TcpConnector, ConfigurationError> {
    let invalid = |reason: &str| ConfigurationError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };
    let (host, port) = address.trim().rsplit_once(':').ok_or_else(|| invalid("expected host:port"))?;
    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    port.parse::<u16>().map_err(|_| invalid("port is not a number in 0-65535"))?;
    Ok(TcpConnector::new(address.trim()))
}

type ConnectorFactory<C> = fn(&str) -> Result<C, ConfigurationError>;

/// Setup for the MAVLink stream driver, generic over how the link is opened.
pub struct MavlinkSetup<C> {
    injected: Mutex<Option<C>>,
    factory: Option<ConnectorFactory<C>>,
}

impl MavlinkSetup<TcpConnector> {
    /// Connects to `config.address` over TCP.
    pub fn tcp() -> Self {
        Self {
            injected: Mutex::new(None),
            factory: Some(tcp_connector),
        }
    }
}

impl<C: Connect> MavlinkSetup<C> {
    /// Uses `connector` for the next `init`; later inits have no link.
    pub fn with_connector(connector: C) -> Self {
        Self {
            injected: Mutex::new(Some(connector)),
            factory: None,
        }
    }

    fn connector(&self, address: &str) -> Result<C, ConfigurationError> {
        let injected = self.injected.lock().unwrap_or_else(PoisonError::into_inner).take();
        match (injected, self.factory) {
            (Some(connector), _) => Ok(connector),
            (None, Some(factory)) => factory(address),
            (None, None) => Err(ConfigurationError::Missing("connector")),
        }
    }
}

#[async_trait]
impl<C> DriverSetup for MavlinkSetup<C>
where
    C: Connect + 'static,
    C::Stream: 'static,
{
    type Config = MavlinkConfig;
    type Reader = MessageReader<C>;
    type Assembler = MessageAssembler;

    fn name(&self) -> &str {
        "mavlink"
    }

    async fn prepare(&self, config: MavlinkConfig) -> Result<Prepared<MessageReader<C>, MessageAssembler>, ConfigurationError> {
        let period = period_from_secs("sampling_period", config.sampling_period)?;
        let backoff = config.backoff()?;
        let enabled = config.enabled_messages()?;

        for output in config.schema_options.keys() {
            if !enabled.iter().any(|m| m.name == output.as_str()) {
                return Err(ConfigurationError::UnknownOption(format!("schema_options.{}", output)));
            }
        }

        let empty = SchemaOptions::new();
        let mut outputs = Vec::with_capacity(enabled.len());
        for spec in &enabled {
            let options = config.schema_options.get(spec.name).unwrap_or(&empty);
            outputs.push((spec.id, spec.schema(options)?));
        }

        let connector = self.connector(&config.address)?;
        Ok(Prepared {
            reader: MessageReader::new(connector, backoff),
            schemas: outputs.iter().map(|(_, s)| s.clone()).collect(),
            assembler: MessageAssembler::new(outputs),
            schedule: Schedule::Continuous,
            sampling_period: period,
        })
    }
}
