//! # PTZ Camera Driver
//!
//! Polls an Axis-style VAPIX endpoint for the current pan, tilt and zoom of a
//! PTZ head and publishes them on `ptzOutput`.
//!
//! At `init` the camera is asked once for its mechanical limits. Reported
//! limits replace the built-in ranges; explicit `schema_options` in the config
//! win over both. A camera that does not answer the limits query is not an
//! error: the built-in ranges are used and a warning is logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::assemble::PollAssembler;
use crate::core::{DriverSetup, Prepared, Schedule};
use crate::errors::{ConfigurationError, TransientFetchError};
use crate::retrieve::{ApiClient, ClientOptions, Credentials};
use crate::schema::{RecordSchema, SchemaOptions};
use crate::source::{parse_key_values, HttpPollReader, KeyMap};

use super::period_from_secs;

pub const PTZ_OUTPUT: &str = "ptzOutput";
pub const LIMITS_PATH: &str = "view/param.cgi?action=list&group=PTZ.Limit";
pub const POSITION_PATH: &str = "view/param.cgi?query=position";

const PAN_RANGE: (f64, f64) = (-180.0, 180.0);
const TILT_RANGE: (f64, f64) = (-180.0, 0.0);
const ZOOM_RANGE: (f64, f64) = (1.0, 13333.0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtzConfig {
    /// Base URL of the camera CGI tree, e.g. `http://192.168.1.50/axis-cgi`.
    pub host_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Poll period in seconds.
    pub sampling_period: f64,
    /// Per-request timeout in seconds.
    pub request_timeout: u64,
    pub max_retries: u32,
    pub schema_options: SchemaOptions,
}

impl Default for PtzConfig {
    fn default() -> Self {
        Self {
            host_url: String::new(),
            username: None,
            password: None,
            sampling_period: 1.0,
            request_timeout: 5,
            max_retries: 1,
            schema_options: SchemaOptions::new(),
        }
    }
}

impl PtzConfig {
    fn client_options(&self) -> ClientOptions {
        let credentials = match (&self.username, &self.password) {
            (Some(username), password) => Some(Credentials {
                username: username.clone(),
                password: password.clone().unwrap_or_default(),
            }),
            (None, _) => None,
        };
        ClientOptions {
            timeout: Duration::from_secs(self.request_timeout),
            max_retries: self.max_retries,
            credentials,
            ..ClientOptions::default()
        }
    }
}

/// `ptzOutput` schema with the built-in ranges, overridden by `options`.
pub fn ptz_schema(options: &SchemaOptions) -> Result<Arc<RecordSchema>, ConfigurationError> {
    RecordSchema::builder(PTZ_OUTPUT)
        .definition("http://sensorml.com/ont/swe/property/PtzPosition")
        .time("time")
        .float("pan", "deg")
        .bounded(PAN_RANGE.0, PAN_RANGE.1)
        .described_as("http://sensorml.com/ont/swe/property/Pan")
        .float("tilt", "deg")
        .bounded(TILT_RANGE.0, TILT_RANGE.1)
        .described_as("http://sensorml.com/ont/swe/property/Tilt")
        .int("zoomFactor")
        .bounded(ZOOM_RANGE.0, ZOOM_RANGE.1)
        .described_as("http://sensorml.com/ont/swe/property/AxisZoomFactor")
        .build(options)
        .map(Arc::new)
}

fn position_keys() -> KeyMap {
    KeyMap::new().map("pan", "pan").map("tilt", "tilt").map("zoom", "zoomFactor")
}

fn limit_keys() -> KeyMap {
    KeyMap::new()
        .map("root.PTZ.Limit.L1.MinPan", "pan.minValue")
        .map("root.PTZ.Limit.L1.MaxPan", "pan.maxValue")
        .map("root.PTZ.Limit.L1.MinTilt", "tilt.minValue")
        .map("root.PTZ.Limit.L1.MaxTilt", "tilt.maxValue")
        .map("root.PTZ.Limit.L1.MaxZoom", "zoomFactor.maxValue")
}

/// Asks the camera for its limits and turns the answer into schema options.
pub async fn query_limits(client: &ApiClient) -> Result<SchemaOptions, TransientFetchError> {
    let response = client
        .get_text(LIMITS_PATH)
        .await
        .map_err(|e| TransientFetchError::Request(format!("{:#}", e)))?;
    if !response.success {
        return Err(TransientFetchError::Status {
            status: response.status,
            url: response.url,
        });
    }
    let unit = parse_key_values(&response.body, &limit_keys())?;
    let mut options = SchemaOptions::new();
    for (key, value) in unit.values {
        options.set(key, value.as_f64());
    }
    Ok(options)
}

/// Setup for the PTZ poll driver.
#[derive(Debug, Default)]
pub struct PtzSetup;

#[async_trait]
impl DriverSetup for PtzSetup {
    type Config = PtzConfig;
    type Reader = HttpPollReader;
    type Assembler = PollAssembler;

    fn name(&self) -> &str {
        "ptz"
    }

    async fn prepare(&self, config: PtzConfig) -> Result<Prepared<HttpPollReader, PollAssembler>, ConfigurationError> {
        if config.host_url.trim().is_empty() {
            return Err(ConfigurationError::Missing("host_url"));
        }
        let period = period_from_secs("sampling_period", config.sampling_period)?;
        let client = ApiClient::new(&config.host_url, &config.client_options())?;

        let device = match query_limits(&client).await {
            Ok(limits) => {
                info!("{} reported PTZ limits {:?}", client.base_url(), limits);
                limits
            }
            Err(e) => {
                warn!("PTZ limits query failed, using built-in ranges: {}", e);
                SchemaOptions::new()
            }
        };
        let schema = ptz_schema(&device.merged(&config.schema_options))?;

        let keys = position_keys();
        keys.validate(&schema)?;

        Ok(Prepared {
            reader: HttpPollReader::new(client, POSITION_PATH, keys),
            assembler: PollAssembler::new(Arc::clone(&schema)),
            schemas: vec![schema],
            schedule: Schedule::Periodic(period),
            sampling_period: period,
        })
    }
}
