//! # Concrete Drivers
//!
//! Each driver is a `DriverSetup` plus its serde config. Wrap one in
//! `SensorDriver` to get the full lifecycle.
//!
//! - **`ptz`**: HTTP-polled pan/tilt/zoom camera (needs `retrieve`).
//! - **`nexrad`**: Level II radial files from a watched folder.
//! - **`mavlink`**: MAVLink v1 telemetry over TCP.

use std::time::Duration;

use crate::errors::ConfigurationError;

pub mod mavlink;
pub mod nexrad;
#[cfg(feature = "retrieve")]
pub mod ptz;

pub use mavlink::{MavlinkConfig, MavlinkSetup};
pub use nexrad::{NexradConfig, NexradSetup};
#[cfg(feature = "retrieve")]
pub use ptz::{PtzConfig, PtzSetup};

/// Converts a period in seconds from a config file into a `Duration`.
pub(crate) fn period_from_secs(key: &str, secs: f64) -> Result<Duration, ConfigurationError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigurationError::MalformedOption {
            key: key.to_string(),
            value: secs.to_string(),
            expected: "a positive number of seconds",
        });
    }
    Ok(Duration::from_secs_f64(secs))
}
