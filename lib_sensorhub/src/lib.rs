//! # lib_sensorhub
//!
//! Acquisition, assembly and publication core shared by sensor drivers, plus
//! three drivers built on it: an HTTP-polled PTZ camera, a NEXRAD Level II
//! file feed and a MAVLink telemetry stream.
//!
//! Data flows `SourceReader -> Assembler -> Record -> Publication`; the
//! `SensorDriver` lifecycle owns the loop that drives it.

// Declare the modules
pub mod assemble;
pub mod core;
pub mod drivers;
pub mod errors;
pub mod record;
pub mod schema;
pub mod source;

#[cfg(feature = "retrieve")]
pub mod retrieve; // HTTP client with retries, used by the PTZ driver

// Re-export the types a host needs to run a driver
pub use crate::core::{DataEvent, DriverSetup, Schedule, SensorDriver, StatsSnapshot};
pub use errors::{ConfigurationError, DriverError, ProtocolError, RecordError, TransientFetchError};
pub use record::{FieldValue, Record, TextEncoding};
pub use schema::{FieldKind, RecordSchema, SchemaOptions};
