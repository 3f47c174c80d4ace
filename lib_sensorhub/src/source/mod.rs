//! # Source Readers
//!
//! A source reader yields the next raw unit of data from one specific
//! transport. Three variants exist:
//!
//! - **`poll`**: one HTTP request per call, answered with `key=value` lines.
//! - **`file`**: one file per call, taken from a `PathSource` and decoded into
//!   radials by a `RadialDecoder` (see **`level2`**).
//! - **`message`**: one framed binary message per call, cut out of a
//!   continuous byte stream (see **`mavlink`** for the message table).
//!
//! Readers keep no state across calls beyond the transport itself (an open
//! connection, a directory watch). Each call releases whatever it acquired on
//! every exit path. Retry and backoff for a single fetch belong to the reader.
//! The acquisition loop never retries on its own.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::DriverError;

pub mod file;
pub mod level2;
pub mod mavlink;
pub mod message;
pub mod poll;

pub use file::{FileStreamReader, PathSource, RadialDecoder, RadialFile};
pub use level2::{Level2Decoder, MomentBlock, MomentKind, Radial, RadialHeader};
pub use mavlink::{DecodedMessage, MessageSpec};
pub use message::{Connect, MessageReader, Preconnected, TcpConnector};
pub use poll::{parse_key_values, KeyMap, PollUnit};

#[cfg(feature = "watch")]
pub use file::DirectoryWatcher;
#[cfg(feature = "retrieve")]
pub use poll::HttpPollReader;

/// A numeric value as read off the wire, before the schema decides its kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    /// Parses integers first, then floating-point text.
    pub fn parse(text: &str) -> Option<Numeric> {
        let text = text.trim();
        if let Ok(v) = text.parse::<i64>() {
            return Some(Numeric::Int(v));
        }
        text.parse::<f64>().ok().map(Numeric::Float)
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Numeric::Int(v) => v as f64,
            Numeric::Float(v) => v,
        }
    }

    /// Integer view. Floats convert only when they carry no fractional part.
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Numeric::Int(v) => Some(v),
            Numeric::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(v as i64),
            Numeric::Float(_) => None,
        }
    }
}

/// Yields raw units from one transport.
#[async_trait]
pub trait SourceReader: Send {
    /// The transport-specific payload of one cycle.
    type Unit: Send + 'static;

    /// Human-readable description used in log lines.
    fn describe(&self) -> String;

    /// Fetches the next raw unit.
    ///
    /// `Ok(None)` means "nothing this time": the source was empty, or `cancel`
    /// fired while the reader was idle-waiting. A request or decode that has
    /// already started always runs to completion.
    async fn next_unit(&mut self, cancel: &CancellationToken) -> Result<Option<Self::Unit>, DriverError>;
}
