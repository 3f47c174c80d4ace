//! # Poll Source
//!
//! Devices such as IP cameras answer a plain HTTP GET with ASCII lines of the
//! form `key=value`. Keys match case-insensitively, the first `=` separates
//! key from value, and values are numeric. Lines whose key is not in the
//! `KeyMap` are ignored, so newer firmware that reports extra keys does not
//! break the reader.

use crate::errors::{ConfigurationError, TransientFetchError};
use crate::schema::{FieldKind, RecordSchema};

use super::Numeric;

/// Maps device keys to record field names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMap {
    entries: Vec<(String, String)>,
}

impl KeyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(mut self, key: &str, field: &str) -> Self {
        self.entries.push((key.to_string(), field.to_string()));
        self
    }

    /// Field name for a device key, compared without regard to ASCII case.
    pub fn field_for(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, f)| f.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, f)| f.as_str())
    }

    /// Checks that every target is a numeric scalar field of `schema`.
    pub fn validate(&self, schema: &RecordSchema) -> Result<(), ConfigurationError> {
        for field in self.fields() {
            match schema.field(field).map(|f| f.kind) {
                Some(FieldKind::Float) | Some(FieldKind::Int) => {}
                _ => return Err(ConfigurationError::UnknownField(field.to_string())),
            }
        }
        Ok(())
    }
}

/// Recognized values of one poll response, keyed by field name, in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollUnit {
    pub values: Vec<(String, Numeric)>,
}

impl PollUnit {
    pub fn get(&self, field: &str) -> Option<Numeric> {
        self.values.iter().rev().find(|(f, _)| f == field).map(|(_, v)| *v)
    }
}

/// Parses a `key=value` response body.
///
/// A recognized key whose value is not numeric fails the whole response.
pub fn parse_key_values(body: &str, keys: &KeyMap) -> Result<PollUnit, TransientFetchError> {
    let mut unit = PollUnit::default();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (line, ""),
        };
        let Some(field) = keys.field_for(key) else {
            continue;
        };
        let number = Numeric::parse(value).ok_or_else(|| TransientFetchError::Parse {
            key: key.to_string(),
            value: value.to_string(),
        })?;
        unit.values.push((field.to_string(), number));
    }
    Ok(unit)
}

#[cfg(feature = "retrieve")]
pub use http::HttpPollReader;

#[cfg(feature = "retrieve")]
mod http {
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::{parse_key_values, KeyMap, PollUnit};
    use crate::errors::{DriverError, TransientFetchError};
    use crate::retrieve::ky_http::ApiClient;
    use crate::source::SourceReader;

    /// Issues one GET per cycle and parses the `key=value` answer.
    pub struct HttpPollReader {
        client: ApiClient,
        path: String,
        keys: KeyMap,
    }

    impl HttpPollReader {
        pub fn new(client: ApiClient, path: impl Into<String>, keys: KeyMap) -> Self {
            Self {
                client,
                path: path.into(),
                keys,
            }
        }

        /// Fetches and parses one response.
        pub async fn fetch(&self) -> Result<PollUnit, TransientFetchError> {
            let response = self
                .client
                .get_text(&self.path)
                .await
                .map_err(|e| TransientFetchError::Request(format!("{:#}", e)))?;
            if !response.success {
                return Err(TransientFetchError::Status {
                    status: response.status,
                    url: response.url,
                });
            }
            parse_key_values(&response.body, &self.keys)
        }
    }

    #[async_trait]
    impl SourceReader for HttpPollReader {
        type Unit = PollUnit;

        fn describe(&self) -> String {
            format!("GET {}", self.path)
        }

        async fn next_unit(&mut self, _cancel: &CancellationToken) -> Result<Option<PollUnit>, DriverError> {
            Ok(Some(self.fetch().await?))
        }
    }
}
