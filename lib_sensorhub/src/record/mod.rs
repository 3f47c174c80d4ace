//! # Record Instance
//!
//! One concrete value per field of a `RecordSchema`, plus the implicit capture
//! time. Values are a small tagged union (`FieldValue`) addressed by field name.
//!
//! Drivers keep a single *working* record for the lifetime of their
//! acquisition loop and fill it cycle after cycle. What gets published is a
//! clone, which is never touched again. Keeping the working record means array
//! fields are resized in place, and fields that a cycle does not mention keep
//! their last value.

mod encoding;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::errors::RecordError;
use crate::schema::{FieldKind, RecordSchema};

pub use encoding::TextEncoding;

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Time(DateTime<Utc>),
    Float(f64),
    Int(i64),
    FloatArray(Vec<f32>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Time(_) => FieldKind::Timestamp,
            FieldValue::Float(_) => FieldKind::Float,
            FieldValue::Int(_) => FieldKind::Int,
            FieldValue::FloatArray(_) => FieldKind::FloatArray,
        }
    }
}

/// A record conforming to one schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: Arc<RecordSchema>,
    values: Vec<FieldValue>,
    captured_at: DateTime<Utc>,
}

impl Record {
    /// Creates a record holding default values: epoch timestamps, zero scalars,
    /// and arrays of their default length filled with NaN (no data).
    pub fn new(schema: Arc<RecordSchema>) -> Self {
        let values = schema
            .fields()
            .iter()
            .map(|f| match f.kind {
                FieldKind::Timestamp => FieldValue::Time(DateTime::<Utc>::default()),
                FieldKind::Float => FieldValue::Float(0.0),
                FieldKind::Int => FieldValue::Int(0),
                FieldKind::FloatArray => {
                    let len = f.array_length.as_ref().map_or(0, |a| a.default);
                    FieldValue::FloatArray(vec![f32::NAN; len])
                }
            })
            .collect();
        Self {
            schema,
            values,
            captured_at: DateTime::<Utc>::default(),
        }
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Sets the capture time and mirrors it into the schema's time field.
    pub fn stamp(&mut self, time: DateTime<Utc>) {
        self.captured_at = time;
        if let Some(i) = self.schema.time_field() {
            self.values[i] = FieldValue::Time(time);
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.schema.index_of(name).map(|i| &self.values[i])
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn time(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.get(name)? {
            FieldValue::Time(v) => Some(*v),
            _ => None,
        }
    }

    pub fn array(&self, name: &str) -> Option<&[f32]> {
        match self.get(name)? {
            FieldValue::FloatArray(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Iterates `(field name, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.schema
            .fields()
            .iter()
            .map(|f| f.name.as_str())
            .zip(self.values.iter())
    }

    fn slot(&mut self, name: &str, kind: FieldKind) -> Result<&mut FieldValue, RecordError> {
        let i = self.schema.index_of(name).ok_or_else(|| RecordError::UnknownField {
            record: self.schema.name().to_string(),
            field: name.to_string(),
        })?;
        let declared = self.schema.fields()[i].kind;
        if declared != kind {
            return Err(RecordError::KindMismatch {
                field: name.to_string(),
                expected: declared.label(),
                found: kind.label(),
            });
        }
        Ok(&mut self.values[i])
    }

    pub fn set_float(&mut self, name: &str, value: f64) -> Result<(), RecordError> {
        *self.slot(name, FieldKind::Float)? = FieldValue::Float(value);
        Ok(())
    }

    pub fn set_int(&mut self, name: &str, value: i64) -> Result<(), RecordError> {
        *self.slot(name, FieldKind::Int)? = FieldValue::Int(value);
        Ok(())
    }

    pub fn set_time(&mut self, name: &str, value: DateTime<Utc>) -> Result<(), RecordError> {
        *self.slot(name, FieldKind::Timestamp)? = FieldValue::Time(value);
        Ok(())
    }

    /// Replaces the content of an array field, resizing it to `data.len()`.
    /// The existing buffer is reused.
    pub fn fill_array(&mut self, name: &str, data: &[f32]) -> Result<(), RecordError> {
        if let FieldValue::FloatArray(buf) = self.slot(name, FieldKind::FloatArray)? {
            buf.clear();
            buf.extend_from_slice(data);
        }
        Ok(())
    }

    /// Stores any value, checking it against the declared kind.
    pub fn set(&mut self, name: &str, value: FieldValue) -> Result<(), RecordError> {
        let kind = value.kind();
        *self.slot(name, kind)? = value;
        Ok(())
    }
}

struct ValueRef<'a>(&'a FieldValue);

impl Serialize for ValueRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            FieldValue::Time(t) => serializer.serialize_str(&t.to_rfc3339()),
            FieldValue::Float(v) => serializer.serialize_f64(*v),
            FieldValue::Int(v) => serializer.serialize_i64(*v),
            FieldValue::FloatArray(v) => v.serialize(serializer),
        }
    }
}

/// Serializes as a map in schema order, so consumers address fields by name.
impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &ValueRef(value))?;
        }
        map.end()
    }
}
