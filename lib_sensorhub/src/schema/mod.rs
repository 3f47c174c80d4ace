//! # Record Schema
//!
//! Describes the shape of one published record: an ordered list of named,
//! typed fields. A schema is built once, during driver initialization, from
//! static defaults that may be overridden by `SchemaOptions` (coming from the
//! configuration or from limits reported by the device itself).
//!
//! Once built, a `RecordSchema` is immutable and shared behind an `Arc` by
//! every `Record` that conforms to it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ConfigurationError;

/// The closed set of value kinds a field can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    /// A UTC instant.
    Timestamp,
    /// A floating-point scalar.
    Float,
    /// An integer scalar.
    Int,
    /// A variable-length array of floating-point values.
    FloatArray,
}

impl FieldKind {
    /// Short name used in error messages.
    pub fn label(self) -> &'static str {
        match self {
            FieldKind::Timestamp => "timestamp",
            FieldKind::Float => "float",
            FieldKind::Int => "integer",
            FieldKind::FloatArray => "float array",
        }
    }

    fn is_bounded(self) -> bool {
        matches!(self, FieldKind::Float | FieldKind::Int)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Closed numeric interval a bounded field is expected to stay within.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllowedRange {
    pub min: f64,
    pub max: f64,
}

impl AllowedRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Length information for an array field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayLength {
    /// Number of elements a fresh record allocates before any data arrives.
    pub default: usize,
    /// Name of the integer field that reports the observed element count.
    pub source: Option<String>,
}

/// One entry of a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub unit: Option<String>,
    pub definition: Option<String>,
    pub constraint: Option<AllowedRange>,
    pub array_length: Option<ArrayLength>,
}

impl FieldDescriptor {
    pub fn is_array(&self) -> bool {
        self.kind == FieldKind::FloatArray
    }
}

/// An immutable, ordered description of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    name: String,
    definition: Option<String>,
    fields: Vec<FieldDescriptor>,
    index: HashMap<String, usize>,
}

impl RecordSchema {
    /// Starts a schema with the given output name.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            definition: None,
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> Option<&str> {
        self.definition.as_deref()
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of a field, by exact name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.index_of(name).map(|i| &self.fields[i])
    }

    /// The first timestamp field, which carries the record's capture time.
    pub fn time_field(&self) -> Option<usize> {
        self.fields.iter().position(|f| f.kind == FieldKind::Timestamp)
    }
}

/// Recognized per-field overrides applied at schema build time.
///
/// Keys have the form `<field>.<option>` where option is one of
/// `minValue`, `maxValue` (bounded scalar fields) or `arrayLength`
/// (array fields). Values must be JSON numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaOptions(BTreeMap<String, Value>);

impl SchemaOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Layers `other` on top of `self`; keys present in both take `other`'s value.
    pub fn merged(mut self, other: &SchemaOptions) -> Self {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

const MIN_VALUE: &str = "minValue";
const MAX_VALUE: &str = "maxValue";
const ARRAY_LENGTH: &str = "arrayLength";

/// Collects field declarations in order, then validates them in `build`.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    definition: Option<String>,
    fields: Vec<FieldDescriptor>,
}

impl SchemaBuilder {
    pub fn definition(mut self, uri: impl Into<String>) -> Self {
        self.definition = Some(uri.into());
        self
    }

    fn push(mut self, name: &str, kind: FieldKind, unit: Option<&str>) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.to_string(),
            kind,
            unit: unit.map(str::to_string),
            definition: None,
            constraint: None,
            array_length: None,
        });
        self
    }

    pub fn time(self, name: &str) -> Self {
        self.push(name, FieldKind::Timestamp, Some("UTC"))
    }

    pub fn float(self, name: &str, unit: &str) -> Self {
        self.push(name, FieldKind::Float, Some(unit))
    }

    pub fn int(self, name: &str) -> Self {
        self.push(name, FieldKind::Int, None)
    }

    /// Declares a float array with a default length and the count field that
    /// reports its observed length.
    pub fn float_array(self, name: &str, unit: &str, default_len: usize, length_source: Option<&str>) -> Self {
        let mut builder = self.push(name, FieldKind::FloatArray, Some(unit));
        if let Some(last) = builder.fields.last_mut() {
            last.array_length = Some(ArrayLength {
                default: default_len,
                source: length_source.map(str::to_string),
            });
        }
        builder
    }

    /// Attaches an allowed range to the most recently declared field.
    pub fn bounded(mut self, min: f64, max: f64) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.constraint = Some(AllowedRange { min, max });
        }
        self
    }

    /// Attaches a definition URI to the most recently declared field.
    pub fn described_as(mut self, uri: &str) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.definition = Some(uri.to_string());
        }
        self
    }

    /// Validates declarations, applies `options`, and freezes the schema.
    pub fn build(self, options: &SchemaOptions) -> Result<RecordSchema, ConfigurationError> {
        let mut fields = self.fields;
        let mut index = HashMap::with_capacity(fields.len());
        for (i, f) in fields.iter().enumerate() {
            if index.insert(f.name.clone(), i).is_some() {
                return Err(ConfigurationError::DuplicateField(f.name.clone()));
            }
        }

        for (key, value) in options.iter() {
            let (field_name, option) = key
                .rsplit_once('.')
                .ok_or_else(|| ConfigurationError::UnknownOption(key.clone()))?;
            let pos = *index
                .get(field_name)
                .ok_or_else(|| ConfigurationError::UnknownField(field_name.to_string()))?;
            let field = &mut fields[pos];

            match option {
                MIN_VALUE | MAX_VALUE if field.kind.is_bounded() => {
                    let number = value.as_f64().ok_or_else(|| malformed(key, value, "a number"))?;
                    let range = field.constraint.get_or_insert(AllowedRange {
                        min: f64::NEG_INFINITY,
                        max: f64::INFINITY,
                    });
                    if option == MIN_VALUE {
                        range.min = number;
                    } else {
                        range.max = number;
                    }
                }
                ARRAY_LENGTH if field.is_array() => {
                    let len = value
                        .as_u64()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| malformed(key, value, "a positive integer"))?;
                    if let Some(array) = field.array_length.as_mut() {
                        array.default = len as usize;
                    }
                }
                _ => return Err(ConfigurationError::UnknownOption(key.clone())),
            }
        }

        for f in &fields {
            if let Some(range) = f.constraint {
                if range.min > range.max {
                    return Err(ConfigurationError::InvalidRange {
                        field: f.name.clone(),
                        min: range.min,
                        max: range.max,
                    });
                }
            }
            if let Some(source) = f.array_length.as_ref().and_then(|a| a.source.as_ref()) {
                match index.get(source.as_str()).map(|&i| fields[i].kind) {
                    Some(FieldKind::Int) => {}
                    _ => return Err(ConfigurationError::UnknownField(source.clone())),
                }
            }
        }

        Ok(RecordSchema {
            name: self.name,
            definition: self.definition,
            fields,
            index,
        })
    }
}

fn malformed(key: &str, value: &Value, expected: &'static str) -> ConfigurationError {
    ConfigurationError::MalformedOption {
        key: key.to_string(),
        value: value.to_string(),
        expected,
    }
}
