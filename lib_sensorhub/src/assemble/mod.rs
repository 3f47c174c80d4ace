//! # Record Assemblers
//!
//! An assembler turns one raw unit into zero or more finished records. It owns
//! the *working* record(s) of its driver: values that a unit does not mention
//! survive into the next cycle, and array fields are resized in place.
//!
//! ## Contained Modules:
//!
//! - **`poll`**: maps `key=value` responses onto scalar fields.
//! - **`radial`**: merges moment blocks of each radial into one record and
//!   applies the partial-data policy.
//! - **`message`**: one decoded wire message becomes one record of the
//!   matching output.

use crate::errors::{DriverError, RecordError};
use crate::record::Record;
use crate::schema::FieldKind;
use crate::source::Numeric;

pub mod message;
pub mod poll;
pub mod radial;

pub use message::MessageAssembler;
pub use poll::PollAssembler;
pub use radial::{RadialAssembler, RADIAL_OUTPUT};

/// A finished record plus the sub-parts it lacks.
///
/// A non-empty `missing` list marks a degraded record. It is still published.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembled {
    pub record: Record,
    pub missing: Vec<String>,
}

impl Assembled {
    pub fn complete(record: Record) -> Self {
        Self {
            record,
            missing: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.missing.is_empty()
    }
}

/// Per-cycle assembly logic for one raw unit type.
pub trait Assembler: Send {
    type Unit: Send + 'static;

    fn assemble(&mut self, unit: Self::Unit) -> Result<Vec<Assembled>, DriverError>;

    /// Parts of the last unit that were skipped while the rest was assembled.
    fn take_rejected(&mut self) -> Vec<DriverError> {
        Vec::new()
    }
}

/// Converts a wire number to the kind the schema declares for `field`.
///
/// Floats only go into integer fields when they carry no fraction.
pub(crate) fn store_numeric(record: &mut Record, field: &str, value: Numeric) -> Result<(), RecordError> {
    let kind = record.schema().field(field).map(|f| f.kind);
    match kind {
        Some(FieldKind::Float) => record.set_float(field, value.as_f64()),
        Some(FieldKind::Int) => match value.as_i64() {
            Some(v) => record.set_int(field, v),
            None => Err(RecordError::KindMismatch {
                field: field.to_string(),
                expected: FieldKind::Int.label(),
                found: FieldKind::Float.label(),
            }),
        },
        Some(other) => Err(RecordError::KindMismatch {
            field: field.to_string(),
            expected: other.label(),
            found: FieldKind::Float.label(),
        }),
        None => Err(RecordError::UnknownField {
            record: record.schema().name().to_string(),
            field: field.to_string(),
        }),
    }
}
