use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::trace;

use crate::errors::DriverError;
use crate::record::Record;
use crate::schema::RecordSchema;
use crate::source::DecodedMessage;

use super::{store_numeric, Assembled, Assembler};

/// One decoded message becomes one record of the output named after it.
///
/// Messages without an enabled output are dropped.
pub struct MessageAssembler {
    outputs: HashMap<u8, Record>,
}

impl MessageAssembler {
    /// `outputs` pairs each message id with the schema of its output.
    pub fn new(outputs: impl IntoIterator<Item = (u8, Arc<RecordSchema>)>) -> Self {
        Self {
            outputs: outputs
                .into_iter()
                .map(|(id, schema)| (id, Record::new(schema)))
                .collect(),
        }
    }
}

impl Assembler for MessageAssembler {
    type Unit = DecodedMessage;

    fn assemble(&mut self, message: DecodedMessage) -> Result<Vec<Assembled>, DriverError> {
        let Some(record) = self.outputs.get_mut(&message.spec.id) else {
            trace!("{} has no enabled output", message.spec.name);
            return Ok(Vec::new());
        };
        for (field, value) in message.spec.fields.iter().zip(&message.values) {
            store_numeric(record, field.name, *value)?;
        }
        record.stamp(Utc::now());
        Ok(vec![Assembled::complete(record.clone())])
    }
}
