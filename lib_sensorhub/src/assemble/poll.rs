use std::sync::Arc;

use chrono::Utc;
use log::debug;

use crate::errors::DriverError;
use crate::record::Record;
use crate::schema::{FieldKind, RecordSchema};
use crate::source::PollUnit;

use super::{store_numeric, Assembled, Assembler};

/// Maps each polled value onto the field of the same name.
///
/// Fields absent from a response keep their last known value. A response is
/// applied all-or-nothing: if one value does not fit its field, the working
/// record is left untouched.
pub struct PollAssembler {
    working: Record,
}

impl PollAssembler {
    pub fn new(schema: Arc<RecordSchema>) -> Self {
        Self {
            working: Record::new(schema),
        }
    }
}

impl Assembler for PollAssembler {
    type Unit = PollUnit;

    fn assemble(&mut self, unit: PollUnit) -> Result<Vec<Assembled>, DriverError> {
        let mut next = self.working.clone();
        for (field, value) in &unit.values {
            store_numeric(&mut next, field, *value)?;
        }

        let absent: Vec<&str> = next
            .schema()
            .fields()
            .iter()
            .filter(|f| f.kind != FieldKind::Timestamp && unit.get(&f.name).is_none())
            .map(|f| f.name.as_str())
            .collect();
        if !absent.is_empty() {
            debug!("poll response without {:?}, keeping previous values", absent);
        }

        next.stamp(Utc::now());
        self.working = next;
        Ok(vec![Assembled::complete(self.working.clone())])
    }
}
