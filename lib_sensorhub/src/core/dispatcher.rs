//! # Output Dispatcher
//!
//! Owns every `Publication` of one driver and routes each assembled record to
//! the output named like the record's schema. The record is handed over by
//! value and wrapped in an `Arc` once, so all subscribers share one copy.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, warn};

use crate::assemble::Assembled;
use crate::schema::RecordSchema;

use super::publication::Publication;
use super::stats::LoopStats;

/// Routes records to their outputs.
pub struct Dispatcher {
    outputs: BTreeMap<String, Arc<Publication>>,
    stats: Arc<LoopStats>,
}

impl Dispatcher {
    pub fn new(schemas: impl IntoIterator<Item = Arc<RecordSchema>>, stats: Arc<LoopStats>) -> Self {
        let outputs = schemas
            .into_iter()
            .map(|schema| (schema.name().to_string(), Arc::new(Publication::new(schema))))
            .collect();
        Self { outputs, stats }
    }

    pub fn output(&self, name: &str) -> Option<&Arc<Publication>> {
        self.outputs.get(name)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Arc<Publication>> {
        self.outputs.values()
    }

    /// Publishes one assembled record.
    ///
    /// Degraded records are published like any other; their missing parts are
    /// logged at `warn`.
    pub fn dispatch(&self, assembled: Assembled) {
        let name = assembled.record.schema().name();
        let Some(output) = self.outputs.get(name) else {
            debug!("no output named '{}', record dropped", name);
            return;
        };
        if assembled.is_degraded() {
            warn!(
                "'{}' record at {} is missing {}",
                name,
                assembled.record.captured_at(),
                assembled.missing.join(", ")
            );
            self.stats.record_degraded();
        }
        output.publish(assembled.record);
        self.stats.record_published();
    }
}
