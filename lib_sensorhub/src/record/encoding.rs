//! Text rendering of records, one block per record.

use std::fmt::Write;

use super::{FieldValue, Record};

/// Separator-based text encoding advertised by every output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEncoding {
    pub token_separator: String,
    pub block_separator: String,
}

impl Default for TextEncoding {
    fn default() -> Self {
        Self {
            token_separator: ",".to_string(),
            block_separator: "\n".to_string(),
        }
    }
}

impl TextEncoding {
    /// Renders one block. Array elements are flattened in order.
    pub fn encode(&self, record: &Record) -> String {
        let mut out = String::new();
        let mut first = true;
        for (_, value) in record.iter() {
            match value {
                FieldValue::FloatArray(items) => {
                    for item in items {
                        self.token(&mut out, &mut first);
                        let _ = write!(out, "{}", item);
                    }
                }
                FieldValue::Time(t) => {
                    self.token(&mut out, &mut first);
                    out.push_str(&t.to_rfc3339());
                }
                FieldValue::Float(v) => {
                    self.token(&mut out, &mut first);
                    let _ = write!(out, "{}", v);
                }
                FieldValue::Int(v) => {
                    self.token(&mut out, &mut first);
                    let _ = write!(out, "{}", v);
                }
            }
        }
        out.push_str(&self.block_separator);
        out
    }

    fn token(&self, out: &mut String, first: &mut bool) {
        if !*first {
            out.push_str(&self.token_separator);
        }
        *first = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RecordSchema, SchemaOptions};
    use std::sync::Arc;

    #[test]
    fn renders_scalars_then_flattened_arrays() {
        let schema = RecordSchema::builder("r")
            .time("time")
            .int("count")
            .float_array("data", "db", 0, Some("count"))
            .build(&SchemaOptions::new())
            .unwrap();
        let mut record = Record::new(Arc::new(schema));
        record.set_int("count", 2).unwrap();
        record.fill_array("data", &[1.5, -2.0]).unwrap();

        let text = TextEncoding::default().encode(&record);
        assert_eq!(text, "1970-01-01T00:00:00+00:00,2,1.5,-2\n");
    }
}
