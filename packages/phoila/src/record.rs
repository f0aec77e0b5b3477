//! Classification of decoded stream records.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::outputs::OutputArea;

pub const KERNEL_ID_FIELD: &str = "kernelId";
pub const SOURCE_FIELD: &str = "source";

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// The kernel backing the rendered notebook.
    Connection { kernel_id: String },
    /// A rendered cell.
    Content(ContentRecord),
    /// Anything else. Dropped by the session.
    Ignored(Value),
}

/// A rendered cell: its HTML fragment plus whatever other fields the server
/// sent alongside it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContentRecord {
    pub source: String,
    pub extra: Map<String, Value>,
}

impl Record {
    /// A string `kernelId` makes a connection descriptor, even when the
    /// record also carries a `source`. Otherwise a string `source` makes a
    /// content record.
    pub fn classify(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return Record::Ignored(value);
        };

        if let Some(Value::String(kernel_id)) = map.get(KERNEL_ID_FIELD) {
            return Record::Connection {
                kernel_id: kernel_id.clone(),
            };
        }

        match map.remove(SOURCE_FIELD) {
            Some(Value::String(source)) => Record::Content(ContentRecord { source, extra: map }),
            Some(other) => {
                map.insert(SOURCE_FIELD.to_string(), other);
                Record::Ignored(Value::Object(map))
            }
            None => Record::Ignored(Value::Object(map)),
        }
    }
}

/// A content record paired with the output areas extracted from it.
///
/// This is what session consumers receive. `index` is the record's position
/// among the session's admitted content records, the same index
/// [`crate::NotebookSession::clone_output`] takes.
#[derive(Debug, Clone)]
pub struct ContentEntry {
    pub index: usize,
    pub record: Arc<ContentRecord>,
    pub outputs: Arc<[OutputArea]>,
}

impl ContentEntry {
    pub fn source(&self) -> &str {
        &self.record.source
    }
}
