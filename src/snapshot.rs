use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Point-in-time copy of the user collection.
///
/// Records keep the order the source returned them in. Nothing in this crate
/// mutates a snapshot after it is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub captured_at: DateTime<Utc>,
    pub records: Vec<Record>,
}

impl CollectionSnapshot {
    pub fn new(captured_at: DateTime<Utc>, records: Vec<Record>) -> Self {
        CollectionSnapshot {
            captured_at,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.iter().find(|record| record.key == key)
    }
}
