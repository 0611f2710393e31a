//! Documents

use serde::{Deserialize, Serialize};

use crate::value::{self, fields_to_json, Fields, Value};

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique within the collection, never changes once assigned
    pub id: String,

    /// Owning collection
    pub collection: String,

    pub fields: Fields,

    /// Starts at 1, incremented by every update
    pub version: u64,

    /// Time of the last insert or update (unix millis)
    pub updated_at: u64,
}

impl Document {
    pub(crate) fn new(collection: &str, id: String, fields: Fields) -> Self {
        Self {
            id,
            collection: collection.to_string(),
            fields,
            version: 1,
            updated_at: crate::now_millis(),
        }
    }

    /// Merge top-level fields from `patch`, bumping the version
    pub(crate) fn apply_patch(&mut self, patch: Fields) {
        for (name, value) in patch {
            self.fields.insert(name, value);
        }
        self.version += 1;
        self.updated_at = crate::now_millis();
    }

    /// Field at a dotted path (`"address.city"`)
    pub fn get(&self, path: &str) -> Option<&Value> {
        value::lookup(&self.fields, path)
    }

    /// Fields as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        fields_to_json(&self.fields)
    }
}

/// Encrypted body of a `Remove` record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RemovalNotice {
    pub id: String,
    pub removed_at: u64,
}
