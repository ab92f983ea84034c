//! # Entities
//! The store doesn't know what an entity looks like. It only needs to find its id, merge a partial update into it,
//! and build the partial update that replaces its notes.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// A partial update. Only the fields it carries are replaced.
    type Patch: Clone + Send + Sync + 'static;

    fn id(&self) -> &str;

    /// Shallow-merge `patch` onto `existing`. When nothing is stored under `id` yet, `existing` is `None`
    /// and the result is built from the patch alone.
    fn merge(existing: Option<&Self>, id: &str, patch: Self::Patch) -> Self;

    fn notes_patch(notes: String) -> Self::Patch;
}

/// An untyped entity: a JSON object whose `"id"` field is its key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("id".to_string(), Value::String(id.into()));
        Self(fields)
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl Entity for Record {
    type Patch = Map<String, Value>;

    fn id(&self) -> &str {
        self.0.get("id").and_then(Value::as_str).unwrap_or_default()
    }

    // One level deep: nested objects in the patch replace the stored value rather than merging into it.
    // A patch for an unknown id becomes the record as-is, without an `"id"` field unless the patch has one.
    fn merge(existing: Option<&Self>, _id: &str, patch: Self::Patch) -> Self {
        let mut fields = existing.map(|record| record.0.clone()).unwrap_or_default();
        fields.extend(patch);
        Self(fields)
    }

    fn notes_patch(notes: String) -> Self::Patch {
        let mut patch = Map::new();
        patch.insert("notes".to_string(), Value::String(notes));
        patch
    }
}
