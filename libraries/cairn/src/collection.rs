//! The collection is the unit of persistence and backup: local storage and the remote backup always
//! receive all of it, never a per-entity delta.

use chrono::{DateTime, Utc};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::DeserializeOwned,
    ser::SerializeMap,
};
use serde_json::{Map, Value};

use crate::entity::Entity;

/// Every entity, keyed by id. Backed by a persistent map, so cloning is cheap and snapshots can be
/// taken while holding a lock without copying entities.
///
/// Stored entities that don't decode as `E` are kept as raw JSON under their key and written back
/// untouched, so one bad entity never costs the rest of the collection. Writing an entity under that
/// key replaces the raw value.
#[derive(Clone, Debug, PartialEq)]
pub struct Collection<E> {
    entities: im::HashMap<String, E>,
    // never shares a key with `entities`
    unreadable: im::HashMap<String, Value>,
}

impl<E: Clone> Default for Collection<E> {
    fn default() -> Self {
        Self {
            entities: im::HashMap::new(),
            unreadable: im::HashMap::new(),
        }
    }
}

impl<E: Entity> Collection<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn values(&self) -> impl Iterator<Item = &E> {
        self.entities.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &E)> {
        self.entities.iter().map(|(id, entity)| (id.as_str(), entity))
    }

    /// Stored values that didn't decode, by key.
    pub fn unreadable(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.unreadable.iter().map(|(id, value)| (id.as_str(), value))
    }

    /// Inserts under `entity.id()`, replacing whatever was there.
    pub fn insert(&mut self, entity: E) -> Option<E> {
        let id = entity.id().to_string();
        self.insert_at(id, entity)
    }

    /// Inserts under `id` whatever the entity's own id says.
    pub fn insert_at(&mut self, id: String, entity: E) -> Option<E> {
        self.unreadable.remove(&id);
        self.entities.insert(id, entity)
    }

    pub fn remove(&mut self, id: &str) -> Option<E> {
        self.unreadable.remove(id);
        self.entities.remove(id)
    }

    pub fn merge(&mut self, id: &str, patch: E::Patch) {
        let merged = E::merge(self.entities.get(id), id, patch);
        self.insert_at(id.to_string(), merged);
    }

    /// Copies every key of `other` over this collection, unreadable values included. Keys only this
    /// collection has are kept.
    pub fn overlay(&mut self, other: &Collection<E>) {
        for (id, entity) in &other.entities {
            self.insert_at(id.clone(), entity.clone());
        }
        for (id, value) in &other.unreadable {
            self.entities.remove(id);
            self.unreadable.insert(id.clone(), value.clone());
        }
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Fails only if `bytes` isn't a JSON object.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl<E: Serialize + Clone> Serialize for Collection<E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entities.len() + self.unreadable.len()))?;
        for (id, value) in &self.unreadable {
            map.serialize_entry(id, value)?;
        }
        for (id, entity) in &self.entities {
            map.serialize_entry(id, entity)?;
        }
        map.end()
    }
}

impl<'de, E: DeserializeOwned + Clone> Deserialize<'de> for Collection<E> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let stored = Map::<String, Value>::deserialize(deserializer)?;
        let mut collection = Self::default();
        for (id, value) in stored {
            match E::deserialize(&value) {
                Ok(entity) => {
                    collection.entities.insert(id, entity);
                }
                Err(e) => {
                    log::warn!("Entity `{id}` doesn't decode, keeping it as stored: {e}");
                    collection.unreadable.insert(id, value);
                }
            }
        }
        Ok(collection)
    }
}

impl<E: Entity> FromIterator<E> for Collection<E> {
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        let mut collection = Self::new();
        for entity in iter {
            collection.insert(entity);
        }
        collection
    }
}

/// A collection together with the time it was last edited. `modified_at` is `None` when that is
/// unknown, which happens for a collection that has never been edited on this device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "E: Serialize + Clone",
    deserialize = "E: DeserializeOwned + Clone"
))]
pub struct Snapshot<E> {
    pub entities: Collection<E>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl<E: Entity> Snapshot<E> {
    pub fn new(entities: Collection<E>, modified_at: Option<DateTime<Utc>>) -> Self {
        Self {
            entities,
            modified_at,
        }
    }

    /// Whether this snapshot should replace `local`. A local copy of unknown age is older than anything.
    pub fn is_newer_than(&self, local: &Snapshot<E>) -> bool {
        match (self.modified_at, local.modified_at) {
            (_, None) => true,
            (Some(remote), Some(local)) => remote > local,
            (None, Some(_)) => false,
        }
    }
}
