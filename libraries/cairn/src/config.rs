use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Key the whole collection is stored under in local storage.
    pub collection_key: String,
    /// Delay between startup and the local load, so the host can finish mounting first.
    pub load_delay_ms: u64,
    pub persist_delay_ms: u64,
    pub backup_delay_ms: u64,
    /// Applies to every local read/write and every remote push/pull.
    pub io_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            collection_key: "collection".to_string(),
            load_delay_ms: 100,
            persist_delay_ms: 100,
            backup_delay_ms: 300,
            io_timeout_ms: 10_000,
        }
    }
}

impl StoreConfig {
    pub fn with_collection_key(mut self, key: impl Into<String>) -> Self {
        self.collection_key = key.into();
        self
    }

    /// Key the time of the collection's last edit is stored under, next to the collection.
    pub fn modified_at_key(&self) -> String {
        format!("{}.modified", self.collection_key)
    }

    pub fn load_delay(&self) -> Duration {
        Duration::from_millis(self.load_delay_ms)
    }

    pub fn persist_delay(&self) -> Duration {
        Duration::from_millis(self.persist_delay_ms)
    }

    pub fn backup_delay(&self) -> Duration {
        Duration::from_millis(self.backup_delay_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}
