//! Durable local storage: one blob per key, each read and write atomic on its own.

use std::{
    collections::HashMap,
    io::Write as _,
    path::{Path, PathBuf},
    sync::Mutex,
};

use futures::future::{self, BoxFuture};

use crate::{error::LocalStoreError, lock};

pub trait LocalStore: Send + Sync {
    /// `Ok(None)` when nothing has been written under `key` yet.
    fn read<'a>(&'a self, key: &'a str)
    -> BoxFuture<'a, Result<Option<Vec<u8>>, LocalStoreError>>;

    /// Replaces the whole value under `key`.
    fn write<'a>(&'a self, key: &'a str, bytes: Vec<u8>)
    -> BoxFuture<'a, Result<(), LocalStoreError>>;
}

/// Keeps values in memory. Useful for tests and for sessions that shouldn't touch the disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
    writes: Mutex<HashMap<String, usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.values).get(key).cloned()
    }

    /// Seeds a value without counting it as a write.
    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        lock(&self.values).insert(key.into(), bytes.into());
    }

    /// Writes to every key.
    pub fn write_count(&self) -> usize {
        lock(&self.writes).values().sum()
    }

    pub fn writes_to(&self, key: &str) -> usize {
        lock(&self.writes).get(key).copied().unwrap_or_default()
    }
}

impl LocalStore for MemoryStore {
    fn read<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, LocalStoreError>> {
        Box::pin(future::ready(Ok(self.get(key))))
    }

    fn write<'a>(
        &'a self,
        key: &'a str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), LocalStoreError>> {
        lock(&self.values).insert(key.to_string(), bytes);
        *lock(&self.writes).entry(key.to_string()).or_default() += 1;
        Box::pin(future::ready(Ok(())))
    }
}

/// Stores each key as `<root>/<key>.json`.
///
/// Writes go to a temporary file in `root` that is then renamed over the target, so a process that
/// dies mid-write leaves the previous value in place.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, LocalStoreError> {
        if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
            return Err(LocalStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

impl LocalStore for FileStore {
    fn read<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, LocalStoreError>> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn write<'a>(
        &'a self,
        key: &'a str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), LocalStoreError>> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            let root = self.root.clone();
            tokio::task::spawn_blocking(move || write_atomically(&root, &path, &bytes))
                .await
                .map_err(|e| LocalStoreError::Io(format!("write task failed: {e}")))?
        })
    }
}

fn write_atomically(root: &Path, path: &Path, bytes: &[u8]) -> Result<(), LocalStoreError> {
    std::fs::create_dir_all(root)?;
    let mut file = tempfile::NamedTempFile::new_in(root)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| LocalStoreError::from(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_counts_writes_but_not_seeds() {
        let store = MemoryStore::new();
        store.insert("races", b"{}".to_vec());
        store.write("races", b"{\"a\":{}}".to_vec()).await.unwrap();

        assert_eq!(store.write_count(), 1);
        assert_eq!(store.read("races").await.unwrap(), Some(b"{\"a\":{}}".to_vec()));
        assert_eq!(store.read("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_reads_nothing_before_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));

        assert_eq!(store.read("races").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_replaces_the_whole_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        store.write("races", b"{\"first\":{}}".to_vec()).await.unwrap();
        store.write("races", b"{}".to_vec()).await.unwrap();

        assert_eq!(store.read("races").await.unwrap(), Some(b"{}".to_vec()));
        assert_eq!(
            std::fs::read(dir.path().join("races.json")).unwrap(),
            b"{}".to_vec()
        );
        // only the target file is left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn file_store_rejects_keys_that_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        for key in ["", "../races", "a/b", ".hidden"] {
            assert_eq!(
                store.write(key, Vec::new()).await,
                Err(LocalStoreError::InvalidKey(key.to_string()))
            );
        }
    }
}
