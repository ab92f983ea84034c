//! This is a library for keeping a user's collection of entities in memory, on the device, and in a remote backup.
//! It was created for a race planner, so it doesn't include much that was not needed for that project.
//!
//! Persistence strategy:
//! 1. The in-memory collection is the source of truth. Every mutation applies to it synchronously, so reads never wait on I/O.
//! 2. At startup the store is seeded with an empty collection, then loads whatever the device has stored. A missing or corrupt value is replaced with an empty one.
//! 3. After each mutation, a write of the *whole* collection to local storage is scheduled, along with the time of the edit. Bursts of mutations are debounced into a single write.
//!    Entities that no longer decode are kept as stored rather than dropped; only a value that isn't a JSON object at all is replaced.
//! 4. If the session is signed in and premium, a push of the whole collection to the remote backup is scheduled the same way, with a longer delay.
//! 5. Once per session, when the user is entitled, the store asks the remote backup whether it has something edited more recently than what the device has.
//!
//! Writes and pushes are each run by a single worker, so they land in the order they were issued and always carry the newest state.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod backup;
pub mod collection;
pub mod config;
mod debounce;
pub mod entity;
pub mod error;
pub mod local;
pub mod store;

#[cfg(feature = "supabase")]
pub mod supabase;

pub use backup::{MemoryBackup, RemoteBackup, Session, SessionProvider, Unconfigured};
pub use collection::{Collection, Snapshot};
pub use config::StoreConfig;
pub use debounce::Pending;
pub use entity::{Entity, Record};
pub use error::{BackupError, LocalStoreError, StoreError};
pub use local::{FileStore, LocalStore, MemoryStore};
pub use store::{Phase, Store};

/// Locks a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
