//! Remote backup and the session that gates it.

use std::{
    collections::HashMap,
    sync::{
        Mutex, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use chrono::Utc;
use futures::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};

use crate::{
    collection::Snapshot,
    entity::Entity,
    error::BackupError,
    lock,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: Option<String>,
    pub access_token: Option<String>,
    pub is_premium: bool,
}

impl Session {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn signed_in(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            access_token: Some(access_token.into()),
            is_premium: false,
        }
    }

    pub fn premium(mut self, is_premium: bool) -> Self {
        self.is_premium = is_premium;
        self
    }

    /// Remote backup is only attempted for signed-in premium users.
    pub fn is_entitled(&self) -> bool {
        self.user_id.is_some() && self.is_premium
    }
}

/// Read synchronously every time the store needs to decide whether to back up.
pub trait SessionProvider: Send + Sync {
    fn session(&self) -> Session;
}

impl SessionProvider for Session {
    fn session(&self) -> Session {
        self.clone()
    }
}

impl SessionProvider for RwLock<Session> {
    fn session(&self) -> Session {
        self.read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

pub trait RemoteBackup<E: Entity>: Send + Sync {
    /// Replaces the user's remote copy with `snapshot`.
    fn push_snapshot<'a>(
        &'a self,
        session: &'a Session,
        snapshot: &'a Snapshot<E>,
    ) -> BoxFuture<'a, Result<(), BackupError>>;

    /// Returns the remote copy if it is newer than `local`, `None` otherwise.
    fn pull_if_newer<'a>(
        &'a self,
        session: &'a Session,
        local: &'a Snapshot<E>,
    ) -> BoxFuture<'a, Result<Option<Snapshot<E>>, BackupError>>;
}

/// For builds without a backup service. Every call fails with [`BackupError::Unconfigured`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

impl<E: Entity> RemoteBackup<E> for Unconfigured {
    fn push_snapshot<'a>(
        &'a self,
        _session: &'a Session,
        _snapshot: &'a Snapshot<E>,
    ) -> BoxFuture<'a, Result<(), BackupError>> {
        Box::pin(future::ready(Err(BackupError::Unconfigured)))
    }

    fn pull_if_newer<'a>(
        &'a self,
        _session: &'a Session,
        _local: &'a Snapshot<E>,
    ) -> BoxFuture<'a, Result<Option<Snapshot<E>>, BackupError>> {
        Box::pin(future::ready(Err(BackupError::Unconfigured)))
    }
}

/// An in-process backup service keyed by user id. Last writer wins. A push keeps the snapshot's edit time,
/// or is stamped with the time it arrived if the snapshot has none.
#[derive(Debug)]
pub struct MemoryBackup<E: Entity> {
    copies: Mutex<HashMap<String, Snapshot<E>>>,
    pushes: AtomicUsize,
    pulls: AtomicUsize,
}

impl<E: Entity> Default for MemoryBackup<E> {
    fn default() -> Self {
        Self {
            copies: Mutex::new(HashMap::new()),
            pushes: AtomicUsize::new(0),
            pulls: AtomicUsize::new(0),
        }
    }
}

impl<E: Entity> MemoryBackup<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(&self, user_id: &str) -> Option<Snapshot<E>> {
        lock(&self.copies).get(user_id).cloned()
    }

    pub fn seed(&self, user_id: impl Into<String>, snapshot: Snapshot<E>) {
        lock(&self.copies).insert(user_id.into(), snapshot);
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

impl<E: Entity> RemoteBackup<E> for MemoryBackup<E> {
    fn push_snapshot<'a>(
        &'a self,
        session: &'a Session,
        snapshot: &'a Snapshot<E>,
    ) -> BoxFuture<'a, Result<(), BackupError>> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let result = match &session.user_id {
            Some(user_id) => {
                let stamped = Snapshot::new(
                    snapshot.entities.clone(),
                    Some(snapshot.modified_at.unwrap_or_else(Utc::now)),
                );
                lock(&self.copies).insert(user_id.clone(), stamped);
                Ok(())
            }
            None => Err(BackupError::Unauthenticated),
        };
        Box::pin(future::ready(result))
    }

    fn pull_if_newer<'a>(
        &'a self,
        session: &'a Session,
        local: &'a Snapshot<E>,
    ) -> BoxFuture<'a, Result<Option<Snapshot<E>>, BackupError>> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let result = match &session.user_id {
            Some(user_id) => Ok(self
                .stored(user_id)
                .filter(|remote| remote.is_newer_than(local))),
            None => Err(BackupError::Unauthenticated),
        };
        Box::pin(future::ready(result))
    }
}
