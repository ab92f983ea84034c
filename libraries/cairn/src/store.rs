//! # Store
//! Owns the in-memory collection and drives everything that happens to it in the background: the startup load,
//! debounced local writes, debounced remote pushes, and the one-time pull from the remote backup.
//!
//! We never hold the state lock across an `.await`. Mutations take the lock, apply, release, and then hand off to
//! the debouncers, so they never wait on I/O.

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use chrono::{DateTime, Utc};
use futures::FutureExt as _;
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    backup::{RemoteBackup, Session, SessionProvider},
    collection::{Collection, Snapshot},
    config::StoreConfig,
    debounce::{Debouncer, Fire, Fired, Job, Pending},
    entity::Entity,
    error::StoreError,
    local::LocalStore,
    lock,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Uninitialized,
    /// The collection is empty and the local load hasn't started.
    Seeded,
    Loading,
    Ready,
}

/// A cheap, cloneable handle. All clones share one collection.
pub struct Store<E: Entity> {
    shared: Arc<Shared<E>>,
}

impl<E: Entity> Clone for Store<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<E: Entity> {
    config: StoreConfig,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteBackup<E>>,
    session: Arc<dyn SessionProvider>,
    state: Mutex<State<E>>,
    phase: watch::Sender<Phase>,
    persist: Debouncer,
    backup: Debouncer,
    reconcile: Mutex<Reconcile>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct State<E: Entity> {
    collection: Collection<E>,
    /// Number of mutations applied this session.
    seq: u64,
    /// When the collection was last edited, on this device or on the one whose backup was pulled.
    modified_at: Option<DateTime<Utc>>,
    /// Mutations made before the local load finished, replayed on top of whatever it loads.
    journal: Option<Vec<Op<E>>>,
    disposed: bool,
}

/// Stored under [`StoreConfig::modified_at_key`] after every write of the collection.
#[derive(Debug, Serialize, Deserialize)]
struct Stamp {
    modified_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reconcile {
    Idle,
    Running,
    Done,
}

#[derive(Clone)]
enum Op<E: Entity> {
    Put(E),
    Merge { id: String, patch: E::Patch },
    Remove(String),
}

impl<E: Entity> Op<E> {
    fn apply(self, collection: &mut Collection<E>) {
        match self {
            Op::Put(entity) => {
                collection.insert(entity);
            }
            Op::Merge { id, patch } => collection.merge(&id, patch),
            Op::Remove(id) => {
                collection.remove(&id);
            }
        }
    }
}

impl<E: Entity> Store<E> {
    /// Seeds an empty collection and starts loading local storage in the background.
    /// Must be called from within a tokio runtime.
    pub fn init(
        config: StoreConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteBackup<E>>,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Uninitialized);
        let shared = Arc::new_cyclic(|weak: &Weak<Shared<E>>| Shared {
            persist: Debouncer::spawn(
                "persist",
                config.persist_delay(),
                phase.subscribe(),
                job(weak.clone(), |shared, fire| shared.persist(fire)),
            ),
            backup: Debouncer::spawn(
                "backup",
                config.backup_delay(),
                phase.subscribe(),
                job(weak.clone(), |shared, fire| shared.push(fire)),
            ),
            config,
            local,
            remote,
            session,
            state: Mutex::new(State {
                collection: Collection::new(),
                seq: 0,
                modified_at: None,
                journal: Some(Vec::new()),
                disposed: false,
            }),
            phase,
            reconcile: Mutex::new(Reconcile::Idle),
            tasks: Mutex::new(Vec::new()),
        });

        shared.phase.send_replace(Phase::Seeded);
        log::info!("Store seeded with an empty collection");

        let store = Self { shared };
        let loader = tokio::spawn(store.clone().load());
        lock(&store.shared.tasks).push(loader);
        store
    }

    // =======
    // reads
    // =======

    pub fn get_all(&self) -> Vec<E> {
        self.state().collection.values().cloned().collect()
    }

    pub fn get_by_id(&self, id: &str) -> Option<E> {
        self.state().collection.get(id).cloned()
    }

    pub fn snapshot(&self) -> Collection<E> {
        self.state().collection.clone()
    }

    pub fn len(&self) -> usize {
        self.state().collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().collection.is_empty()
    }

    pub fn phase(&self) -> Phase {
        *self.shared.phase.borrow()
    }

    /// True until the local load has finished, whichever way it went.
    pub fn is_loading(&self) -> bool {
        self.phase() != Phase::Ready
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.shared.phase.subscribe()
    }

    pub async fn ready(&self) {
        let mut phase = self.shared.phase.subscribe();
        // the sender lives as long as `self`, so this can't fail
        let _ = phase.wait_for(|phase| *phase == Phase::Ready).await;
    }

    // =======
    // mutations
    // =======

    /// Inserts `entity` under its id, replacing anything already there.
    pub fn add(&self, entity: E) -> Pending {
        self.mutate(Op::Put(entity))
    }

    /// Shallow-merges `patch` onto the entity at `id`. An unknown id is not an error: the entity is built
    /// from the patch alone.
    pub fn update(&self, id: &str, patch: E::Patch) -> Pending {
        self.mutate(Op::Merge {
            id: id.to_string(),
            patch,
        })
    }

    /// Removing an id that isn't there does nothing.
    pub fn delete(&self, id: &str) -> Pending {
        self.mutate(Op::Remove(id.to_string()))
    }

    pub fn update_notes(&self, id: &str, notes: impl Into<String>) -> Pending {
        self.update(id, E::notes_patch(notes.into()))
    }

    fn mutate(&self, op: Op<E>) -> Pending {
        let entitled = self.shared.session.session().is_entitled();
        {
            let mut state = self.state();
            if state.disposed {
                log::warn!("Store is disposed, this change will not be saved");
            }
            if let Some(journal) = state.journal.as_mut() {
                journal.push(op.clone());
            }
            op.apply(&mut state.collection);
            state.seq += 1;
            state.modified_at = Some(Utc::now());
        }

        Pending {
            saved: self.shared.persist.request(false),
            backed_up: entitled.then(|| self.shared.backup.request(false)),
        }
    }

    // =======
    // backup
    // =======

    /// Pushes the whole collection to the remote backup now. Fails without contacting the remote if the session
    /// isn't signed in and premium.
    pub async fn request_backup(&self) -> Result<(), StoreError> {
        if !self.shared.session.session().is_entitled() {
            return Err(StoreError::NotEntitled);
        }
        self.shared.backup.request(true).wait().await
    }

    /// Tell the store the session may have changed. The first time it finds the session entitled (after the local
    /// load), it asks the remote backup for anything newer.
    pub fn session_changed(&self) {
        self.maybe_reconcile();
    }

    // =======
    // lifecycle
    // =======

    /// Writes the collection now and waits for the write.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.shared.persist.request(true).wait().await
    }

    /// Flushes, then stops every background task. Later mutations still apply in memory but are not persisted.
    pub async fn dispose(&self) {
        if let Err(e) = self.flush().await {
            log::warn!("Final flush before dispose failed: {e}");
        }
        self.state().disposed = true;
        self.shared.persist.shutdown();
        self.shared.backup.shutdown();
        for task in lock(&self.shared.tasks).drain(..) {
            task.abort();
        }
        log::info!("Store disposed");
    }

    fn state(&self) -> MutexGuard<'_, State<E>> {
        lock(&self.shared.state)
    }

    async fn load(self) {
        tokio::time::sleep(self.shared.config.load_delay()).await;
        self.shared.phase.send_replace(Phase::Loading);

        let key = self.shared.config.collection_key.as_str();
        let (loaded, stored_modified_at) = match self
            .shared
            .with_timeout("local read", self.shared.local.read(key))
            .await
        {
            Ok(Ok(Some(bytes))) => match Collection::<E>::from_json_bytes(&bytes) {
                Ok(collection) => {
                    log::info!("Loaded {} entities from `{key}`", collection.len());
                    let unreadable = collection.unreadable().count();
                    if unreadable > 0 {
                        log::warn!("{unreadable} stored entities don't decode and are kept as they are");
                    }
                    let modified_at = self.shared.read_modified_at(&collection).await;
                    (Some(collection), modified_at)
                }
                Err(e) => {
                    log::warn!("Stored value under `{key}` is not a collection, resetting it: {e}");
                    self.shared.write_empty().await;
                    (None, None)
                }
            },
            Ok(Ok(None)) => {
                log::info!("Nothing stored under `{key}` yet, initializing it");
                self.shared.write_empty().await;
                (None, None)
            }
            Ok(Err(e)) => {
                log::error!("{}", StoreError::LocalRead(e));
                (None, None)
            }
            Err(e) => {
                log::error!("{e}");
                (None, None)
            }
        };

        let replayed = {
            let mut state = self.state();
            // changes made while loading are newer than anything stored
            state.modified_at = state.modified_at.or(stored_modified_at);
            let mut collection = loaded.unwrap_or_default();
            let journal = state.journal.take().unwrap_or_default();
            let replayed = journal.len();
            for op in journal {
                op.apply(&mut collection);
            }
            state.collection = collection;
            replayed
        };

        self.shared.phase.send_replace(Phase::Ready);
        log::info!("Store ready");

        if replayed > 0 {
            log::info!("Replayed {replayed} changes made while loading");
            self.shared.persist.request(false);
        }

        self.maybe_reconcile();
    }

    fn maybe_reconcile(&self) {
        if self.phase() != Phase::Ready {
            return;
        }
        let session = self.shared.session.session();
        if !session.is_entitled() {
            return;
        }
        {
            let mut reconcile = lock(&self.shared.reconcile);
            if *reconcile != Reconcile::Idle {
                return;
            }
            *reconcile = Reconcile::Running;
        }

        let task = tokio::spawn(self.clone().reconcile(session));
        let mut tasks = lock(&self.shared.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    /// The remote copy only wins if nothing has been edited locally this session, checked both before asking and
    /// after the answer arrives.
    async fn reconcile(self, session: Session) {
        let (local, seq) = self.shared.snapshot();
        let next = if seq > 0 {
            log::info!("Skipping remote reconciliation, the collection was already edited this session");
            Reconcile::Done
        } else {
            match self
                .shared
                .with_timeout(
                    "remote pull",
                    self.shared.remote.pull_if_newer(&session, &local),
                )
                .await
            {
                Ok(Ok(Some(remote))) => {
                    self.apply_remote(remote);
                    Reconcile::Done
                }
                Ok(Ok(None)) => {
                    log::info!("Remote backup has nothing newer");
                    Reconcile::Done
                }
                Ok(Err(e)) => {
                    log::error!("Failed to pull remote backup: {e}");
                    Reconcile::Idle
                }
                Err(e) => {
                    log::error!("{e}");
                    Reconcile::Idle
                }
            }
        };
        *lock(&self.shared.reconcile) = next;
    }

    fn apply_remote(&self, remote: Snapshot<E>) {
        let count = remote.entities.len();
        {
            let mut state = self.state();
            if state.seq > 0 {
                log::warn!("Discarding pulled backup, the collection was edited while pulling");
                return;
            }
            state.collection.overlay(&remote.entities);
            state.seq += 1;
            state.modified_at = Some(remote.modified_at.unwrap_or_else(Utc::now));
        }
        log::info!("Merged {count} entities from the remote backup");

        self.shared.persist.request(false);
        if self.shared.session.session().is_entitled() {
            self.shared.backup.request(false);
        }
    }
}

/// Wraps one of the store's effects as a debouncer job. The job holds a weak reference so the workers don't keep
/// the store alive.
fn job<E, F, Fut>(shared: Weak<Shared<E>>, effect: F) -> Job
where
    E: Entity,
    F: Fn(Arc<Shared<E>>, Fire) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Fired> + Send + 'static,
{
    let effect = Arc::new(effect);
    Box::new(move |fire: Fire| {
        let shared = shared.upgrade();
        let effect = Arc::clone(&effect);
        async move {
            match shared {
                Some(shared) => effect(shared, fire).await,
                None => Fired {
                    seq: 0,
                    outcome: Err(StoreError::Disposed),
                },
            }
        }
        .boxed()
    })
}

impl<E: Entity> Shared<E> {
    fn snapshot(&self) -> (Snapshot<E>, u64) {
        let state = lock(&self.state);
        (
            Snapshot::new(state.collection.clone(), state.modified_at),
            state.seq,
        )
    }

    async fn with_timeout<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = T>,
    ) -> Result<T, StoreError> {
        let after = self.config.io_timeout();
        tokio::time::timeout(after, future)
            .await
            .map_err(|_| StoreError::Timeout { operation, after })
    }

    /// Writes the collection, then the time it was last edited.
    async fn write(
        &self,
        collection: &Collection<E>,
        modified_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let encode = |e: serde_json::Error| StoreError::Encode(e.to_string());
        let bytes = collection.to_json_bytes().map_err(encode)?;
        let stamp = serde_json::to_vec(&Stamp { modified_at }).map_err(encode)?;

        self.write_key(&self.config.collection_key, bytes).await?;
        self.write_key(&self.config.modified_at_key(), stamp).await
    }

    async fn write_key(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.with_timeout("local write", self.local.write(key, bytes))
            .await?
            .map_err(StoreError::LocalWrite)
    }

    /// A stored collection with no readable edit time predates the stamp, or lost it. It is treated as edited
    /// just now, so a backup of unknown age never replaces it.
    async fn read_modified_at(&self, collection: &Collection<E>) -> Option<DateTime<Utc>> {
        let key = self.config.modified_at_key();
        let stamp = match self.with_timeout("local read", self.local.read(&key)).await {
            Ok(Ok(Some(bytes))) => match serde_json::from_slice::<Stamp>(&bytes) {
                Ok(stamp) => Some(stamp),
                Err(e) => {
                    log::warn!("Stored edit time under `{key}` is corrupt: {e}");
                    None
                }
            },
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                log::warn!("{}", StoreError::LocalRead(e));
                None
            }
            Err(e) => {
                log::warn!("{e}");
                None
            }
        };

        match stamp {
            Some(Stamp { modified_at }) => modified_at,
            None if collection.is_empty() => None,
            None => {
                log::info!("No edit time stored under `{key}`, treating the stored collection as current");
                Some(Utc::now())
            }
        }
    }

    async fn write_empty(&self) {
        if let Err(e) = self.write(&Collection::new(), None).await {
            log::error!("Failed to initialize stored collection: {e}");
        }
    }

    async fn persist(self: Arc<Self>, fire: Fire) -> Fired {
        let (snapshot, seq) = self.snapshot();
        if !fire.force && fire.last_landed == Some(seq) {
            log::debug!("Collection at change {seq} is already saved");
            return Fired { seq, outcome: Ok(()) };
        }

        let outcome = self.write(&snapshot.entities, snapshot.modified_at).await;
        match &outcome {
            Ok(()) => log::debug!(
                "Saved {} entities (change {seq})",
                snapshot.entities.len()
            ),
            Err(e) => log::error!("{e}"),
        }
        Fired { seq, outcome }
    }

    async fn push(self: Arc<Self>, fire: Fire) -> Fired {
        let session = self.session.session();
        let (snapshot, seq) = self.snapshot();
        if !session.is_entitled() {
            log::info!("Session is no longer entitled, skipping backup");
            return Fired {
                seq,
                outcome: Err(StoreError::NotEntitled),
            };
        }
        if !fire.force && fire.last_landed == Some(seq) {
            log::debug!("Collection at change {seq} is already backed up");
            return Fired { seq, outcome: Ok(()) };
        }

        let outcome = match self
            .with_timeout("remote push", self.remote.push_snapshot(&session, &snapshot))
            .await
        {
            Ok(result) => result.map_err(StoreError::from),
            Err(e) => Err(e),
        };
        match &outcome {
            Ok(()) => log::info!(
                "Backed up {} entities (change {seq})",
                snapshot.entities.len()
            ),
            Err(e) => log::error!("Backup failed: {e}"),
        }
        Fired { seq, outcome }
    }
}
