use std::sync::Arc;

use cairn::{
    FileStore, LocalStore, MemoryStore, Pending, Phase, RemoteBackup, Session, Store, StoreConfig,
    StoreError, Unconfigured, supabase::SupabaseBackup,
};

use crate::{
    config::{BACKUP_TABLE, PlannerConfig},
    race::{Race, RacePatch},
    session::AppSession,
};

/// Everything the screens need: the user's races and the account state that decides whether they get backed up.
#[derive(Clone)]
pub struct Planner {
    store: Store<Race>,
    session: Arc<AppSession>,
}

impl Planner {
    /// Starts loading races from `config.data_dir` in the background. Must be called from within a tokio runtime.
    pub fn open(config: PlannerConfig) -> Self {
        crate::init_logging();

        let local: Arc<dyn LocalStore> = match &config.data_dir {
            Some(dir) => {
                log::info!("Storing races in {}", dir.display());
                Arc::new(FileStore::new(dir))
            }
            None => {
                log::warn!("No data directory configured, races will be lost on exit");
                Arc::new(MemoryStore::new())
            }
        };

        let remote: Arc<dyn RemoteBackup<Race>> = match config.supabase {
            Some(supabase) => Arc::new(SupabaseBackup::new(supabase).with_table(BACKUP_TABLE)),
            None => {
                log::info!("Supabase is not configured, backups are disabled");
                Arc::new(Unconfigured)
            }
        };

        Self::with_backends(config.store, local, remote, Arc::new(AppSession::default()))
    }

    pub fn with_backends(
        config: StoreConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteBackup<Race>>,
        session: Arc<AppSession>,
    ) -> Self {
        let store = Store::init(config, local, remote, session.clone());
        Self { store, session }
    }

    /// Races by date, undated ones last, ties broken by name.
    pub fn races(&self) -> Vec<Race> {
        let mut races = self.store.get_all();
        races.sort_by(|a, b| {
            (a.date.is_none(), a.date, &a.name, &a.id).cmp(&(b.date.is_none(), b.date, &b.name, &b.id))
        });
        races
    }

    pub fn race(&self, id: &str) -> Option<Race> {
        self.store.get_by_id(id)
    }

    pub fn add_race(&self, race: Race) -> Pending {
        log::debug!("Adding race {}", race.id);
        self.store.add(race)
    }

    pub fn update_race(&self, id: &str, patch: RacePatch) -> Pending {
        self.store.update(id, patch)
    }

    pub fn delete_race(&self, id: &str) -> Pending {
        log::debug!("Deleting race {id}");
        self.store.delete(id)
    }

    /// Resolves once the notes are on disk and, for premium users, backed up.
    pub async fn update_notes(&self, id: &str, notes: impl Into<String>) -> Result<(), StoreError> {
        self.store.update_notes(id, notes).finished().await
    }

    pub async fn request_backup(&self) -> Result<(), StoreError> {
        self.store.request_backup().await
    }

    pub fn is_loading(&self) -> bool {
        self.store.is_loading()
    }

    pub fn phase(&self) -> Phase {
        self.store.phase()
    }

    pub async fn ready(&self) {
        self.store.ready().await
    }

    pub fn session(&self) -> Session {
        self.session.current()
    }

    pub fn sign_in(&self, user_id: impl Into<String>, access_token: impl Into<String>) {
        self.session.sign_in(user_id, access_token);
        self.store.session_changed();
    }

    pub fn sign_out(&self) {
        self.session.sign_out();
        self.store.session_changed();
    }

    pub fn set_premium(&self, is_premium: bool) {
        self.session.set_premium(is_premium);
        self.store.session_changed();
    }

    /// Saves anything pending and stops background work.
    pub async fn shutdown(&self) {
        self.store.dispose().await
    }

    pub fn store(&self) -> &Store<Race> {
        &self.store
    }
}
