use std::path::PathBuf;

use cairn::{StoreConfig, supabase::SupabaseConfig};

/// Key the race collection is stored under on the device.
pub const COLLECTION_KEY: &str = "races";
/// Supabase table holding one backup row per user.
pub const BACKUP_TABLE: &str = "race_backups";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a whole number of milliseconds, got {value:?}")]
    InvalidMillis { name: &'static str, value: String },
    #[error("{set} is set but {missing} is not; set both to enable backups")]
    IncompleteSupabase {
        set: &'static str,
        missing: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerConfig {
    /// Where races are stored. Without one, races only live as long as the process.
    pub data_dir: Option<PathBuf>,
    pub store: StoreConfig,
    /// Without one, backups are unavailable even for premium users.
    pub supabase: Option<SupabaseConfig>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            store: StoreConfig::default().with_collection_key(COLLECTION_KEY),
            supabase: None,
        }
    }
}

impl PlannerConfig {
    /// Reads the environment, after loading `.env` if there is one.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            log::debug!("No .env file loaded: {e}");
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.data_dir = lookup("RACE_PLANNER_DATA_DIR")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        let millis = |name: &'static str| -> Result<Option<u64>, ConfigError> {
            lookup(name)
                .map(|value| {
                    value
                        .trim()
                        .parse()
                        .map_err(|_| ConfigError::InvalidMillis { name, value })
                })
                .transpose()
        };
        if let Some(ms) = millis("RACE_PLANNER_PERSIST_DELAY_MS")? {
            config.store.persist_delay_ms = ms;
        }
        if let Some(ms) = millis("RACE_PLANNER_BACKUP_DELAY_MS")? {
            config.store.backup_delay_ms = ms;
        }
        if let Some(ms) = millis("RACE_PLANNER_IO_TIMEOUT_MS")? {
            config.store.io_timeout_ms = ms;
        }

        config.supabase = match (lookup("SUPABASE_URL"), lookup("SUPABASE_ANON_KEY")) {
            (Some(supabase_url), Some(supabase_anon_key)) => Some(SupabaseConfig {
                supabase_url,
                supabase_anon_key,
            }),
            (Some(_), None) => {
                return Err(ConfigError::IncompleteSupabase {
                    set: "SUPABASE_URL",
                    missing: "SUPABASE_ANON_KEY",
                });
            }
            (None, Some(_)) => {
                return Err(ConfigError::IncompleteSupabase {
                    set: "SUPABASE_ANON_KEY",
                    missing: "SUPABASE_URL",
                });
            }
            (None, None) => None,
        };

        Ok(config)
    }
}
