//! The race planner's data layer. Screens talk to a [`Planner`]; it keeps the user's races on the device and, for
//! premium users, backed up to Supabase.
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use race_planner::{Planner, PlannerConfig, Race, RacePatch};
//!
//! let planner = Planner::open(PlannerConfig::from_env()?);
//! planner.ready().await;
//!
//! let race = Race::draft("Western States");
//! let id = race.id.clone();
//! planner.add_race(race);
//! planner.update_race(&id, RacePatch::new().notes("heat training in May"));
//! planner.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::LazyLock;

pub mod config;
pub mod planner;
pub mod race;
pub mod session;

pub use cairn::{Pending, Phase, Session, StoreError};
pub use config::{ConfigError, PlannerConfig};
pub use planner::Planner;
pub use race::{
    AidStation, CrewMember, Distance, DistanceUnit, Elevation, ElevationUnit, Race, RacePatch,
    new_race_id,
};
pub use session::AppSession;

// putting this inside LOGGER prevents us from accidentally initializing the logger more than once
static LOGGER: LazyLock<()> = LazyLock::new(|| {
    // fails if the host already installed a logger, which is fine
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
    log::info!("Logging initialized");
});

/// Called by [`Planner::open`]; hosts that want logs before that can call it themselves.
pub fn init_logging() {
    LazyLock::force(&LOGGER);
}
