use std::{sync::Arc, time::Duration};

use cairn::{Collection, MemoryBackup, MemoryStore, Snapshot, StoreConfig};
use chrono::{NaiveDate, Utc};
use race_planner::{AppSession, Distance, Planner, PlannerConfig, Race, RacePatch, StoreError};

fn on_disk(dir: &std::path::Path) -> PlannerConfig {
    PlannerConfig {
        data_dir: Some(dir.to_path_buf()),
        store: StoreConfig {
            load_delay_ms: 0,
            persist_delay_ms: 10,
            backup_delay_ms: 20,
            ..PlannerConfig::default().store
        },
        supabase: None,
    }
}

fn in_memory(backup: Arc<MemoryBackup<Race>>) -> Planner {
    Planner::with_backends(
        PlannerConfig::default().store,
        Arc::new(MemoryStore::new()),
        backup,
        Arc::new(AppSession::default()),
    )
}

fn stored_file(dir: &std::path::Path) -> Vec<u8> {
    std::fs::read(dir.join("races.json")).unwrap()
}

#[tokio::test]
async fn races_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let race = Race::new("r1", "Lavaredo Ultra Trail")
        .on(NaiveDate::from_ymd_opt(2026, 6, 25).unwrap())
        .with_distance(Distance::km(120.0));

    let planner = Planner::open(on_disk(dir.path()));
    planner.ready().await;
    planner.add_race(race.clone());
    planner.update_notes("r1", "poles allowed").await.unwrap();
    planner.shutdown().await;

    let planner = Planner::open(on_disk(dir.path()));
    planner.ready().await;

    let reloaded = planner.race("r1").unwrap();
    assert_eq!(reloaded.name, race.name);
    assert_eq!(reloaded.date, race.date);
    assert_eq!(reloaded.distance, race.distance);
    assert_eq!(reloaded.notes, "poles allowed");
}

#[tokio::test]
async fn deleted_race_stays_deleted_after_a_restart() {
    let dir = tempfile::tempdir().unwrap();

    let planner = Planner::open(on_disk(dir.path()));
    planner.ready().await;
    planner.add_race(Race::new("r1", "Trail 50K"));
    assert_eq!(planner.races().len(), 1);
    planner.update_race("r1", RacePatch::new().name("Trail 50K Revised"));
    assert_eq!(planner.race("r1").unwrap().name, "Trail 50K Revised");
    planner.delete_race("r1").saved().await.unwrap();
    assert!(planner.races().is_empty());
    planner.shutdown().await;

    let planner = Planner::open(on_disk(dir.path()));
    planner.ready().await;

    assert!(planner.races().is_empty());
    assert_eq!(stored_file(dir.path()), b"{}");
}

#[tokio::test]
async fn corrupt_race_file_is_reset() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("races.json"), "[not, a race collection").unwrap();

    let planner = Planner::open(on_disk(dir.path()));
    planner.ready().await;

    assert!(planner.races().is_empty());
    assert_eq!(stored_file(dir.path()), b"{}");
    planner.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn premium_sign_in_restores_a_newer_backup() {
    let backup = Arc::new(MemoryBackup::new());
    backup.seed(
        "runner-1",
        Snapshot::new(
            [Race::new("r9", "Hardrock 100")].into_iter().collect::<Collection<_>>(),
            Some(Utc::now()),
        ),
    );
    let planner = in_memory(backup.clone());
    planner.ready().await;

    planner.sign_in("runner-1", "token");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(backup.pull_count(), 0);

    planner.set_premium(true);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(backup.pull_count(), 1);
    assert_eq!(planner.race("r9").map(|race| race.name), Some("Hardrock 100".to_string()));
}

#[tokio::test(start_paused = true)]
async fn premium_changes_are_backed_up() {
    let backup = Arc::new(MemoryBackup::new());
    let planner = in_memory(backup.clone());
    planner.ready().await;
    planner.sign_in("runner-1", "token");
    planner.set_premium(true);

    planner.add_race(Race::new("r1", "Trail 50K"));
    planner.update_notes("r1", "salt tabs hourly").await.unwrap();

    let backed_up = backup.stored("runner-1").unwrap();
    assert_eq!(
        backed_up.entities.get("r1").map(|race| race.notes.as_str()),
        Some("salt tabs hourly")
    );
}

#[tokio::test(start_paused = true)]
async fn signing_out_stops_backups() {
    let backup = Arc::new(MemoryBackup::new());
    let planner = in_memory(backup.clone());
    planner.ready().await;
    planner.sign_in("runner-1", "token");
    planner.set_premium(true);
    planner.sign_out();

    let pending = planner.add_race(Race::new("r1", "Trail 50K"));

    assert!(!pending.backup_scheduled());
    pending.finished().await.unwrap();
    assert_eq!(planner.request_backup().await, Err(StoreError::NotEntitled));
    assert_eq!(backup.push_count(), 0);
}

#[tokio::test]
async fn one_malformed_race_does_not_cost_the_others() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("races.json"),
        r#"{
            "r1": { "id": "r1", "name": "Trail 50K", "notes": "keep me" },
            "r2": { "id": "r2", "name": "Road Marathon", "distance": "50", "date": "2026-10-04T07:00:00.000Z" }
        }"#,
    )
    .unwrap();

    let planner = Planner::open(on_disk(dir.path()));
    planner.ready().await;

    assert_eq!(planner.race("r1").map(|race| race.notes), Some("keep me".to_string()));
    assert_eq!(planner.race("r2"), None);

    planner.add_race(Race::new("r3", "Hill Climb")).saved().await.unwrap();
    planner.shutdown().await;

    let stored: serde_json::Value = serde_json::from_slice(&stored_file(dir.path())).unwrap();
    assert_eq!(stored["r2"]["distance"], "50");
    assert_eq!(stored["r1"]["notes"], "keep me");
    assert_eq!(stored["r3"]["name"], "Hill Climb");
}
