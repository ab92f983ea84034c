use cairn::Entity;
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

const KM_PER_MILE: f64 = 1.609_344;
const METERS_PER_FOOT: f64 = 0.3048;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    #[default]
    Km,
    Mi,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Distance {
    pub value: f64,
    pub unit: DistanceUnit,
}

impl Distance {
    pub fn km(value: f64) -> Self {
        Self {
            value,
            unit: DistanceUnit::Km,
        }
    }

    pub fn miles(value: f64) -> Self {
        Self {
            value,
            unit: DistanceUnit::Mi,
        }
    }

    pub fn in_km(&self) -> f64 {
        match self.unit {
            DistanceUnit::Km => self.value,
            DistanceUnit::Mi => self.value * KM_PER_MILE,
        }
    }

    pub fn in_miles(&self) -> f64 {
        match self.unit {
            DistanceUnit::Km => self.value / KM_PER_MILE,
            DistanceUnit::Mi => self.value,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElevationUnit {
    #[default]
    M,
    Ft,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Elevation {
    pub value: f64,
    pub unit: ElevationUnit,
}

impl Elevation {
    pub fn meters(value: f64) -> Self {
        Self {
            value,
            unit: ElevationUnit::M,
        }
    }

    pub fn feet(value: f64) -> Self {
        Self {
            value,
            unit: ElevationUnit::Ft,
        }
    }

    pub fn in_meters(&self) -> f64 {
        match self.unit {
            ElevationUnit::M => self.value,
            ElevationUnit::Ft => self.value * METERS_PER_FOOT,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AidStation {
    pub name: String,
    /// Distance from the start, in the race's distance unit.
    pub distance: Option<f64>,
    pub notes: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrewMember {
    pub name: String,
    pub role: String,
    pub phone: Option<String>,
}

/// A race the user is planning for. Everything but the id is optional; fields we don't know about are dropped on
/// load.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Race {
    pub id: String,
    pub name: String,
    pub date: Option<NaiveDate>,
    pub distance: Option<Distance>,
    pub elevation: Option<Elevation>,
    pub start_time: Option<NaiveTime>,
    pub aid_stations: Vec<AidStation>,
    pub crew: Vec<CrewMember>,
    pub notes: String,
    pub mandatory_equipment: Vec<String>,
}

impl Race {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// A new race with a freshly generated id.
    pub fn draft(name: impl Into<String>) -> Self {
        Self::new(new_race_id(), name)
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn starting_at(mut self, start_time: NaiveTime) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_distance(mut self, distance: Distance) -> Self {
        self.distance = Some(distance);
        self
    }

    pub fn with_elevation(mut self, elevation: Elevation) -> Self {
        self.elevation = Some(elevation);
        self
    }
}

/// Ids are the creation time in milliseconds, which sorts races by when they were added.
pub fn new_race_id() -> String {
    Utc::now().timestamp_millis().to_string()
}

/// Fields left as `None` are not touched. Lists are replaced whole.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RacePatch {
    pub name: Option<String>,
    pub date: Option<Option<NaiveDate>>,
    pub distance: Option<Option<Distance>>,
    pub elevation: Option<Option<Elevation>>,
    pub start_time: Option<Option<NaiveTime>>,
    pub aid_stations: Option<Vec<AidStation>>,
    pub crew: Option<Vec<CrewMember>>,
    pub notes: Option<String>,
    pub mandatory_equipment: Option<Vec<String>>,
}

impl RacePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Pass `None` to clear the date.
    pub fn date(mut self, date: impl Into<Option<NaiveDate>>) -> Self {
        self.date = Some(date.into());
        self
    }

    pub fn distance(mut self, distance: impl Into<Option<Distance>>) -> Self {
        self.distance = Some(distance.into());
        self
    }

    pub fn elevation(mut self, elevation: impl Into<Option<Elevation>>) -> Self {
        self.elevation = Some(elevation.into());
        self
    }

    pub fn start_time(mut self, start_time: impl Into<Option<NaiveTime>>) -> Self {
        self.start_time = Some(start_time.into());
        self
    }

    pub fn aid_stations(mut self, aid_stations: Vec<AidStation>) -> Self {
        self.aid_stations = Some(aid_stations);
        self
    }

    pub fn crew(mut self, crew: Vec<CrewMember>) -> Self {
        self.crew = Some(crew);
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn mandatory_equipment(mut self, equipment: Vec<String>) -> Self {
        self.mandatory_equipment = Some(equipment);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(self, race: &mut Race) {
        let Self {
            name,
            date,
            distance,
            elevation,
            start_time,
            aid_stations,
            crew,
            notes,
            mandatory_equipment,
        } = self;

        if let Some(name) = name {
            race.name = name;
        }
        if let Some(date) = date {
            race.date = date;
        }
        if let Some(distance) = distance {
            race.distance = distance;
        }
        if let Some(elevation) = elevation {
            race.elevation = elevation;
        }
        if let Some(start_time) = start_time {
            race.start_time = start_time;
        }
        if let Some(aid_stations) = aid_stations {
            race.aid_stations = aid_stations;
        }
        if let Some(crew) = crew {
            race.crew = crew;
        }
        if let Some(notes) = notes {
            race.notes = notes;
        }
        if let Some(mandatory_equipment) = mandatory_equipment {
            race.mandatory_equipment = mandatory_equipment;
        }
    }
}

impl Entity for Race {
    type Patch = RacePatch;

    fn id(&self) -> &str {
        &self.id
    }

    // the patch has no id field, so an existing race keeps its id and a new one takes the key it was stored under
    fn merge(existing: Option<&Self>, id: &str, patch: RacePatch) -> Self {
        let mut race = existing.cloned().unwrap_or_else(|| Race {
            id: id.to_string(),
            ..Race::default()
        });
        patch.apply_to(&mut race);
        race
    }

    fn notes_patch(notes: String) -> RacePatch {
        RacePatch::new().notes(notes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn loads_the_stored_shape() {
        let json = r#"{
            "id": "1718000000000",
            "name": "Western States",
            "date": "2026-06-27",
            "startTime": "05:00:00",
            "distance": { "value": 100.2, "unit": "mi" },
            "elevation": { "value": 18090, "unit": "ft" },
            "aidStations": [{ "name": "Robinson Flat", "distance": 30.3 }],
            "crew": [{ "name": "Sam", "role": "pacer" }],
            "mandatoryEquipment": ["headlamp"],
            "pacerNotes": "not a field we know"
        }"#;

        let race: Race = serde_json::from_str(json).unwrap();

        assert_eq!(race.name, "Western States");
        assert_eq!(race.date, Some(date(2026, 6, 27)));
        assert_eq!(race.start_time, NaiveTime::from_hms_opt(5, 0, 0));
        assert_eq!(race.distance, Some(Distance::miles(100.2)));
        assert_eq!(race.elevation, Some(Elevation::feet(18090.0)));
        assert_eq!(race.aid_stations[0].distance, Some(30.3));
        assert_eq!(race.aid_stations[0].notes, "");
        assert_eq!(race.crew[0].phone, None);
        assert_eq!(race.mandatory_equipment, vec!["headlamp".to_string()]);
        assert_eq!(race.notes, "");
    }

    #[test]
    fn a_bare_id_is_a_valid_race() {
        let race: Race = serde_json::from_str(r#"{ "id": "r1" }"#).unwrap();

        assert_eq!(race, Race::new("r1", ""));
    }

    #[test]
    fn serializes_in_camel_case() {
        let race = Race::new("r1", "UTMB").starting_at(NaiveTime::from_hms_opt(18, 0, 0).unwrap());
        let json = serde_json::to_value(&race).unwrap();

        assert_eq!(json["startTime"], "18:00:00");
        assert!(json.get("mandatoryEquipment").is_some());
        assert!(json.get("start_time").is_none());
    }

    #[test]
    fn patch_replaces_only_supplied_fields() {
        let race = Race::new("r1", "Trail 50K")
            .on(date(2026, 9, 1))
            .with_distance(Distance::km(50.0));

        let merged = Race::merge(Some(&race), "r1", RacePatch::new().notes("bring poles"));

        assert_eq!(merged.name, "Trail 50K");
        assert_eq!(merged.date, Some(date(2026, 9, 1)));
        assert_eq!(merged.distance, Some(Distance::km(50.0)));
        assert_eq!(merged.notes, "bring poles");
    }

    #[test]
    fn patch_can_clear_optional_fields() {
        let race = Race::new("r1", "Trail 50K").on(date(2026, 9, 1));

        let merged = Race::merge(Some(&race), "r1", RacePatch::new().date(None));

        assert_eq!(merged.date, None);
        assert_eq!(merged.name, "Trail 50K");
    }

    #[test]
    fn lists_are_replaced_not_merged() {
        let mut race = Race::new("r1", "Trail 50K");
        race.mandatory_equipment = vec!["jacket".into(), "whistle".into()];

        let merged = Race::merge(
            Some(&race),
            "r1",
            RacePatch::new().mandatory_equipment(vec!["headlamp".into()]),
        );

        assert_eq!(merged.mandatory_equipment, vec!["headlamp".to_string()]);
    }

    #[test]
    fn patch_for_unknown_id_builds_a_race_under_that_id() {
        let merged = Race::merge(None, "ghost", RacePatch::new().name("Found it"));

        assert_eq!(merged, Race::new("ghost", "Found it"));
    }

    #[test]
    fn notes_patch_touches_notes_only() {
        let patch = Race::notes_patch("gels every 40 minutes".into());

        assert_eq!(patch.notes.as_deref(), Some("gels every 40 minutes"));
        assert!(RacePatch { notes: None, ..patch }.is_empty());
    }

    #[test]
    fn unit_conversions() {
        assert!((Distance::miles(26.2).in_km() - 42.164).abs() < 0.001);
        assert!((Distance::km(42.195).in_miles() - 26.219).abs() < 0.001);
        assert!((Elevation::feet(1000.0).in_meters() - 304.8).abs() < 1e-9);
        assert_eq!(Elevation::meters(2500.0).in_meters(), 2500.0);
    }

    #[test]
    fn generated_ids_are_timestamps() {
        let id = new_race_id();

        assert!(id.parse::<i64>().unwrap() > 0);
        assert_eq!(Race::draft("New race").name, "New race");
    }
}
