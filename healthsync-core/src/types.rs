//! Domain types for health records.
//!
//! Every magnitude is held in its category's canonical unit (see
//! [`Category::unit`]). Timestamps are the user-confirmed measurement instant
//! and double as the correlation key against the external health store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{UnknownCategory, ValidationError};

/// Symmetric tolerance, in seconds, applied around a record's timestamp when
/// looking it up in the external store.
pub const DEFAULT_WINDOW_TOLERANCE_SECS: i64 = 2;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Local identity of a record. Never passed to the external store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for RecordId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The closed set of measurement categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Weight,
    Height,
    BloodPressure,
    HeartRate,
    BloodGlucose,
    BodyTemperature,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Weight,
        Category::Height,
        Category::BloodPressure,
        Category::HeartRate,
        Category::BloodGlucose,
        Category::BodyTemperature,
    ];

    /// Canonical unit of `primary_value` for this category.
    pub fn unit(self) -> &'static str {
        match self {
            Category::Weight => "kg",
            Category::Height => "cm",
            Category::BloodPressure => "mmHg",
            Category::HeartRate => "bpm",
            Category::BloodGlucose => "mg/dL",
            Category::BodyTemperature => "°C",
        }
    }

    pub fn is_blood_pressure(self) -> bool {
        matches!(self, Category::BloodPressure)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Weight => write!(f, "weight"),
            Category::Height => write!(f, "height"),
            Category::BloodPressure => write!(f, "blood-pressure"),
            Category::HeartRate => write!(f, "heart-rate"),
            Category::BloodGlucose => write!(f, "blood-glucose"),
            Category::BodyTemperature => write!(f, "body-temperature"),
        }
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "weight" => Ok(Category::Weight),
            "height" => Ok(Category::Height),
            "blood-pressure" => Ok(Category::BloodPressure),
            "heart-rate" => Ok(Category::HeartRate),
            "blood-glucose" => Ok(Category::BloodGlucose),
            "body-temperature" => Ok(Category::BodyTemperature),
            _ => Err(UnknownCategory(s.to_owned())),
        }
    }
}

/// This app's claim about whether a record has a live external counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    NotSynced,
    Synced,
}

/// Inputs to the sync-state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// The external store confirmed a successful write.
    ExternalWriteConfirmed,
    /// Reconciliation found no external counterpart.
    ExternalCopyMissing,
}

impl SyncState {
    /// `notSynced → synced` on a confirmed write, `synced → notSynced` when
    /// the external copy is missing. Anything else keeps the current state.
    pub fn apply(self, event: SyncEvent) -> SyncState {
        match (self, event) {
            (SyncState::NotSynced, SyncEvent::ExternalWriteConfirmed) => SyncState::Synced,
            (SyncState::Synced, SyncEvent::ExternalCopyMissing) => SyncState::NotSynced,
            (state, _) => state,
        }
    }

    pub fn is_synced(self) -> bool {
        matches!(self, SyncState::Synced)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::NotSynced => write!(f, "not synced"),
            SyncState::Synced => write!(f, "synced"),
        }
    }
}

// ---------------------------------------------------------------------------
// Correlation window
// ---------------------------------------------------------------------------

/// Closed time interval used to find a record's counterpart in the external
/// store. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn around(at: DateTime<Utc>, tolerance: Duration) -> Self {
        Self {
            start: at - tolerance,
            end: at + tolerance,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

// ---------------------------------------------------------------------------
// HealthRecord
// ---------------------------------------------------------------------------

/// One measurement instance.
///
/// For blood pressure, `primary_value` holds the systolic reading and
/// `systolic`/`diastolic` are both set; for every other category both are
/// `None`. [`HealthRecord::validate`] checks this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub id: RecordId,
    pub category: Category,
    pub primary_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub systolic: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diastolic: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub sync_state: SyncState,
}

impl HealthRecord {
    /// A single-valued measurement. Use [`HealthRecord::blood_pressure`] for
    /// blood pressure.
    pub fn new(category: Category, primary_value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: RecordId::new(),
            category,
            primary_value,
            systolic: None,
            diastolic: None,
            timestamp,
            source_image_url: None,
            notes: None,
            sync_state: SyncState::NotSynced,
        }
    }

    pub fn blood_pressure(systolic: f64, diastolic: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            systolic: Some(systolic),
            diastolic: Some(diastolic),
            ..Self::new(Category::BloodPressure, systolic, timestamp)
        }
    }

    pub fn with_source_image(mut self, url: impl Into<String>) -> Self {
        self.source_image_url = Some(url.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Check the entity invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_magnitude(self.id, "primary value", self.primary_value)?;

        if self.category.is_blood_pressure() {
            let (Some(systolic), Some(diastolic)) = (self.systolic, self.diastolic) else {
                return Err(ValidationError::IncompletePressure { id: self.id });
            };
            check_magnitude(self.id, "systolic", systolic)?;
            check_magnitude(self.id, "diastolic", diastolic)?;
            if self.primary_value != systolic {
                return Err(ValidationError::PrimaryMismatch {
                    id: self.id,
                    primary: self.primary_value,
                    systolic,
                });
            }
        } else if self.systolic.is_some() || self.diastolic.is_some() {
            return Err(ValidationError::UnexpectedPressure {
                id: self.id,
                category: self.category,
            });
        }
        Ok(())
    }

    /// The `(category, window)` correlation key used against the external store.
    pub fn correlation_window(&self, tolerance: Duration) -> TimeWindow {
        TimeWindow::around(self.timestamp, tolerance)
    }

    /// Human-readable magnitude with unit, e.g. `120/80 mmHg` or `72.5 kg`.
    pub fn formatted_value(&self) -> String {
        let unit = self.category.unit();
        if self.category.is_blood_pressure() {
            return match (self.systolic, self.diastolic) {
                (Some(sys), Some(dia)) => format!("{}/{} {unit}", sys as i64, dia as i64),
                _ => "N/A".to_string(),
            };
        }
        format!("{:.1} {unit}", self.primary_value)
    }
}

fn check_magnitude(id: RecordId, field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidValue { id, field, value })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 16, 9, 30, 0).unwrap()
    }

    #[test]
    fn blood_pressure_primary_is_systolic() {
        let record = HealthRecord::blood_pressure(120.0, 80.0, ts());
        assert_eq!(record.primary_value, 120.0);
        assert_eq!(record.sync_state, SyncState::NotSynced);
        record.validate().expect("valid");
    }

    #[test]
    fn blood_pressure_with_one_component_is_rejected() {
        let mut record = HealthRecord::blood_pressure(120.0, 80.0, ts());
        record.diastolic = None;
        assert!(matches!(
            record.validate(),
            Err(ValidationError::IncompletePressure { .. })
        ));

        let mut record = HealthRecord::blood_pressure(120.0, 80.0, ts());
        record.systolic = None;
        assert!(matches!(
            record.validate(),
            Err(ValidationError::IncompletePressure { .. })
        ));
    }

    #[test]
    fn non_pressure_record_must_not_carry_pair() {
        let mut record = HealthRecord::new(Category::Weight, 70.0, ts());
        record.diastolic = Some(80.0);
        assert!(matches!(
            record.validate(),
            Err(ValidationError::UnexpectedPressure { .. })
        ));
    }

    #[test]
    fn primary_must_match_systolic() {
        let mut record = HealthRecord::blood_pressure(120.0, 80.0, ts());
        record.primary_value = 80.0;
        assert!(matches!(
            record.validate(),
            Err(ValidationError::PrimaryMismatch { .. })
        ));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let record = HealthRecord::new(Category::HeartRate, f64::NAN, ts());
        assert!(matches!(
            record.validate(),
            Err(ValidationError::InvalidValue { field: "primary value", .. })
        ));
    }

    #[test]
    fn sync_state_transitions() {
        use SyncEvent::*;
        assert_eq!(SyncState::NotSynced.apply(ExternalWriteConfirmed), SyncState::Synced);
        assert_eq!(SyncState::Synced.apply(ExternalCopyMissing), SyncState::NotSynced);
        assert_eq!(SyncState::Synced.apply(ExternalWriteConfirmed), SyncState::Synced);
        assert_eq!(SyncState::NotSynced.apply(ExternalCopyMissing), SyncState::NotSynced);
    }

    #[test]
    fn window_tolerance_is_two_seconds_inclusive() {
        let window = TimeWindow::around(ts(), Duration::seconds(DEFAULT_WINDOW_TOLERANCE_SECS));
        assert!(window.contains(ts()));
        assert!(window.contains(ts() + Duration::seconds(2)));
        assert!(window.contains(ts() - Duration::seconds(2)));
        assert!(!window.contains(ts() + Duration::seconds(3)));
        assert!(!window.contains(ts() - Duration::seconds(3)));
    }

    #[test]
    fn category_parse_and_display() {
        for category in Category::ALL {
            assert_eq!(category.to_string().parse::<Category>(), Ok(category));
        }
        assert_eq!("blood_pressure".parse::<Category>(), Ok(Category::BloodPressure));
        assert!("steps".parse::<Category>().is_err());
    }

    #[test]
    fn formatted_values() {
        assert_eq!(
            HealthRecord::blood_pressure(120.0, 80.0, ts()).formatted_value(),
            "120/80 mmHg"
        );
        assert_eq!(
            HealthRecord::new(Category::Weight, 72.46, ts()).formatted_value(),
            "72.5 kg"
        );
    }

    #[test]
    fn record_serde_omits_absent_pair() {
        let record = HealthRecord::new(Category::Height, 175.0, ts());
        let json = serde_json::to_value(&record).expect("serialize");
        assert!(json.get("systolic").is_none());
        assert_eq!(json["category"], "height");
        assert_eq!(json["sync_state"], "not_synced");
        let back: HealthRecord = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, record);
    }
}
