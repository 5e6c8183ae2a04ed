//! Candidate records from an OCR scan result.
//!
//! The OCR service is an opaque collaborator; this module only understands
//! the shape of its response and normalizes each reading to the canonical
//! unit of its category before handing it to the sync coordinator.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Category, HealthRecord};

const CM_PER_FOOT: f64 = 30.48;
const CM_PER_INCH: f64 = 2.54;
const KG_PER_POUND: f64 = 0.453592;
const MG_DL_PER_MMOL_L: f64 = 18.0182;

/// Response body of the scan service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanResult {
    pub success: bool,
    #[serde(alias = "deviceType")]
    pub device_type: Option<String>,
    #[serde(alias = "bloodPressure")]
    pub blood_pressure: Option<BloodPressureReading>,
    #[serde(alias = "bodyMeasurement")]
    pub body_measurement: Option<BodyMeasurementReading>,
    #[serde(alias = "bloodGlucose")]
    pub blood_glucose: Option<BloodGlucoseReading>,
    /// `"2024"`; the current year when absent.
    pub year: Option<String>,
    /// `"MM-DD"`.
    pub monthday: Option<String>,
    /// `"HH:MM"`.
    pub time: Option<String>,
    #[serde(alias = "imageUrl")]
    pub image_url: Option<String>,
    #[serde(alias = "rawText")]
    pub raw_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloodPressureReading {
    pub systolic: Option<f64>,
    pub diastolic: Option<f64>,
    pub pulse: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyMeasurementReading {
    pub height: Option<f64>,
    /// `cm` (default), `ft` or `in`.
    #[serde(alias = "heightUnit")]
    pub height_unit: Option<String>,
    pub weight: Option<f64>,
    /// `kg` (default) or `lbs`.
    #[serde(alias = "weightUnit")]
    pub weight_unit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloodGlucoseReading {
    pub glucose: Option<f64>,
    /// `mg/dL` (default) or `mmol/L`.
    pub unit: Option<String>,
    #[serde(alias = "measurementType")]
    pub measurement_type: Option<String>,
}

impl ScanResult {
    /// Derive unit-normalized candidate records stamped with `confirmed_at`.
    ///
    /// Blood pressure is emitted only when both systolic and diastolic were
    /// read; a pulse reading becomes its own heart-rate record.
    pub fn candidates(&self, confirmed_at: DateTime<Utc>) -> Vec<HealthRecord> {
        let mut records = Vec::new();

        if let Some(bp) = &self.blood_pressure {
            if let (Some(systolic), Some(diastolic)) = (bp.systolic, bp.diastolic) {
                records.push(HealthRecord::blood_pressure(systolic, diastolic, confirmed_at));
            }
            if let Some(pulse) = bp.pulse {
                records.push(HealthRecord::new(Category::HeartRate, pulse, confirmed_at));
            }
        }

        if let Some(body) = &self.body_measurement {
            if let Some(height) = body.height {
                let cm = match unit_key(body.height_unit.as_deref()).as_str() {
                    "ft" => height * CM_PER_FOOT,
                    "in" => height * CM_PER_INCH,
                    _ => height,
                };
                records.push(HealthRecord::new(Category::Height, cm, confirmed_at));
            }
            if let Some(weight) = body.weight {
                let kg = match unit_key(body.weight_unit.as_deref()).as_str() {
                    "lbs" | "lb" => weight * KG_PER_POUND,
                    _ => weight,
                };
                records.push(HealthRecord::new(Category::Weight, kg, confirmed_at));
            }
        }

        if let Some(glucose) = &self.blood_glucose {
            if let Some(value) = glucose.glucose {
                let mg_dl = match unit_key(glucose.unit.as_deref()).as_str() {
                    "mmol/l" => value * MG_DL_PER_MMOL_L,
                    _ => value,
                };
                records.push(HealthRecord::new(Category::BloodGlucose, mg_dl, confirmed_at));
            }
        }

        if let Some(url) = &self.image_url {
            for record in &mut records {
                record.source_image_url = Some(url.clone());
            }
        }
        records
    }

    /// The measurement instant printed on the device, if it was read.
    ///
    /// Interpreted in `now`'s timezone; the year defaults to `now`'s year.
    pub fn measurement_date<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
        let monthday = self.monthday.as_deref()?;
        let year = match self.year.as_deref() {
            Some(year) => year.trim().parse::<i32>().ok()?,
            None => now.year(),
        };
        let date =
            NaiveDate::parse_from_str(&format!("{year}-{}", monthday.trim()), "%Y-%m-%d").ok()?;
        let time = self
            .time
            .as_deref()
            .and_then(|t| NaiveTime::parse_from_str(t.trim(), "%H:%M").ok())
            .unwrap_or(NaiveTime::MIN);
        now.timezone()
            .from_local_datetime(&date.and_time(time))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

fn unit_key(unit: Option<&str>) -> String {
    unit.unwrap_or_default().trim().to_ascii_lowercase()
}
