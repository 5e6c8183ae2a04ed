//! `healthsync add`: record one measurement by hand.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use clap::Args;

use healthsync_core::{Category, HealthRecord};

use super::Session;

#[derive(Args, Debug)]
pub struct AddArgs {
    /// weight, height, blood-pressure, heart-rate, blood-glucose or body-temperature.
    pub category: Category,

    /// Value in the category's unit; the systolic reading for blood pressure.
    pub value: f64,

    /// Diastolic reading (blood pressure only).
    #[arg(long)]
    pub diastolic: Option<f64>,

    /// Measurement time (RFC 3339); defaults to now.
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,

    #[arg(long)]
    pub notes: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl AddArgs {
    pub fn run(self) -> Result<()> {
        let record = self.build()?;
        let session = Session::open()?;
        session.record(vec![record], self.json)
    }

    fn build(&self) -> Result<HealthRecord> {
        let at = self.at.unwrap_or_else(Utc::now);
        let record = match (self.category, self.diastolic) {
            (Category::BloodPressure, Some(diastolic)) => {
                HealthRecord::blood_pressure(self.value, diastolic, at)
            }
            (Category::BloodPressure, None) => {
                bail!("blood pressure needs --diastolic")
            }
            (category, Some(_)) => bail!("--diastolic only applies to blood-pressure, not {category}"),
            (category, None) => HealthRecord::new(category, self.value, at),
        };
        Ok(match &self.notes {
            Some(notes) => record.with_notes(notes.clone()),
            None => record,
        })
    }
}
