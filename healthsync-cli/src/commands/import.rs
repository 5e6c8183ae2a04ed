//! `healthsync import`: record the readings of an OCR scan result.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::Args;

use healthsync_core::scan::ScanResult;

use super::Session;

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Scan service response (JSON).
    pub path: PathBuf,

    /// Measurement time; defaults to the date printed on the device, then now.
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ImportArgs {
    pub fn run(self) -> Result<()> {
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let scan: ScanResult = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse scan result {}", self.path.display()))?;
        if !scan.success {
            bail!("scan was not successful; nothing to import");
        }

        let confirmed_at = self
            .at
            .or_else(|| scan.measurement_date(&Local::now()))
            .unwrap_or_else(Utc::now);
        let candidates = scan.candidates(confirmed_at);
        if candidates.is_empty() {
            bail!("scan contains no complete readings");
        }

        let session = Session::open()?;
        session.record(candidates, self.json)
    }
}
