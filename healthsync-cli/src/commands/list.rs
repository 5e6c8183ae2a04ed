//! `healthsync list`: the record list, verified against the health store.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use healthsync_core::{Category, HealthRecord, SyncState};
use healthsync_sync::SweepReport;

use super::Session;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only show one category.
    #[arg(long)]
    pub category: Option<Category>,

    /// Show at most this many records.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Skip the reconciliation sweep.
    #[arg(long)]
    pub no_verify: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "category")]
    category: String,
    #[tabled(rename = "value")]
    value: String,
    #[tabled(rename = "measured")]
    measured: String,
    #[tabled(rename = "sync")]
    sync: String,
    #[tabled(rename = "notes")]
    notes: String,
}

impl ListArgs {
    pub fn run(self) -> Result<()> {
        let session = Session::open()?;
        if !self.no_verify {
            if let SweepReport::Completed(summary) = session.block_on(session.coordinator.reconcile())
            {
                if !summary.demoted.is_empty() && !self.json {
                    println!(
                        "{} {} record(s) no longer in the health store",
                        "note:".yellow().bold(),
                        summary.demoted.len()
                    );
                }
            }
        }

        let records = self.select(session.block_on(session.coordinator.records()));
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&records).context("failed to render records JSON")?
            );
            return Ok(());
        }
        if records.is_empty() {
            println!("no records");
            return Ok(());
        }
        print_table(&records);
        Ok(())
    }

    fn select(&self, records: Vec<HealthRecord>) -> Vec<HealthRecord> {
        records
            .into_iter()
            .filter(|r| self.category.map_or(true, |c| r.category == c))
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

fn print_table(records: &[HealthRecord]) {
    let rows = records.iter().map(|record| RecordRow {
        id: record.id.to_string(),
        category: record.category.to_string(),
        value: record.formatted_value(),
        measured: record
            .timestamp
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M")
            .to_string(),
        sync: match record.sync_state {
            SyncState::Synced => record.sync_state.to_string().green().to_string(),
            SyncState::NotSynced => record.sync_state.to_string().yellow().to_string(),
        },
        notes: record.notes.clone().unwrap_or_default(),
    });
    println!("{}", Table::new(rows).with(Style::rounded()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn select_filters_then_limits() {
        let at = |hour| Utc.with_ymd_and_hms(2025, 10, 16, hour, 0, 0).unwrap();
        let records = vec![
            HealthRecord::new(Category::Weight, 70.0, at(9)),
            HealthRecord::new(Category::HeartRate, 60.0, at(8)),
            HealthRecord::new(Category::Weight, 71.0, at(7)),
        ];
        let args = ListArgs {
            category: Some(Category::Weight),
            limit: Some(1),
            no_verify: true,
            json: false,
        };
        let selected = args.select(records);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].timestamp, at(9));
    }
}
