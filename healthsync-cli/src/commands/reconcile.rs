//! `healthsync reconcile`: one reconciliation sweep.

use anyhow::{Context, Result};
use clap::Args;

use healthsync_sync::SweepReport;

use super::Session;

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ReconcileArgs {
    pub fn run(self) -> Result<()> {
        let session = Session::open()?;
        let report = session.block_on(session.coordinator.reconcile());
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render sweep JSON")?
            );
            return Ok(());
        }
        match report {
            SweepReport::Completed(summary) => {
                println!(
                    "checked {}, excluded {}, demoted {}, errors {}",
                    summary.checked,
                    summary.excluded,
                    summary.demoted.len(),
                    summary.errors
                );
                for id in summary.demoted {
                    println!("  {id} is no longer in the health store");
                }
            }
            SweepReport::Skipped => println!("a sweep is already running"),
            SweepReport::Unavailable => println!("health store unavailable"),
        }
        Ok(())
    }
}
