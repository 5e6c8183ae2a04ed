//! `healthsync delete`: local delete with best-effort health store cleanup.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use healthsync_core::RecordId;
use healthsync_sync::ExternalCleanup;

use super::{sync_failure, Session};

#[derive(Args, Debug)]
pub struct DeleteArgs {
    pub id: RecordId,
}

impl DeleteArgs {
    pub fn run(self) -> Result<()> {
        let session = Session::open()?;
        let outcome = session
            .block_on(session.coordinator.delete(&self.id))
            .map_err(sync_failure)?;
        println!("deleted {}", outcome.id);
        match outcome.external {
            ExternalCleanup::Removed => println!("removed from health store"),
            ExternalCleanup::Skipped => {}
            ExternalCleanup::Failed { reason } => println!(
                "{} health store copy not removed: {reason}",
                "warning:".yellow().bold()
            ),
        }
        Ok(())
    }
}
