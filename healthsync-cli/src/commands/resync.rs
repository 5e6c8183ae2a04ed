//! `healthsync resync`: explicit retry for an unsynced record.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use healthsync_core::RecordId;
use healthsync_sync::ResyncOutcome;

use super::{sync_failure, Session};

#[derive(Args, Debug)]
pub struct ResyncArgs {
    pub id: RecordId,
}

impl ResyncArgs {
    pub fn run(self) -> Result<()> {
        let session = Session::open()?;
        let outcome = session
            .block_on(session.coordinator.resync(&self.id))
            .map_err(sync_failure)?;
        match outcome {
            ResyncOutcome::Synced => println!("{} {} synced", "✓".green(), self.id),
            ResyncOutcome::AlreadySynced => println!("{} is already synced", self.id),
            ResyncOutcome::InProgress => println!("{} is already being synced", self.id),
        }
        Ok(())
    }
}
