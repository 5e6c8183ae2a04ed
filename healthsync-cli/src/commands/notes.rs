//! `healthsync notes`: local-only annotation.

use anyhow::Result;
use clap::Args;

use healthsync_core::RecordId;

use super::{sync_failure, Session};

#[derive(Args, Debug)]
pub struct NotesArgs {
    pub id: RecordId,

    /// New notes; omit to clear.
    pub text: Option<String>,
}

impl NotesArgs {
    pub fn run(self) -> Result<()> {
        let session = Session::open()?;
        let cleared = self.text.is_none();
        session
            .block_on(session.coordinator.update_notes(&self.id, self.text))
            .map_err(sync_failure)?;
        if cleared {
            println!("cleared notes on {}", self.id);
        } else {
            println!("updated notes on {}", self.id);
        }
        Ok(())
    }
}
