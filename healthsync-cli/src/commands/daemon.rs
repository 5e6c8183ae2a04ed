//! `healthsync daemon`: background runtime.

use anyhow::{Context, Result};
use clap::Subcommand;

use healthsync_daemon::start_blocking;

use super::home;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run in the foreground: periodic reconciliation until ctrl-c.
    Start,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home()?;
    match command {
        DaemonCommand::Start => start_blocking(&home).context("daemon exited with error"),
    }
}
