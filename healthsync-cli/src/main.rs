//! Healthsync: health measurement records mirrored into the platform
//! health store.
//!
//! # Usage
//!
//! ```text
//! healthsync import <scan.json> [--at <RFC3339>] [--json]
//! healthsync add <category> <value> [--diastolic <n>] [--at <RFC3339>] [--notes <text>]
//! healthsync list [--category <c>] [--limit <n>] [--no-verify] [--json]
//! healthsync notes <id> [<text>]
//! healthsync delete <id>
//! healthsync resync <id>
//! healthsync reconcile [--json]
//! healthsync permissions status|grant|deny [<category>...]
//! healthsync daemon start
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    add::AddArgs, daemon::DaemonCommand, delete::DeleteArgs, import::ImportArgs,
    list::ListArgs, notes::NotesArgs, permissions::PermissionsCommand,
    reconcile::ReconcileArgs, resync::ResyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "healthsync",
    version,
    about = "Keep health measurements in sync with the platform health store",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record every reading from an OCR scan result.
    Import(ImportArgs),

    /// Record a single measurement.
    Add(AddArgs),

    /// Verify sync state, then list records newest first.
    List(ListArgs),

    /// Set or clear a record's notes.
    Notes(NotesArgs),

    /// Delete a record locally and from the health store.
    Delete(DeleteArgs),

    /// Retry writing an unsynced record to the health store.
    Resync(ResyncArgs),

    /// Check synced records against the health store.
    Reconcile(ReconcileArgs),

    /// Inspect or change health store permissions.
    Permissions {
        #[command(subcommand)]
        command: PermissionsCommand,
    },

    /// Run the background sync runtime.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    if !matches!(cli.command, Commands::Daemon { .. }) {
        commands::init_tracing();
    }
    match cli.command {
        Commands::Import(args) => args.run(),
        Commands::Add(args) => args.run(),
        Commands::List(args) => args.run(),
        Commands::Notes(args) => args.run(),
        Commands::Delete(args) => args.run(),
        Commands::Resync(args) => args.run(),
        Commands::Reconcile(args) => args.run(),
        Commands::Permissions { command } => commands::permissions::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
