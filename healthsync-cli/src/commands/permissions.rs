//! `healthsync permissions`: health store authorization.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use healthsync_core::Category;
use healthsync_sync::{AuthorizationState, ExternalHealthStore};

use super::Session;

#[derive(Subcommand, Debug)]
pub enum PermissionsCommand {
    /// Show the authorization state of every category.
    Status {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Authorize writes for the given categories (all if none given).
    Grant(CategoriesArgs),
    /// Deny writes for the given categories (all if none given).
    Deny(CategoriesArgs),
}

#[derive(Args, Debug)]
pub struct CategoriesArgs {
    pub categories: Vec<Category>,
}

impl CategoriesArgs {
    fn selected(&self) -> Vec<Category> {
        if self.categories.is_empty() {
            Category::ALL.to_vec()
        } else {
            self.categories.clone()
        }
    }
}

#[derive(Serialize)]
struct StatusJson {
    categories: Vec<CategoryStatus>,
    unauthorized: Vec<Category>,
}

#[derive(Serialize, Tabled)]
struct CategoryStatus {
    #[tabled(rename = "category")]
    category: Category,
    #[tabled(skip)]
    state: AuthorizationState,
    #[serde(skip)]
    #[tabled(rename = "state")]
    label: String,
}

pub fn run(command: PermissionsCommand) -> Result<()> {
    let session = Session::open()?;
    match command {
        PermissionsCommand::Status { json } => status(&session, json),
        PermissionsCommand::Grant(args) => set(&session, &args, AuthorizationState::Authorized),
        PermissionsCommand::Deny(args) => set(&session, &args, AuthorizationState::Denied),
    }
}

fn status(session: &Session, json: bool) -> Result<()> {
    let categories: Vec<CategoryStatus> = Category::ALL
        .into_iter()
        .map(|category| {
            let state = session.sandbox.authorization_state(category);
            CategoryStatus {
                category,
                state,
                label: state_label(state),
            }
        })
        .collect();
    let unauthorized = session.coordinator.unauthorized_categories();

    if json {
        let payload = StatusJson {
            categories,
            unauthorized,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to render permissions JSON")?
        );
        return Ok(());
    }

    println!("{}", Table::new(categories).with(Style::rounded()));
    if !unauthorized.is_empty() {
        println!(
            "{} writes are blocked for {} categor{}; run `healthsync permissions grant`",
            "note:".yellow().bold(),
            unauthorized.len(),
            if unauthorized.len() == 1 { "y" } else { "ies" }
        );
    }
    Ok(())
}

fn set(session: &Session, args: &CategoriesArgs, state: AuthorizationState) -> Result<()> {
    for category in args.selected() {
        session
            .sandbox
            .set_category_authorization(category, state)
            .with_context(|| format!("failed to update permission for {category}"))?;
        println!("{category}: {}", state_label(state));
    }
    Ok(())
}

fn state_label(state: AuthorizationState) -> String {
    match state {
        AuthorizationState::Authorized => "authorized".green().to_string(),
        AuthorizationState::Denied => "denied".red().to_string(),
        AuthorizationState::NotDetermined => "not determined".yellow().to_string(),
    }
}
