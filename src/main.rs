//! Fabric CLI - Lightweight Microsoft Fabric client
//!
//! Signs in with OAuth2 + PKCE in the system browser and manages
//! workspaces, items, jobs and role assignments from the terminal.

mod api;
mod auth;
mod commands;
mod config;
mod controller;
mod error;
mod models;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::App;

#[derive(Parser)]
#[command(name = "fabric-cli")]
#[command(about = "Lightweight CLI client for Microsoft Fabric", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in through the system browser
    Login {
        /// Sign in interactively even if a usable credential exists
        #[arg(short, long)]
        force: bool,
    },

    /// Sign out and remove the stored credential
    Logout,

    /// Show configuration and credential status
    Status,

    /// Show the signed-in account (from the access token)
    Whoami,

    /// Print the effective settings
    Settings {
        /// Write them to the settings file
        #[arg(long)]
        write: bool,
    },

    /// List workspaces with your role in each
    Workspaces,

    /// Create a workspace
    CreateWorkspace {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
        /// Capacity ID to assign it to
        #[arg(short, long)]
        capacity: Option<String>,
    },

    /// Rename a workspace or change its description
    UpdateWorkspace {
        /// Workspace ID or name
        workspace: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Delete a workspace
    DeleteWorkspace {
        /// Workspace ID or name
        workspace: String,
    },

    /// List capacities
    Capacities,

    /// Assign a workspace to a capacity
    AssignCapacity {
        /// Workspace ID or name
        workspace: String,
        /// Capacity ID
        capacity: String,
    },

    /// Remove a workspace from its capacity
    UnassignCapacity {
        /// Workspace ID or name
        workspace: String,
    },

    /// List items in a workspace (* marks runnable items)
    Items {
        /// Workspace ID or name
        workspace: String,
    },

    /// Create an item
    CreateItem {
        /// Workspace ID or name
        workspace: String,
        name: String,
        /// Item type, e.g. Lakehouse, Notebook, Warehouse
        #[arg(short = 't', long = "type")]
        kind: String,
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Rename an item or change its description
    UpdateItem {
        /// Workspace ID or name
        workspace: String,
        /// Item ID or name
        item: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Delete an item
    DeleteItem {
        /// Workspace ID or name
        workspace: String,
        /// Item ID or name
        item: String,
    },

    /// Apply a sensitivity label to items
    Label {
        /// Workspace ID or name
        workspace: String,
        /// Sensitivity label ID
        #[arg(short, long)]
        label: String,
        /// Item IDs or names
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Upload a local file into a lakehouse's Files folder
    Upload {
        /// Workspace ID or name
        workspace: String,
        /// Lakehouse ID or name
        lakehouse: String,
        /// Local file
        file: PathBuf,
        /// Destination path under Files/ (defaults to the file name)
        #[arg(long)]
        dest: Option<String>,
    },

    /// List recent job runs
    Jobs {
        /// Workspace ID or name
        workspace: String,
        /// Only this item (ID or name)
        #[arg(short, long)]
        item: Option<String>,
    },

    /// Run an item's on-demand job
    Run {
        /// Workspace ID or name
        workspace: String,
        /// Item ID or name
        item: String,
    },

    /// Cancel a running job
    CancelJob {
        /// Workspace ID or name
        workspace: String,
        /// Item ID or name
        item: String,
        /// Job instance ID
        job: String,
    },

    /// Follow job status of a workspace until Ctrl+C
    Watch {
        /// Workspace ID or name
        workspace: String,
    },

    /// List role assignments of a workspace
    Roles {
        /// Workspace ID or name
        workspace: String,
    },

    /// Grant a role on a workspace
    AddRole {
        /// Workspace ID or name
        workspace: String,
        /// Principal object ID
        principal: String,
        /// admin, member, contributor or viewer
        #[arg(short, long)]
        role: String,
        /// user, group or serviceprincipal
        #[arg(short = 't', long = "type", default_value = "user")]
        principal_type: String,
    },

    /// Change the role of an assignment
    UpdateRole {
        /// Workspace ID or name
        workspace: String,
        /// Role assignment ID
        assignment: String,
        #[arg(short, long)]
        role: String,
    },

    /// Remove a role assignment
    RemoveRole {
        /// Workspace ID or name
        workspace: String,
        /// Role assignment ID
        assignment: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let app = App::new()?;

    match cli.command {
        Commands::Login { force } => commands::login(&app, force).await?,
        Commands::Logout => {
            tracing::info!("Logging out...");
            commands::logout(&app).await?;
        }
        Commands::Status => commands::status(&app).await?,
        Commands::Whoami => commands::whoami(&app).await?,
        Commands::Settings { write } => commands::settings(&app, write)?,
        Commands::Workspaces => commands::list_workspaces(&app).await?,
        Commands::CreateWorkspace {
            name,
            description,
            capacity,
        } => commands::create_workspace(&app, name, description, capacity).await?,
        Commands::UpdateWorkspace {
            workspace,
            name,
            description,
        } => commands::update_workspace(&app, &workspace, name, description).await?,
        Commands::DeleteWorkspace { workspace } => {
            commands::delete_workspace(&app, &workspace).await?
        }
        Commands::Capacities => commands::list_capacities(&app).await?,
        Commands::AssignCapacity {
            workspace,
            capacity,
        } => commands::assign_capacity(&app, &workspace, &capacity).await?,
        Commands::UnassignCapacity { workspace } => {
            commands::unassign_capacity(&app, &workspace).await?
        }
        Commands::Items { workspace } => commands::list_items(&app, &workspace).await?,
        Commands::CreateItem {
            workspace,
            name,
            kind,
            description,
        } => commands::create_item(&app, &workspace, &name, &kind, description).await?,
        Commands::UpdateItem {
            workspace,
            item,
            name,
            description,
        } => commands::update_item(&app, &workspace, &item, name, description).await?,
        Commands::DeleteItem { workspace, item } => {
            commands::delete_item(&app, &workspace, &item).await?
        }
        Commands::Label {
            workspace,
            label,
            items,
        } => commands::label(&app, &workspace, &items, &label).await?,
        Commands::Upload {
            workspace,
            lakehouse,
            file,
            dest,
        } => commands::upload(&app, &workspace, &lakehouse, &file, dest).await?,
        Commands::Jobs { workspace, item } => {
            commands::list_jobs(&app, &workspace, item.as_deref()).await?
        }
        Commands::Run { workspace, item } => commands::run(&app, &workspace, &item).await?,
        Commands::CancelJob {
            workspace,
            item,
            job,
        } => commands::cancel_job(&app, &workspace, &item, &job).await?,
        Commands::Watch { workspace } => commands::watch(&app, &workspace).await?,
        Commands::Roles { workspace } => commands::list_roles(&app, &workspace).await?,
        Commands::AddRole {
            workspace,
            principal,
            role,
            principal_type,
        } => commands::add_role(&app, &workspace, &principal, &principal_type, &role).await?,
        Commands::UpdateRole {
            workspace,
            assignment,
            role,
        } => commands::update_role(&app, &workspace, &assignment, &role).await?,
        Commands::RemoveRole {
            workspace,
            assignment,
        } => commands::remove_role(&app, &workspace, &assignment).await?,
    }

    Ok(())
}
