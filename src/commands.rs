//! CLI command implementations
//!
//! Each command builds on one `App` (configuration, session, API client)
//! and prints to stdout. Lookups accept either an ID or a display name.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};

use crate::api::workspaces::NewWorkspace;
use crate::api::{items, jobs, onelake, roles, workspaces, FabricClient};
use crate::auth::{AuthorizationFlow, KeyringVault, SessionManager, SystemBrowserSurface};
use crate::config::{Configuration, Settings};
use crate::controller::{Scope, SessionController, SessionState};
use crate::error::Error;
use crate::models::{Item, ItemType, PrincipalType, Workspace, WorkspaceRole};

/// Everything a command needs.
pub struct App {
    pub config: Configuration,
    pub settings: Settings,
    pub session: Arc<SessionManager>,
    pub client: Arc<FabricClient>,
}

impl App {
    pub fn new() -> Result<Self> {
        let config = Configuration::from_env();
        config.ensure_complete()?;
        let settings = Settings::load()?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("fabric-cli/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let flow = AuthorizationFlow::new(http.clone(), &settings);
        let session = SessionManager::new(
            flow,
            Arc::new(KeyringVault::default()),
            Arc::new(SystemBrowserSurface),
        );
        let client = FabricClient::new(http, &settings);

        Ok(Self {
            config,
            settings,
            session: Arc::new(session),
            client: Arc::new(client),
        })
    }

    fn controller(&self) -> SessionController {
        SessionController::new(
            self.config.clone(),
            Arc::clone(&self.session),
            Arc::clone(&self.client),
            &self.settings,
        )
    }

    /// Access token for the API, refreshing silently if needed.
    async fn token(&self) -> Result<String> {
        match self.session.valid_access_token(&self.config).await? {
            Some(cred) => Ok(cred.access_token),
            None => Err(Error::NotSignedIn.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub async fn login(app: &App, force: bool) -> Result<()> {
    let mut controller = app.controller();

    if !force && controller.restore().await {
        println!("Already signed in. Use --force to sign in again.");
        return Ok(());
    }

    tracing::info!("Starting sign-in (tenant {})...", app.config.tenant_id());
    let signed_in = controller.sign_in().await;
    let view = controller.view();

    if let Some(error) = view.error {
        bail!("Sign-in failed: {}", error);
    }
    if !signed_in {
        println!("Sign-in cancelled.");
        return Ok(());
    }

    println!(
        "Signed in as {}.",
        view.account.as_deref().unwrap_or("(unknown account)")
    );
    println!("{} workspaces available.", view.workspaces.len());
    Ok(())
}

pub async fn logout(app: &App) -> Result<()> {
    app.session.sign_out().await?;
    println!("Logged out.");
    Ok(())
}

pub async fn status(app: &App) -> Result<()> {
    println!("Tenant:      {}", app.config.tenant_id());
    println!("Client:      {}", app.config.client_id());
    if let Some(path) = Settings::location() {
        println!("Settings:    {}", path.display());
    }

    match app.session.stored().await? {
        Some(cred) if !cred.matches(&app.config) => {
            println!("Credential:  issued for another tenant/client");
        }
        Some(cred) if !cred.is_expired() => {
            println!("Credential:  valid");
            println!("  expires_at: {}", cred.expires_at);
        }
        Some(_) => println!("Credential:  expired"),
        None => println!("Credential:  none"),
    }
    Ok(())
}

pub async fn whoami(app: &App) -> Result<()> {
    let cred = app
        .session
        .valid_access_token(&app.config)
        .await?
        .ok_or(Error::NotSignedIn)?;
    let claims = cred.claims().unwrap_or_default();

    println!();
    println!("Name:      {}", claims.name.as_deref().unwrap_or("(none)"));
    println!("Account:   {}", claims.account().unwrap_or("(none)"));
    println!("Object ID: {}", claims.oid.as_deref().unwrap_or("(none)"));
    println!("Tenant:    {}", claims.tid.as_deref().unwrap_or(&cred.tenant_id));
    println!("Expires:   {}", cred.expires_at);
    Ok(())
}

pub fn settings(app: &App, write: bool) -> Result<()> {
    if write {
        app.settings.save()?;
        if let Some(path) = Settings::location() {
            println!("Wrote {}", path.display());
        }
        return Ok(());
    }
    print!(
        "{}",
        toml::to_string_pretty(&app.settings).context("Failed to serialize settings")?
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

async fn find_workspace(app: &App, token: &str, key: &str) -> Result<Workspace> {
    let list = workspaces::list_workspaces(&app.client, token).await?;
    pick(list, key, |w| (&w.id, &w.display_name)).ok_or_else(|| anyhow!("No workspace matches '{}'", key))
}

async fn find_item(app: &App, token: &str, workspace_id: &str, key: &str) -> Result<Item> {
    let list = items::list_items(&app.client, token, workspace_id).await?;
    pick(list, key, |i| (&i.id, &i.display_name)).ok_or_else(|| anyhow!("No item matches '{}'", key))
}

/// Exact ID match first, then a case-insensitive name match.
fn pick<T>(list: Vec<T>, key: &str, fields: impl Fn(&T) -> (&String, &String)) -> Option<T> {
    let pos = list
        .iter()
        .position(|t| fields(t).0.eq_ignore_ascii_case(key))
        .or_else(|| list.iter().position(|t| fields(t).1.eq_ignore_ascii_case(key)))?;
    list.into_iter().nth(pos)
}

fn parse_role(role: &str) -> Result<WorkspaceRole> {
    WorkspaceRole::parse(role)
        .ok_or_else(|| anyhow!("Unknown role '{}' (admin, member, contributor, viewer)", role))
}

// ---------------------------------------------------------------------------
// Workspaces and capacities
// ---------------------------------------------------------------------------

pub async fn list_workspaces(app: &App) -> Result<()> {
    let token = app.token().await?;
    let mut list = workspaces::list_workspaces(&app.client, &token).await?;

    if let Some(oid) = crate::auth::TokenClaims::decode(&token).and_then(|c| c.oid) {
        let found = roles::lookup_roles(&app.client, &token, &list, &oid).await;
        roles::apply_roles(&mut list, &found);
    }

    workspaces::print_workspaces(&list);
    Ok(())
}

pub async fn create_workspace(
    app: &App,
    name: String,
    description: Option<String>,
    capacity: Option<String>,
) -> Result<()> {
    let token = app.token().await?;
    let new = NewWorkspace {
        display_name: name,
        description,
        capacity_id: capacity,
    };
    let ws = workspaces::create_workspace(&app.client, &token, &new).await?;
    println!("Created workspace {} ({})", ws.display_name, ws.id);
    Ok(())
}

pub async fn update_workspace(
    app: &App,
    workspace: &str,
    name: Option<String>,
    description: Option<String>,
) -> Result<()> {
    if name.is_none() && description.is_none() {
        bail!("Nothing to update; pass --name and/or --description");
    }
    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;
    workspaces::update_workspace(&app.client, &token, &ws.id, name.as_deref(), description.as_deref())
        .await?;
    println!("Updated workspace {}", ws.id);
    Ok(())
}

pub async fn delete_workspace(app: &App, workspace: &str) -> Result<()> {
    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;
    workspaces::delete_workspace(&app.client, &token, &ws.id).await?;
    println!("Deleted workspace {}", ws.display_name);
    Ok(())
}

pub async fn list_capacities(app: &App) -> Result<()> {
    let token = app.token().await?;
    let list = workspaces::list_capacities(&app.client, &token).await?;
    workspaces::print_capacities(&list);
    Ok(())
}

pub async fn assign_capacity(app: &App, workspace: &str, capacity: &str) -> Result<()> {
    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;
    workspaces::assign_to_capacity(&app.client, &token, &ws.id, capacity).await?;
    println!("Assigned {} to capacity {}", ws.display_name, capacity);
    Ok(())
}

pub async fn unassign_capacity(app: &App, workspace: &str) -> Result<()> {
    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;
    workspaces::unassign_from_capacity(&app.client, &token, &ws.id).await?;
    println!("Unassigned {} from its capacity", ws.display_name);
    Ok(())
}

// ---------------------------------------------------------------------------
// Items, labels and uploads
// ---------------------------------------------------------------------------

pub async fn list_items(app: &App, workspace: &str) -> Result<()> {
    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;
    let list = items::list_items(&app.client, &token, &ws.id).await?;
    items::print_items(&list);
    Ok(())
}

pub async fn create_item(
    app: &App,
    workspace: &str,
    name: &str,
    kind: &str,
    description: Option<String>,
) -> Result<()> {
    let item_type = ItemType::parse(kind).ok_or_else(|| anyhow!("Unknown item type '{}'", kind))?;
    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;
    match items::create_item(&app.client, &token, &ws.id, name, item_type, description.as_deref()).await? {
        Some(item) => println!("Created {} {} ({})", item.item_type.as_str(), item.display_name, item.id),
        None => println!("Creation of {} accepted; it will appear once provisioned.", name),
    }
    Ok(())
}

pub async fn update_item(
    app: &App,
    workspace: &str,
    item: &str,
    name: Option<String>,
    description: Option<String>,
) -> Result<()> {
    if name.is_none() && description.is_none() {
        bail!("Nothing to update; pass --name and/or --description");
    }
    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;
    let it = find_item(app, &token, &ws.id, item).await?;
    items::update_item(&app.client, &token, &ws.id, &it.id, name.as_deref(), description.as_deref())
        .await?;
    println!("Updated item {}", it.id);
    Ok(())
}

pub async fn delete_item(app: &App, workspace: &str, item: &str) -> Result<()> {
    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;
    let it = find_item(app, &token, &ws.id, item).await?;
    items::delete_item(&app.client, &token, &ws.id, &it.id).await?;
    println!("Deleted item {}", it.display_name);
    Ok(())
}

pub async fn label(app: &App, workspace: &str, item_keys: &[String], label_id: &str) -> Result<()> {
    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;
    let all = items::list_items(&app.client, &token, &ws.id).await?;

    let mut targets = Vec::new();
    for key in item_keys {
        let found = pick(all.clone(), key, |i| (&i.id, &i.display_name))
            .ok_or_else(|| anyhow!("No item matches '{}'", key))?;
        targets.push(found);
    }

    let changes = items::set_sensitivity_label(&app.client, &token, &targets, label_id).await?;
    for change in &changes {
        println!("  {:<36} {}", change.id, change.status);
    }
    println!("Label {} requested for {} items", label_id, targets.len());
    Ok(())
}

pub async fn upload(
    app: &App,
    workspace: &str,
    lakehouse: &str,
    local: &Path,
    dest: Option<String>,
) -> Result<()> {
    let data = tokio::fs::read(local)
        .await
        .with_context(|| format!("Failed to read {}", local.display()))?;
    let dest = match dest {
        Some(d) => d,
        None => local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("Cannot derive a file name from {}", local.display()))?,
    };

    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;
    let lh = find_item(app, &token, &ws.id, lakehouse).await?;
    if lh.item_type != ItemType::Lakehouse {
        bail!("{} is a {}, not a Lakehouse", lh.display_name, lh.item_type.as_str());
    }

    let storage = app
        .session
        .scoped_token(&app.config, &app.settings.storage_scope)
        .await?
        .ok_or(Error::NotSignedIn)?;

    let written = onelake::upload_file(&app.client, &storage.access_token, &ws.id, &lh.id, &dest, &data).await?;
    println!("Uploaded {} bytes to {}/Files/{}", written, lh.display_name, dest.trim_start_matches('/'));
    Ok(())
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

pub async fn list_jobs(app: &App, workspace: &str, item: Option<&str>) -> Result<()> {
    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;

    let list = match item {
        Some(key) => {
            let it = find_item(app, &token, &ws.id, key).await?;
            let mut list = jobs::list_job_instances(&app.client, &token, &ws.id, &it.id).await?;
            for job in &mut list {
                job.item_name = Some(it.display_name.clone());
            }
            list
        }
        None => {
            let all = items::list_items(&app.client, &token, &ws.id).await?;
            jobs::recent_jobs(&app.client, &token, &ws.id, &all).await?
        }
    };

    jobs::print_jobs(&list);
    Ok(())
}

pub async fn run(app: &App, workspace: &str, item: &str) -> Result<()> {
    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;
    let it = find_item(app, &token, &ws.id, item).await?;
    match jobs::run_item(&app.client, &token, &ws.id, &it).await? {
        Some(id) => println!("Started job {} for {}", id, it.display_name),
        None => println!("Job for {} accepted", it.display_name),
    }
    Ok(())
}

pub async fn cancel_job(app: &App, workspace: &str, item: &str, job_id: &str) -> Result<()> {
    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;
    let it = find_item(app, &token, &ws.id, item).await?;
    jobs::cancel_job(&app.client, &token, &ws.id, &it.id, job_id).await?;
    println!("Cancellation of job {} requested", job_id);
    Ok(())
}

/// Follow job status of a workspace until Ctrl+C.
pub async fn watch(app: &App, workspace: &str) -> Result<()> {
    let mut controller = app.controller();
    if !controller.restore().await {
        return Err(Error::NotSignedIn.into());
    }

    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;
    controller.open_workspace(&ws.id).await;

    let mut view = controller.subscribe();
    render_watch(&view.borrow_and_update());
    println!(
        "Refreshing every {}s. Press Ctrl+C to stop.",
        app.settings.poll_interval().as_secs()
    );

    loop {
        tokio::select! {
            event = controller.next_event() => match event {
                Some(event) => controller.apply(event).await,
                None => break,
            },
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = view.borrow_and_update().clone();
                if let Some(error) = &snapshot.error {
                    eprintln!("Error: {}", error);
                }
                if snapshot.session != SessionState::SignedIn {
                    bail!("Session {}; run 'fabric-cli login'", snapshot.session.as_str());
                }
                render_watch(&snapshot);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Stopping watch");
                break;
            }
        }
    }

    controller.stop_poll();
    Ok(())
}

fn render_watch(view: &crate::controller::ViewState) {
    if let Scope::Workspace { name, .. } = &view.scope {
        let active = view.jobs.iter().filter(|j| j.status.is_active()).count();
        println!(
            "\n{} ({}, {} active)",
            name,
            chrono::Local::now().format("%H:%M:%S"),
            active
        );
    }
    jobs::print_jobs(&view.jobs);
}

// ---------------------------------------------------------------------------
// Role assignments
// ---------------------------------------------------------------------------

pub async fn list_roles(app: &App, workspace: &str) -> Result<()> {
    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;
    let list = roles::list_role_assignments(&app.client, &token, &ws.id).await?;
    roles::print_role_assignments(&list);
    Ok(())
}

pub async fn add_role(
    app: &App,
    workspace: &str,
    principal: &str,
    principal_type: &str,
    role: &str,
) -> Result<()> {
    let role = parse_role(role)?;
    let kind = PrincipalType::parse(principal_type)
        .ok_or_else(|| anyhow!("Unknown principal type '{}'", principal_type))?;
    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;
    let ra = roles::add_role_assignment(&app.client, &token, &ws.id, principal, kind, role).await?;
    println!("Granted {} to {} ({})", ra.role.as_str(), ra.principal.label(), ra.id);
    Ok(())
}

pub async fn update_role(app: &App, workspace: &str, assignment: &str, role: &str) -> Result<()> {
    let role = parse_role(role)?;
    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;
    roles::update_role_assignment(&app.client, &token, &ws.id, assignment, role).await?;
    println!("Role assignment {} is now {}", assignment, role.as_str());
    Ok(())
}

pub async fn remove_role(app: &App, workspace: &str, assignment: &str) -> Result<()> {
    let token = app.token().await?;
    let ws = find_workspace(app, &token, workspace).await?;
    roles::delete_role_assignment(&app.client, &token, &ws.id, assignment).await?;
    println!("Removed role assignment {}", assignment);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws(id: &str, name: &str) -> Workspace {
        Workspace {
            id: id.into(),
            display_name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_pick_prefers_id_then_name() {
        let list = vec![ws("a1", "Sales"), ws("b2", "a1"), ws("c3", "Finance")];
        let by_id = pick(list.clone(), "A1", |w| (&w.id, &w.display_name)).unwrap();
        assert_eq!(by_id.display_name, "Sales");
        let by_name = pick(list.clone(), "finance", |w| (&w.id, &w.display_name)).unwrap();
        assert_eq!(by_name.id, "c3");
        assert!(pick(list, "hr", |w| (&w.id, &w.display_name)).is_none());
    }

    #[test]
    fn test_parse_role_rejects_unknown() {
        assert_eq!(parse_role("viewer").unwrap(), WorkspaceRole::Viewer);
        assert!(parse_role("owner").is_err());
    }
}
