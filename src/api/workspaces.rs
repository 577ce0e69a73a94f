//! Workspaces and capacities

use serde_json::json;

use super::client::{ApiError, FabricClient};
use crate::models::{Capacity, Workspace};

/// Fields for a new workspace.
#[derive(Debug, Clone, Default)]
pub struct NewWorkspace {
    pub display_name: String,
    pub description: Option<String>,
    pub capacity_id: Option<String>,
}

/// Sort by display name, ignoring case. Stable for equal names.
pub fn sort_by_name(workspaces: &mut [Workspace]) {
    workspaces.sort_by_key(|w| w.display_name.to_lowercase());
}

/// Every workspace the caller can see, sorted by name.
pub async fn list_workspaces(client: &FabricClient, token: &str) -> Result<Vec<Workspace>, ApiError> {
    tracing::debug!("Fetching workspaces...");
    let mut workspaces: Vec<Workspace> = client.get_all("/workspaces", token).await?;
    sort_by_name(&mut workspaces);
    tracing::debug!("Found {} workspaces", workspaces.len());
    Ok(workspaces)
}

pub async fn get_workspace(client: &FabricClient, token: &str, id: &str) -> Result<Workspace, ApiError> {
    client.get(&format!("/workspaces/{}", id), token).await?.json()
}

pub async fn create_workspace(
    client: &FabricClient,
    token: &str,
    new: &NewWorkspace,
) -> Result<Workspace, ApiError> {
    let mut body = json!({ "displayName": new.display_name });
    if let Some(desc) = &new.description {
        body["description"] = json!(desc);
    }
    if let Some(cap) = &new.capacity_id {
        body["capacityId"] = json!(cap);
    }
    let workspace: Workspace = client.post("/workspaces", token, &body).await?.json()?;
    tracing::info!("Created workspace {} ({})", workspace.display_name, workspace.id);
    Ok(workspace)
}

/// PATCH only the fields that are given.
pub async fn update_workspace(
    client: &FabricClient,
    token: &str,
    id: &str,
    display_name: Option<&str>,
    description: Option<&str>,
) -> Result<(), ApiError> {
    let mut body = json!({});
    if let Some(name) = display_name {
        body["displayName"] = json!(name);
    }
    if let Some(desc) = description {
        body["description"] = json!(desc);
    }
    client.patch(&format!("/workspaces/{}", id), token, &body).await?;
    Ok(())
}

pub async fn delete_workspace(client: &FabricClient, token: &str, id: &str) -> Result<(), ApiError> {
    client.delete(&format!("/workspaces/{}", id), token).await?;
    tracing::info!("Deleted workspace {}", id);
    Ok(())
}

pub async fn assign_to_capacity(
    client: &FabricClient,
    token: &str,
    workspace_id: &str,
    capacity_id: &str,
) -> Result<(), ApiError> {
    client
        .post(
            &format!("/workspaces/{}/assignToCapacity", workspace_id),
            token,
            &json!({ "capacityId": capacity_id }),
        )
        .await?;
    Ok(())
}

pub async fn unassign_from_capacity(
    client: &FabricClient,
    token: &str,
    workspace_id: &str,
) -> Result<(), ApiError> {
    client
        .post(
            &format!("/workspaces/{}/unassignFromCapacity", workspace_id),
            token,
            &json!({}),
        )
        .await?;
    Ok(())
}

/// Capacities the caller can assign workspaces to, sorted by name.
pub async fn list_capacities(client: &FabricClient, token: &str) -> Result<Vec<Capacity>, ApiError> {
    let mut capacities: Vec<Capacity> = client.get_all("/capacities", token).await?;
    capacities.sort_by_key(|c| c.display_name.to_lowercase());
    Ok(capacities)
}

/// Print workspaces (CLI output).
pub fn print_workspaces(workspaces: &[Workspace]) {
    println!("\nWorkspaces:");
    println!("{:-<80}", "");
    if workspaces.is_empty() {
        println!("  (no workspaces found)");
        return;
    }
    for ws in workspaces {
        let role = ws.role.map(|r| r.as_str()).unwrap_or("-");
        let capacity = ws.capacity_id.as_deref().unwrap_or("-");
        println!(
            "  {:<32} {:<12} {:<36} {}",
            ws.display_name, role, ws.id, capacity
        );
    }
}

pub fn print_capacities(capacities: &[Capacity]) {
    println!("\nCapacities:");
    println!("{:-<80}", "");
    if capacities.is_empty() {
        println!("  (no capacities found)");
        return;
    }
    for cap in capacities {
        println!(
            "  {:<32} {:<6} {:<14} {:<10} {}",
            cap.display_name, cap.sku, cap.region, cap.state, cap.id
        );
    }
}
