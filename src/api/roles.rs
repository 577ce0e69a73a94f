//! Workspace role assignments

use std::collections::HashMap;

use serde_json::json;

use super::client::{fan_out, ApiError, FabricClient};
use crate::models::{PrincipalType, RoleAssignment, Workspace, WorkspaceRole};

pub async fn list_role_assignments(
    client: &FabricClient,
    token: &str,
    workspace_id: &str,
) -> Result<Vec<RoleAssignment>, ApiError> {
    let mut assignments: Vec<RoleAssignment> = client
        .get_all(&format!("/workspaces/{}/roleAssignments", workspace_id), token)
        .await?;
    assignments.sort_by(|a, b| {
        a.role
            .cmp(&b.role)
            .then_with(|| a.principal.label().to_lowercase().cmp(&b.principal.label().to_lowercase()))
    });
    Ok(assignments)
}

pub async fn add_role_assignment(
    client: &FabricClient,
    token: &str,
    workspace_id: &str,
    principal_id: &str,
    principal_type: PrincipalType,
    role: WorkspaceRole,
) -> Result<RoleAssignment, ApiError> {
    let body = json!({
        "principal": { "id": principal_id, "type": principal_type.as_str() },
        "role": role.as_str(),
    });
    let resp = client
        .post(&format!("/workspaces/{}/roleAssignments", workspace_id), token, &body)
        .await?;
    resp.json()
}

pub async fn update_role_assignment(
    client: &FabricClient,
    token: &str,
    workspace_id: &str,
    assignment_id: &str,
    role: WorkspaceRole,
) -> Result<(), ApiError> {
    client
        .patch(
            &format!("/workspaces/{}/roleAssignments/{}", workspace_id, assignment_id),
            token,
            &json!({ "role": role.as_str() }),
        )
        .await?;
    Ok(())
}

pub async fn delete_role_assignment(
    client: &FabricClient,
    token: &str,
    workspace_id: &str,
    assignment_id: &str,
) -> Result<(), ApiError> {
    client
        .delete(
            &format!("/workspaces/{}/roleAssignments/{}", workspace_id, assignment_id),
            token,
        )
        .await?;
    Ok(())
}

/// The principal's strongest direct role in each workspace, looked up
/// concurrently. Workspaces whose lookup fails or that grant the principal
/// nothing directly are absent from the map.
pub async fn lookup_roles(
    client: &FabricClient,
    token: &str,
    workspaces: &[Workspace],
    principal_id: &str,
) -> HashMap<String, WorkspaceRole> {
    let found = fan_out(workspaces.iter(), client.fanout(), |ws| async move {
        let assignments = list_role_assignments(client, token, &ws.id).await?;
        let role = assignments
            .iter()
            .filter(|a| a.principal.id.eq_ignore_ascii_case(principal_id))
            .map(|a| a.role)
            .min();
        Ok((ws.id.clone(), role))
    })
    .await;

    found
        .results
        .into_iter()
        .filter_map(|(id, role)| role.map(|r| (id, r)))
        .collect()
}

/// Copy looked-up roles onto the workspaces.
pub fn apply_roles(workspaces: &mut [Workspace], roles: &HashMap<String, WorkspaceRole>) {
    for ws in workspaces {
        ws.role = roles.get(&ws.id).copied();
    }
}

pub fn print_role_assignments(assignments: &[RoleAssignment]) {
    println!("\nRole assignments:");
    println!("{:-<80}", "");
    if assignments.is_empty() {
        println!("  (none)");
        return;
    }
    for ra in assignments {
        println!(
            "  {:<12} {:<40} {:<24} {}",
            ra.role.as_str(),
            ra.principal.label(),
            ra.principal.kind.as_str(),
            ra.id
        );
    }
}
