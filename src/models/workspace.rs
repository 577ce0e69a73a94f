//! Workspace, role assignment and capacity models

use serde::{Deserialize, Serialize};

/// Workspace kind as reported by the API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkspaceType {
    Personal,
    Workspace,
    AdminWorkspace,
    /// Any kind this client does not know about
    #[default]
    #[serde(other)]
    Unknown,
}

/// Workspace role, highest privilege first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkspaceRole {
    Admin,
    Member,
    Contributor,
    Viewer,
    #[default]
    #[serde(other)]
    Unknown,
}

impl WorkspaceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceRole::Admin => "Admin",
            WorkspaceRole::Member => "Member",
            WorkspaceRole::Contributor => "Contributor",
            WorkspaceRole::Viewer => "Viewer",
            WorkspaceRole::Unknown => "Unknown",
        }
    }

    /// Parse user input (case-insensitive). `None` for anything unrecognised.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Some(WorkspaceRole::Admin),
            "member" => Some(WorkspaceRole::Member),
            "contributor" => Some(WorkspaceRole::Contributor),
            "viewer" => Some(WorkspaceRole::Viewer),
            _ => None,
        }
    }
}

/// Workspace entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Workspace {
    pub id: String,
    pub display_name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: WorkspaceType,
    pub capacity_id: Option<String>,
    /// Caller's role, filled in by the role lookup fan-out
    #[serde(skip)]
    pub role: Option<WorkspaceRole>,
}

/// Principal kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrincipalType {
    User,
    Group,
    ServicePrincipal,
    ServicePrincipalProfile,
    #[default]
    #[serde(other)]
    Unknown,
}

impl PrincipalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalType::User => "User",
            PrincipalType::Group => "Group",
            PrincipalType::ServicePrincipal => "ServicePrincipal",
            PrincipalType::ServicePrincipalProfile => "ServicePrincipalProfile",
            PrincipalType::Unknown => "Unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Some(PrincipalType::User),
            "group" => Some(PrincipalType::Group),
            "serviceprincipal" | "sp" => Some(PrincipalType::ServicePrincipal),
            "serviceprincipalprofile" => Some(PrincipalType::ServicePrincipalProfile),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserDetails {
    pub user_principal_name: Option<String>,
}

/// Principal in a role assignment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Principal {
    pub id: String,
    pub display_name: Option<String>,
    #[serde(rename = "type")]
    pub kind: PrincipalType,
    pub user_details: Option<UserDetails>,
}

impl Principal {
    /// UPN for users, display name otherwise, ID as last resort.
    pub fn label(&self) -> &str {
        self.user_details
            .as_ref()
            .and_then(|d| d.user_principal_name.as_deref())
            .or(self.display_name.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Workspace role assignment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleAssignment {
    pub id: String,
    pub principal: Principal,
    pub role: WorkspaceRole,
}

/// Capacity a workspace can be assigned to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Capacity {
    pub id: String,
    pub display_name: String,
    pub sku: String,
    pub region: String,
    pub state: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_parses_loose_payload() {
        let ws: Workspace = serde_json::from_value(serde_json::json!({
            "id": "ws-1",
            "displayName": "Sales",
            "type": "Workspace",
            "capacityId": "cap-1",
            "extraField": true
        }))
        .unwrap();
        assert_eq!(ws.display_name, "Sales");
        assert_eq!(ws.kind, WorkspaceType::Workspace);
        assert_eq!(ws.description, "");
        assert_eq!(ws.role, None);

        let ws: Workspace =
            serde_json::from_value(serde_json::json!({"id": "x", "type": "Sandbox"})).unwrap();
        assert_eq!(ws.kind, WorkspaceType::Unknown);
    }

    #[test]
    fn test_role_assignment_and_principal_label() {
        let ra: RoleAssignment = serde_json::from_value(serde_json::json!({
            "id": "ra-1",
            "principal": {
                "id": "p-1",
                "displayName": "Ada",
                "type": "User",
                "userDetails": {"userPrincipalName": "ada@contoso.com"}
            },
            "role": "Contributor"
        }))
        .unwrap();
        assert_eq!(ra.role, WorkspaceRole::Contributor);
        assert_eq!(ra.principal.kind, PrincipalType::User);
        assert_eq!(ra.principal.label(), "ada@contoso.com");

        let ra: RoleAssignment = serde_json::from_value(serde_json::json!({
            "id": "ra-2",
            "principal": {"id": "g-1", "type": "Group"},
            "role": "Owner"
        }))
        .unwrap();
        assert_eq!(ra.role, WorkspaceRole::Unknown);
        assert_eq!(ra.principal.label(), "g-1");
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!(WorkspaceRole::parse("ADMIN"), Some(WorkspaceRole::Admin));
        assert_eq!(WorkspaceRole::parse("owner"), None);
        assert!(WorkspaceRole::Admin < WorkspaceRole::Viewer);
        assert_eq!(PrincipalType::parse("sp"), Some(PrincipalType::ServicePrincipal));
    }
}
