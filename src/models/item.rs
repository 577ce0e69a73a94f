//! Item models

use serde::{Deserialize, Serialize};

/// Item type. Types this client does not know map to `Unknown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    Dashboard,
    DataPipeline,
    Datamart,
    Environment,
    Eventhouse,
    Eventstream,
    KQLDashboard,
    KQLDatabase,
    KQLQueryset,
    Lakehouse,
    MLExperiment,
    MLModel,
    MirroredDatabase,
    Notebook,
    PaginatedReport,
    Reflex,
    Report,
    SemanticModel,
    SparkJobDefinition,
    SQLEndpoint,
    Warehouse,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Dashboard => "Dashboard",
            ItemType::DataPipeline => "DataPipeline",
            ItemType::Datamart => "Datamart",
            ItemType::Environment => "Environment",
            ItemType::Eventhouse => "Eventhouse",
            ItemType::Eventstream => "Eventstream",
            ItemType::KQLDashboard => "KQLDashboard",
            ItemType::KQLDatabase => "KQLDatabase",
            ItemType::KQLQueryset => "KQLQueryset",
            ItemType::Lakehouse => "Lakehouse",
            ItemType::MLExperiment => "MLExperiment",
            ItemType::MLModel => "MLModel",
            ItemType::MirroredDatabase => "MirroredDatabase",
            ItemType::Notebook => "Notebook",
            ItemType::PaginatedReport => "PaginatedReport",
            ItemType::Reflex => "Reflex",
            ItemType::Report => "Report",
            ItemType::SemanticModel => "SemanticModel",
            ItemType::SparkJobDefinition => "SparkJobDefinition",
            ItemType::SQLEndpoint => "SQLEndpoint",
            ItemType::Warehouse => "Warehouse",
            ItemType::Unknown => "Unknown",
        }
    }

    /// Case-insensitive parse of user input; never yields `Unknown`.
    pub fn parse(s: &str) -> Option<Self> {
        ALL_KNOWN
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// On-demand job type for runnable items.
    pub fn job_type(&self) -> Option<&'static str> {
        match self {
            ItemType::Notebook => Some("RunNotebook"),
            ItemType::DataPipeline => Some("Pipeline"),
            ItemType::SparkJobDefinition => Some("sparkjob"),
            _ => None,
        }
    }

    pub fn is_runnable(&self) -> bool {
        self.job_type().is_some()
    }
}

const ALL_KNOWN: &[ItemType] = &[
    ItemType::Dashboard,
    ItemType::DataPipeline,
    ItemType::Datamart,
    ItemType::Environment,
    ItemType::Eventhouse,
    ItemType::Eventstream,
    ItemType::KQLDashboard,
    ItemType::KQLDatabase,
    ItemType::KQLQueryset,
    ItemType::Lakehouse,
    ItemType::MLExperiment,
    ItemType::MLModel,
    ItemType::MirroredDatabase,
    ItemType::Notebook,
    ItemType::PaginatedReport,
    ItemType::Reflex,
    ItemType::Report,
    ItemType::SemanticModel,
    ItemType::SparkJobDefinition,
    ItemType::SQLEndpoint,
    ItemType::Warehouse,
];

/// Item in a workspace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Item {
    pub id: String,
    pub display_name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub workspace_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_item_type_falls_back() {
        let item: Item = serde_json::from_value(serde_json::json!({
            "id": "i-1",
            "displayName": "Model",
            "type": "BrandNewThing",
            "workspaceId": "ws-1"
        }))
        .unwrap();
        assert_eq!(item.item_type, ItemType::Unknown);
        assert!(!item.item_type.is_runnable());
    }

    #[test]
    fn test_runnable_types() {
        assert_eq!(ItemType::Notebook.job_type(), Some("RunNotebook"));
        assert_eq!(ItemType::DataPipeline.job_type(), Some("Pipeline"));
        assert!(ItemType::SparkJobDefinition.is_runnable());
        assert!(!ItemType::Lakehouse.is_runnable());
    }

    #[test]
    fn test_parse_user_input() {
        assert_eq!(ItemType::parse("Lakehouse"), Some(ItemType::Lakehouse));
        assert_eq!(ItemType::parse("notebook"), Some(ItemType::Notebook));
        assert_eq!(ItemType::parse("kqldatabase"), Some(ItemType::KQLDatabase));
        assert_eq!(ItemType::parse("Unknown"), None);
        assert_eq!(ItemType::parse("spreadsheet"), None);
    }
}
