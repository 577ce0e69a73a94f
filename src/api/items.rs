//! Workspace items and sensitivity labels

use serde::Deserialize;
use serde_json::json;

use super::client::{ApiError, FabricClient};
use crate::models::{Item, ItemType};

pub async fn list_items(client: &FabricClient, token: &str, workspace_id: &str) -> Result<Vec<Item>, ApiError> {
    tracing::debug!("Fetching items of workspace {}...", workspace_id);
    let mut items: Vec<Item> = client
        .get_all(&format!("/workspaces/{}/items", workspace_id), token)
        .await?;
    items.sort_by_key(|i| i.display_name.to_lowercase());
    Ok(items)
}

/// Create an item. Some types are provisioned asynchronously (202) and the
/// created item is not known yet; that case yields `None`.
pub async fn create_item(
    client: &FabricClient,
    token: &str,
    workspace_id: &str,
    display_name: &str,
    item_type: ItemType,
    description: Option<&str>,
) -> Result<Option<Item>, ApiError> {
    let mut body = json!({ "displayName": display_name, "type": item_type.as_str() });
    if let Some(desc) = description {
        body["description"] = json!(desc);
    }
    let resp = client
        .post(&format!("/workspaces/{}/items", workspace_id), token, &body)
        .await?;
    if resp.status == 202 {
        tracing::info!("Creation of {} accepted, provisioning in background", display_name);
        return Ok(None);
    }
    resp.json().map(Some)
}

pub async fn update_item(
    client: &FabricClient,
    token: &str,
    workspace_id: &str,
    item_id: &str,
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
    client
        .patch(&format!("/workspaces/{}/items/{}", workspace_id, item_id), token, &body)
        .await?;
    Ok(())
}

pub async fn delete_item(
    client: &FabricClient,
    token: &str,
    workspace_id: &str,
    item_id: &str,
) -> Result<(), ApiError> {
    client
        .delete(&format!("/workspaces/{}/items/{}", workspace_id, item_id), token)
        .await?;
    Ok(())
}

/// Per-item outcome of a bulk label change
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelChange {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BulkLabelResponse {
    items_change_label_status: Vec<LabelChange>,
}

/// Apply one sensitivity label to many items in a single request.
pub async fn set_sensitivity_label(
    client: &FabricClient,
    token: &str,
    items: &[Item],
    label_id: &str,
) -> Result<Vec<LabelChange>, ApiError> {
    let targets: Vec<_> = items
        .iter()
        .map(|i| json!({ "id": i.id, "type": i.item_type.as_str() }))
        .collect();
    let body = json!({
        "items": targets,
        "labelId": label_id,
        "assignmentMethod": "Standard",
    });
    let resp = client.post("/admin/items/bulkSetLabels", token, &body).await?;
    let parsed: BulkLabelResponse = resp.json_opt().unwrap_or_default();
    Ok(parsed.items_change_label_status)
}

pub fn print_items(items: &[Item]) {
    println!("\nItems:");
    println!("{:-<80}", "");
    if items.is_empty() {
        println!("  (no items found)");
        return;
    }
    for item in items {
        let marker = if item.item_type.is_runnable() { "*" } else { " " };
        println!(
            "{} {:<36} {:<20} {}",
            marker,
            item.display_name,
            item.item_type.as_str(),
            item.id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::tests::client;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_list_items_sorted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/workspaces/ws/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    {"id": "2", "displayName": "orders", "type": "Lakehouse"},
                    {"id": "1", "displayName": "Daily load", "type": "DataPipeline"}
                ]
            })))
            .mount(&server)
            .await;

        let items = list_items(&client(&server.uri()), "T", "ws").await.unwrap();
        assert_eq!(items[0].display_name, "Daily load");
        assert_eq!(items[0].item_type, ItemType::DataPipeline);
        assert_eq!(items[1].item_type, ItemType::Lakehouse);
    }

    #[tokio::test]
    async fn test_create_item_accepted_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/workspaces/ws/items"))
            .and(body_json(json!({"displayName": "wh", "type": "Warehouse"})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let created = create_item(&client(&server.uri()), "T", "ws", "wh", ItemType::Warehouse, None)
            .await
            .unwrap();
        assert!(created.is_none());
    }

    #[tokio::test]
    async fn test_bulk_label_reports_per_item_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/admin/items/bulkSetLabels"))
            .and(body_json(json!({
                "items": [{"id": "i-1", "type": "Report"}],
                "labelId": "lbl",
                "assignmentMethod": "Standard"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "itemsChangeLabelStatus": [{"id": "i-1", "status": "Succeeded"}]
            })))
            .mount(&server)
            .await;

        let items = vec![Item {
            id: "i-1".into(),
            item_type: ItemType::Report,
            ..Default::default()
        }];
        let changes = set_sensitivity_label(&client(&server.uri()), "T", &items, "lbl")
            .await
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].status, "Succeeded");
    }
}
