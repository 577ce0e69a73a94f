//! On-demand item jobs

use std::cmp::Reverse;

use super::client::{fan_out, ApiError, FabricClient};
use crate::models::{Item, JobInstance};

fn instances_path(workspace_id: &str, item_id: &str) -> String {
    format!("/workspaces/{}/items/{}/jobs/instances", workspace_id, item_id)
}

/// Job instance ID from the `Location` header of an accepted run request.
fn job_id_from_location(location: &str) -> Option<String> {
    let path = location.split(['?', '#']).next()?;
    let (_, tail) = path.trim_end_matches('/').rsplit_once("/jobs/instances/")?;
    (!tail.is_empty() && !tail.contains('/')).then(|| tail.to_string())
}

/// Start a job. Returns the new instance ID when the service reports one.
pub async fn run_item(
    client: &FabricClient,
    token: &str,
    workspace_id: &str,
    item: &Item,
) -> Result<Option<String>, ApiError> {
    let job_type = item
        .item_type
        .job_type()
        .ok_or_else(|| ApiError::NotRunnable(item.item_type.as_str().to_string()))?;
    let path = format!("{}?jobType={}", instances_path(workspace_id, &item.id), job_type);
    let resp = client.post(&path, token, &serde_json::json!({})).await?;
    let job_id = resp.header("location").and_then(job_id_from_location);
    tracing::info!(
        "Started {} job for {} ({})",
        job_type,
        item.display_name,
        job_id.as_deref().unwrap_or("no instance id")
    );
    Ok(job_id)
}

pub async fn cancel_job(
    client: &FabricClient,
    token: &str,
    workspace_id: &str,
    item_id: &str,
    job_id: &str,
) -> Result<(), ApiError> {
    let path = format!("{}/{}/cancel", instances_path(workspace_id, item_id), job_id);
    client.post(&path, token, &serde_json::json!({})).await?;
    Ok(())
}

pub async fn list_job_instances(
    client: &FabricClient,
    token: &str,
    workspace_id: &str,
    item_id: &str,
) -> Result<Vec<JobInstance>, ApiError> {
    let mut jobs: Vec<JobInstance> = client
        .get_all(&instances_path(workspace_id, item_id), token)
        .await?;
    sort_newest_first(&mut jobs);
    Ok(jobs)
}

/// Newest start first; instances that have not started sort last.
pub fn sort_newest_first(jobs: &mut [JobInstance]) {
    jobs.sort_by_key(|j| (j.start_time_utc.is_none(), Reverse(j.start_time_utc)));
}

/// Job instances of every runnable item, fetched concurrently and tagged
/// with the item name. Items whose lookup fails contribute nothing, but when
/// every lookup fails the first error is returned instead of an empty list.
pub async fn recent_jobs(
    client: &FabricClient,
    token: &str,
    workspace_id: &str,
    items: &[Item],
) -> Result<Vec<JobInstance>, ApiError> {
    let runnable: Vec<Item> = items
        .iter()
        .filter(|i| i.item_type.is_runnable())
        .cloned()
        .collect();
    let per_item = fan_out(runnable, client.fanout(), |item: Item| async move {
        let mut jobs = list_job_instances(client, token, workspace_id, &item.id).await?;
        for job in &mut jobs {
            job.item_name = Some(item.display_name.clone());
        }
        Ok(jobs)
    })
    .await
    .into_result()?;

    let mut jobs: Vec<JobInstance> = per_item.into_iter().flatten().collect();
    sort_newest_first(&mut jobs);
    Ok(jobs)
}

pub fn print_jobs(jobs: &[JobInstance]) {
    println!("\nJobs:");
    println!("{:-<80}", "");
    if jobs.is_empty() {
        println!("  (no job runs found)");
        return;
    }
    for job in jobs {
        let started = job
            .start_time_utc
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<19} {:<11} {:<28} {}",
            started,
            job.status.as_str(),
            job.item_name.as_deref().unwrap_or(&job.item_id),
            job.id
        );
        if let Some(reason) = job.failure_reason.as_ref().and_then(|r| r.message.as_deref()) {
            println!("      {}", reason);
        }
    }
}
