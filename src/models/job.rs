//! Job instance models

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Job instance status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Deduped,
    #[default]
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::NotStarted => "NotStarted",
            JobStatus::InProgress => "InProgress",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Cancelled => "Cancelled",
            JobStatus::Deduped => "Deduped",
            JobStatus::Unknown => "Unknown",
        }
    }

    /// Still queued or running.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::NotStarted | JobStatus::InProgress)
    }
}

/// Timestamps come with or without an offset (`2024-05-01T10:00:00.1234567`);
/// offset-less values are UTC. Unparseable values become `None`.
fn lenient_utc<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    Ok(raw.as_deref().and_then(parse_utc))
}

pub(crate) fn parse_utc(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FailureReason {
    pub error_code: Option<String>,
    pub message: Option<String>,
}

/// One run of an item's job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobInstance {
    pub id: String,
    pub item_id: String,
    pub job_type: String,
    pub invoke_type: String,
    pub status: JobStatus,
    #[serde(deserialize_with = "lenient_utc")]
    pub start_time_utc: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_utc")]
    pub end_time_utc: Option<DateTime<Utc>>,
    pub failure_reason: Option<FailureReason>,
    /// Display name of the item, attached by the jobs fan-out
    #[serde(skip)]
    pub item_name: Option<String>,
}
