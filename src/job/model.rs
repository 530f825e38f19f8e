use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Whether a job may start while a previous run is still executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Concurrency {
    Allow,
    Forbid,
}

impl From<bool> for Concurrency {
    fn from(allow: bool) -> Self {
        if allow {
            Concurrency::Allow
        } else {
            Concurrency::Forbid
        }
    }
}

impl std::fmt::Display for Concurrency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Concurrency::Allow => write!(f, "allow"),
            Concurrency::Forbid => write!(f, "forbid"),
        }
    }
}

// The cluster reports "" for jobs created without an explicit policy.
fn lenient_concurrency<'de, D>(deserializer: D) -> Result<Option<Concurrency>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(match raw.as_deref() {
        Some("allow") => Some(Concurrency::Allow),
        Some("forbid") => Some(Concurrency::Forbid),
        _ => None,
    })
}

/// Job configuration in the shape the cluster stores and returns it.
///
/// Fields the cluster maintains on its own (`success_count`, `next`,
/// `status`, ...) are kept in `extra` so a fetched job round-trips intact.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,

    #[serde(
        rename = "displayname",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub retries: u32,

    /// Name of the job this one depends on. The cluster owns the link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_job: Option<String>,

    #[serde(
        default,
        deserialize_with = "lenient_concurrency",
        skip_serializing_if = "Option::is_none"
    )]
    pub concurrency: Option<Concurrency>,

    /// Processor settings keyed by processor name. Values stay untyped since
    /// the cluster stores whatever JSON it was given (`"true"` or `true`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processors: Option<BTreeMap<String, BTreeMap<String, Value>>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_config: Option<BTreeMap<String, String>>,

    /// Trigger one execution right after the job is created. Never sent.
    #[serde(skip)]
    pub run_on_create: bool,

    /// Re-apply the configuration when the job already exists. Never sent.
    #[serde(skip)]
    pub overwrite: bool,

    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl JobConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// One recorded execution of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHistoryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub group: i64,
    #[serde(default)]
    pub job_name: String,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// A cluster node as reported by the leader and members endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Member {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub status: Value,
}
