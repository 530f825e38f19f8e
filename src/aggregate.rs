//! Combines independent read queries into one result.
//!
//! Reads are fanned out on a [`JoinSet`] and bounded by a semaphore so that a
//! long list of job names never turns into a burst against the cluster.
//! Results are assembled by key, never by completion order.

use std::collections::BTreeMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::config::{ClientConfig, PartialFailurePolicy};
use crate::error::{DkronError, Result};
use crate::job::{JobConfig, JobHistoryEntry, Member};

/// Which parts of the cluster picture to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterScope {
    #[default]
    All,
    Status,
    Leader,
    Members,
    /// Alias of `Members`.
    Nodes,
    Jobs,
}

impl ClusterScope {
    fn parts(&self) -> Vec<ClusterPart> {
        match self {
            ClusterScope::All => vec![
                ClusterPart::Status,
                ClusterPart::Leader,
                ClusterPart::Members,
                ClusterPart::Jobs,
            ],
            ClusterScope::Status => vec![ClusterPart::Status],
            ClusterScope::Leader => vec![ClusterPart::Leader],
            ClusterScope::Members | ClusterScope::Nodes => vec![ClusterPart::Members],
            ClusterScope::Jobs => vec![ClusterPart::Jobs],
        }
    }
}

impl FromStr for ClusterScope {
    type Err = DkronError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(ClusterScope::All),
            "status" => Ok(ClusterScope::Status),
            "leader" => Ok(ClusterScope::Leader),
            "members" => Ok(ClusterScope::Members),
            "nodes" => Ok(ClusterScope::Nodes),
            "jobs" => Ok(ClusterScope::Jobs),
            other => Err(DkronError::validation(format!(
                "unknown scope '{}', expected one of all, status, leader, members, nodes, jobs",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ClusterPart {
    Status,
    Leader,
    Members,
    Jobs,
}

impl ClusterPart {
    fn name(&self) -> &'static str {
        match self {
            ClusterPart::Status => "status",
            ClusterPart::Leader => "leader",
            ClusterPart::Members => "members",
            ClusterPart::Jobs => "jobs",
        }
    }
}

enum PartData {
    Status(Option<Value>),
    Leader(Option<Member>),
    Members(Option<Vec<String>>),
    Jobs(Option<Vec<String>>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader: Option<Member>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<Vec<String>>,
}

impl ClusterInfo {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.leader.is_none() && self.members.is_none() && self.jobs.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterReport {
    pub info: ClusterInfo,
    /// At least one requested part returned data.
    pub changed: bool,
    /// Failed parts, keyed by part name. Only filled in best-effort mode.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
    /// Parts still in flight when the caller cancelled.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub abandoned: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInfo {
    pub job_name: String,
    pub configuration: Option<JobConfig>,
    pub history: Vec<JobHistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct JobInfoReport {
    /// One entry per requested job, in request order.
    pub jobs: Vec<JobInfo>,
    pub changed: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub abandoned: Vec<String>,
}

struct FanOut<K, T> {
    results: BTreeMap<K, Result<T>>,
    abandoned: Vec<K>,
}

pub struct Aggregator {
    api: ApiClient,
    limit: Arc<Semaphore>,
    policy: PartialFailurePolicy,
    cancel: CancellationToken,
}

impl Aggregator {
    pub fn new(api: ApiClient, config: &ClientConfig) -> Self {
        Self {
            api,
            limit: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            policy: config.partial_failure,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: PartialFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Abort outstanding reads when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub async fn cluster_info(&self, scope: ClusterScope) -> Result<ClusterReport> {
        let parts = scope.parts();
        tracing::debug!(scope = ?scope, parts = parts.len(), "Fetching cluster info");

        let fan_out = self
            .fan_out(parts, |api, part| async move {
                match part {
                    ClusterPart::Status => api.get_status().await.map(PartData::Status),
                    ClusterPart::Leader => api.get_leader().await.map(PartData::Leader),
                    ClusterPart::Members => api.get_members().await.map(PartData::Members),
                    ClusterPart::Jobs => api.get_jobs().await.map(PartData::Jobs),
                }
            })
            .await?;

        let mut report = ClusterReport::default();
        for (part, result) in fan_out.results {
            match result {
                Ok(PartData::Status(status)) => report.info.status = status,
                Ok(PartData::Leader(leader)) => report.info.leader = leader,
                Ok(PartData::Members(members)) => report.info.members = members,
                Ok(PartData::Jobs(jobs)) => report.info.jobs = jobs,
                Err(e) => {
                    tracing::warn!(part = part.name(), error = %e, "Cluster info read failed");
                    report.errors.insert(part.name().to_string(), e.to_string());
                }
            }
        }
        report.changed = !report.info.is_empty();
        report.abandoned = fan_out
            .abandoned
            .iter()
            .map(|p| p.name().to_string())
            .collect();

        Ok(report)
    }

    /// Configuration and execution history for `names`, or for every job on
    /// the cluster when `names` is empty.
    ///
    /// Failing to list the cluster's jobs is always fatal. Per-job failures
    /// follow the configured [`PartialFailurePolicy`].
    pub async fn job_info(
        &self,
        names: &[String],
        history_limit: Option<usize>,
    ) -> Result<JobInfoReport> {
        let names = if names.is_empty() {
            self.api.get_jobs().await?.unwrap_or_default()
        } else {
            names.to_vec()
        };
        tracing::debug!(jobs = names.len(), ?history_limit, "Fetching job info");

        let policy = self.policy;
        let keys: Vec<(usize, String)> = names.into_iter().enumerate().collect();
        let fan_out = self
            .fan_out(keys, move |api, (_, name)| async move {
                fetch_job(api, name, history_limit, policy).await
            })
            .await?;

        let mut report = JobInfoReport::default();
        for ((_, name), result) in fan_out.results {
            match result {
                Ok(info) => report.jobs.push(info),
                // Only reachable in best-effort mode when the task itself failed.
                Err(e) => report.jobs.push(JobInfo {
                    job_name: name,
                    configuration: None,
                    history: Vec::new(),
                    error: Some(e.to_string()),
                }),
            }
        }
        report.changed = report.jobs.iter().any(|j| j.configuration.is_some());
        report.abandoned = fan_out.abandoned.into_iter().map(|(_, n)| n).collect();

        Ok(report)
    }

    /// Run `fetch` for every key with bounded concurrency.
    ///
    /// In fail-fast mode the first error aborts the remaining reads and is
    /// returned. Cancellation aborts the remaining reads and lists their keys
    /// as abandoned.
    async fn fan_out<K, T, F, Fut>(&self, keys: Vec<K>, fetch: F) -> Result<FanOut<K, T>>
    where
        K: Clone + Ord + Send + std::fmt::Debug + 'static,
        T: Send + 'static,
        F: Fn(ApiClient, K) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut set = JoinSet::new();
        for key in &keys {
            let limit = self.limit.clone();
            let fut = fetch(self.api.clone(), key.clone());
            let key = key.clone();
            set.spawn(async move {
                let _permit = limit.acquire_owned().await.ok();
                (key, fut.await)
            });
        }

        let mut results = BTreeMap::new();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::warn!(pending = set.len(), "Aggregation cancelled");
                    set.abort_all();
                    break;
                }
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok((key, result))) => match result {
                        Err(e) if self.policy == PartialFailurePolicy::FailFast => {
                            tracing::warn!(key = ?key, error = %e, "Read failed, aborting aggregation");
                            set.abort_all();
                            return Err(e);
                        }
                        result => {
                            results.insert(key, result);
                        }
                    },
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Aggregation task failed");
                    }
                },
            }
        }

        let abandoned = keys
            .into_iter()
            .filter(|k| !results.contains_key(k))
            .collect();
        Ok(FanOut { results, abandoned })
    }
}

async fn fetch_job(
    api: ApiClient,
    name: String,
    history_limit: Option<usize>,
    policy: PartialFailurePolicy,
) -> Result<JobInfo> {
    let fail_fast = policy == PartialFailurePolicy::FailFast;
    let mut errors = Vec::new();

    let configuration = match api.get_job(&name).await {
        Ok(job) => Some(job),
        Err(e) if fail_fast => return Err(e),
        Err(e) => {
            tracing::warn!(job = %name, error = %e, "Failed to fetch job configuration");
            errors.push(format!("configuration: {}", e));
            None
        }
    };

    let history = match api.get_job_history(&name).await {
        Ok(mut history) => {
            if let Some(limit) = history_limit {
                history.truncate(limit);
            }
            history
        }
        Err(e) if fail_fast => return Err(e),
        Err(e) => {
            tracing::warn!(job = %name, error = %e, "Failed to fetch job history");
            errors.push(format!("history: {}", e));
            Vec::new()
        }
    };

    Ok(JobInfo {
        job_name: name,
        configuration,
        history,
        error: if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_from_str() {
        assert_eq!("all".parse::<ClusterScope>().unwrap(), ClusterScope::All);
        assert_eq!(
            "nodes".parse::<ClusterScope>().unwrap(),
            ClusterScope::Nodes
        );
        assert!("everything".parse::<ClusterScope>().is_err());
    }

    #[test]
    fn scope_parts() {
        assert_eq!(ClusterScope::All.parts().len(), 4);
        assert_eq!(ClusterScope::Nodes.parts(), vec![ClusterPart::Members]);
        assert_eq!(ClusterScope::Members.parts(), ClusterScope::Nodes.parts());
        assert_eq!(ClusterScope::Jobs.parts(), vec![ClusterPart::Jobs]);
    }

    #[test]
    fn empty_cluster_info_omits_every_field() {
        let info = ClusterInfo::default();
        assert!(info.is_empty());
        assert_eq!(serde_json::to_string(&info).unwrap(), "{}");
    }
}
