//! Drives the cluster towards a requested job state.
//!
//! Every decision is taken against a fresh read of the job; nothing is cached
//! between calls. The existence check always completes before any mutating
//! request is issued, and calls for the same job name are serialized.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::api::ApiClient;
use crate::error::Result;
use crate::job::{normalize, JobConfig, JobParams, JobRequest, Operation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Created,
    Updated,
    Deleted,
    Toggled,
    Unchanged,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Created => write!(f, "created"),
            Action::Updated => write!(f, "updated"),
            Action::Deleted => write!(f, "deleted"),
            Action::Toggled => write!(f, "toggled"),
            Action::Unchanged => write!(f, "unchanged"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub changed: bool,
    pub action: Action,
    /// Resulting configuration; `None` when the job does not exist afterwards
    /// and never did.
    pub job: Option<JobConfig>,
    /// An execution was started right after creation.
    pub triggered: bool,
    /// The post-create trigger failed. The job itself was still created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_error: Option<String>,
    pub dry_run: bool,
}

impl ReconcileOutcome {
    fn new(action: Action, job: Option<JobConfig>, dry_run: bool) -> Self {
        Self {
            changed: action != Action::Unchanged,
            action,
            job,
            triggered: false,
            trigger_error: None,
            dry_run,
        }
    }
}

type InFlight = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

/// Holds a job name's lock slot. The map entry is removed on drop once no
/// other caller holds the same slot, including when the `apply` future is
/// dropped mid-flight.
struct NameSlot<'a> {
    in_flight: &'a InFlight,
    name: String,
    lock: Arc<Mutex<()>>,
}

impl<'a> NameSlot<'a> {
    fn acquire(in_flight: &'a InFlight, name: &str) -> Self {
        let mut map = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let lock = map
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Self {
            in_flight,
            name: name.to_string(),
            lock,
        }
    }
}

impl Drop for NameSlot<'_> {
    fn drop(&mut self) {
        let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        // The map and this slot are the only holders: nobody is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            map.remove(&self.name);
        }
    }
}

pub struct Reconciler {
    api: ApiClient,
    dry_run: bool,
    /// One lock per job name currently being reconciled.
    in_flight: InFlight,
}

impl Reconciler {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            dry_run: false,
            in_flight: StdMutex::new(HashMap::new()),
        }
    }

    /// Decide from live state but skip every mutating call.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Normalize declarative parameters and apply them.
    pub async fn apply_params(&self, params: &JobParams) -> Result<ReconcileOutcome> {
        let request = normalize(params)?;
        self.apply(&request).await
    }

    pub async fn apply(&self, request: &JobRequest) -> Result<ReconcileOutcome> {
        let name = request.name();
        let slot = NameSlot::acquire(&self.in_flight, name);
        let _guard = slot.lock.lock().await;
        match request.operation {
            Operation::Toggle => self.toggle(name).await,
            Operation::Delete => self.remove(name).await,
            Operation::Upsert => self.upsert(&request.config).await,
        }
    }

    async fn toggle(&self, name: &str) -> Result<ReconcileOutcome> {
        if self.dry_run {
            let mut job = self.api.get_job(name).await?;
            job.disabled = !job.disabled;
            tracing::info!(job = %name, disabled = job.disabled, "Would toggle job");
            return Ok(ReconcileOutcome::new(Action::Toggled, Some(job), true));
        }

        let job = self.api.toggle_job(name).await?;
        tracing::info!(job = %name, disabled = job.disabled, "Toggled job");
        Ok(ReconcileOutcome::new(Action::Toggled, Some(job), false))
    }

    async fn remove(&self, name: &str) -> Result<ReconcileOutcome> {
        let Some(current) = self.api.find_job(name).await? else {
            tracing::debug!(job = %name, "Job already absent");
            return Ok(ReconcileOutcome::new(Action::Unchanged, None, self.dry_run));
        };

        if self.dry_run {
            tracing::info!(job = %name, "Would delete job");
            return Ok(ReconcileOutcome::new(Action::Deleted, Some(current), true));
        }

        let deleted = self.api.delete_job(name).await?;
        tracing::info!(job = %name, "Deleted job");
        Ok(ReconcileOutcome::new(Action::Deleted, Some(deleted), false))
    }

    async fn upsert(&self, desired: &JobConfig) -> Result<ReconcileOutcome> {
        let name = desired.name.as_str();
        let existing = self.api.find_job(name).await?;

        match existing {
            Some(current) if !desired.overwrite => {
                tracing::debug!(job = %name, "Job exists and overwrite is off");
                Ok(ReconcileOutcome::new(
                    Action::Unchanged,
                    Some(current),
                    self.dry_run,
                ))
            }
            Some(_) => {
                if self.dry_run {
                    tracing::info!(job = %name, "Would update job");
                    return Ok(ReconcileOutcome::new(
                        Action::Updated,
                        Some(desired.clone()),
                        true,
                    ));
                }
                let updated = self.api.upsert_job(desired).await?;
                tracing::info!(job = %name, "Updated job");
                Ok(ReconcileOutcome::new(Action::Updated, Some(updated), false))
            }
            None => {
                if self.dry_run {
                    tracing::info!(job = %name, "Would create job");
                    return Ok(ReconcileOutcome::new(
                        Action::Created,
                        Some(desired.clone()),
                        true,
                    ));
                }
                let created = self.api.upsert_job(desired).await?;
                tracing::info!(job = %name, "Created job");

                let mut outcome = ReconcileOutcome::new(Action::Created, Some(created), false);
                if desired.run_on_create {
                    match self.api.trigger_job(name).await {
                        Ok(_) => {
                            tracing::info!(job = %name, "Triggered job after create");
                            outcome.triggered = true;
                        }
                        Err(e) => {
                            tracing::warn!(job = %name, error = %e, "Trigger after create failed");
                            outcome.trigger_error = Some(e.to_string());
                        }
                    }
                }
                Ok(outcome)
            }
        }
    }
}
