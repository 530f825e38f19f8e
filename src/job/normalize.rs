use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DkronError, Result};
use crate::job::model::{Concurrency, JobConfig};
use crate::job::spec::{
    ExecutorSpec, FileProcessor, ForwardProcessor, HttpExecutor, ProcessorSpec, ShellExecutor,
};

/// Requested end state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Present,
    Absent,
}

impl FromStr for JobState {
    type Err = DkronError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "present" => Ok(JobState::Present),
            "absent" => Ok(JobState::Absent),
            other => Err(DkronError::validation(format!(
                "unknown state '{}', expected 'present' or 'absent'",
                other
            ))),
        }
    }
}

/// Declarative description of a job as supplied by the caller.
///
/// Deserializes from a flat JSON document; missing fields take the
/// documented defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobParams {
    #[serde(alias = "name")]
    pub job_name: String,
    #[serde(alias = "displayname")]
    pub display_name: Option<String>,
    pub schedule: Option<String>,
    pub timezone: String,
    pub owner: Option<String>,
    pub owner_email: Option<String>,
    pub disabled: bool,
    pub tags: Option<BTreeMap<String, String>>,
    pub metadata: Option<BTreeMap<String, String>>,
    pub retries: u32,
    pub parent_job: Option<String>,
    pub run_on_create: bool,
    pub file_processor: Option<FileProcessor>,
    pub log_processor: Option<ForwardProcessor>,
    pub syslog_processor: Option<ForwardProcessor>,
    /// `true` maps to `allow`, `false` to `forbid`.
    pub concurrency: bool,
    pub shell_executor: Option<ShellExecutor>,
    pub http_executor: Option<HttpExecutor>,
    pub overwrite: bool,
    pub toggle: bool,
    pub state: JobState,
}

impl Default for JobParams {
    fn default() -> Self {
        Self {
            job_name: String::new(),
            display_name: None,
            schedule: None,
            timezone: "UTC".to_string(),
            owner: None,
            owner_email: None,
            disabled: false,
            tags: None,
            metadata: None,
            retries: 0,
            parent_job: None,
            run_on_create: false,
            file_processor: None,
            log_processor: None,
            syslog_processor: None,
            concurrency: true,
            shell_executor: None,
            http_executor: None,
            overwrite: true,
            toggle: false,
            state: JobState::Present,
        }
    }
}

impl JobParams {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            ..Default::default()
        }
    }

    /// The mutating operation these parameters ask for. Toggle wins over state.
    pub fn operation(&self) -> Operation {
        if self.toggle {
            Operation::Toggle
        } else if self.state == JobState::Absent {
            Operation::Delete
        } else {
            Operation::Upsert
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upsert,
    Delete,
    Toggle,
}

/// Normalized desired state handed to the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub operation: Operation,
    pub config: JobConfig,
}

impl JobRequest {
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// The value as given, or `None` when it is missing or whitespace only.
fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

fn non_empty(map: &Option<BTreeMap<String, String>>) -> Option<BTreeMap<String, String>> {
    map.as_ref().filter(|m| !m.is_empty()).cloned()
}

fn executor_spec(params: &JobParams) -> Result<Option<ExecutorSpec>> {
    match (&params.shell_executor, &params.http_executor) {
        (Some(_), Some(_)) => Err(DkronError::validation(
            "shell_executor and http_executor are mutually exclusive",
        )),
        (Some(shell), None) => {
            if shell.command.trim().is_empty() {
                return Err(DkronError::validation("shell_executor requires a command"));
            }
            Ok(Some(ExecutorSpec::Shell(shell.clone())))
        }
        (None, Some(http)) => {
            if http.url.trim().is_empty() {
                return Err(DkronError::validation("http_executor requires a url"));
            }
            Ok(Some(ExecutorSpec::Http(http.clone())))
        }
        (None, None) => Ok(None),
    }
}

/// Build the canonical job configuration from declarative parameters.
///
/// Nothing here touches the network; every rejection is a
/// [`DkronError::Validation`].
pub fn normalize(params: &JobParams) -> Result<JobRequest> {
    let name = params.job_name.trim();
    if name.is_empty() {
        return Err(DkronError::validation("job_name must not be empty"));
    }

    let operation = params.operation();
    let executor = executor_spec(params)?;
    let schedule = non_blank(&params.schedule);

    if operation == Operation::Upsert {
        if schedule.is_none() {
            return Err(DkronError::validation(
                "schedule is required unless toggle is set",
            ));
        }
        if executor.is_none() {
            return Err(DkronError::validation(
                "one of shell_executor or http_executor is required",
            ));
        }
    }

    let processors = ProcessorSpec {
        file: params.file_processor.clone(),
        log: params.log_processor.clone(),
        syslog: params.syslog_processor.clone(),
    };

    let config = JobConfig {
        name: name.to_string(),
        display_name: non_blank(&params.display_name),
        schedule,
        timezone: Some(params.timezone.trim())
            .filter(|tz| !tz.is_empty())
            .map(str::to_string),
        owner: non_blank(&params.owner),
        owner_email: non_blank(&params.owner_email),
        disabled: params.disabled,
        tags: non_empty(&params.tags),
        metadata: non_empty(&params.metadata),
        retries: params.retries,
        parent_job: non_blank(&params.parent_job),
        concurrency: Some(Concurrency::from(params.concurrency)),
        processors: processors.to_config().map(|rendered| {
            rendered
                .into_iter()
                .map(|(name, cfg)| {
                    let cfg = cfg.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
                    (name, cfg)
                })
                .collect()
        }),
        executor: executor.as_ref().map(|e| e.kind().to_string()),
        executor_config: executor.as_ref().map(ExecutorSpec::to_config),
        run_on_create: params.run_on_create,
        overwrite: params.overwrite,
        extra: BTreeMap::new(),
    };

    Ok(JobRequest { operation, config })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::spec::HttpMethod;

    fn shell_params(name: &str) -> JobParams {
        JobParams {
            schedule: Some("0 */10 * * * *".to_string()),
            shell_executor: Some(ShellExecutor::new("/bin/true")),
            ..JobParams::new(name)
        }
    }

    #[test]
    fn params_default() {
        let params = JobParams::default();
        assert_eq!(params.timezone, "UTC");
        assert!(!params.disabled);
        assert!(params.concurrency);
        assert_eq!(params.retries, 0);
        assert!(!params.run_on_create);
        assert!(params.overwrite);
        assert!(!params.toggle);
        assert_eq!(params.state, JobState::Present);
    }

    #[test]
    fn params_from_json_take_defaults() {
        let params: JobParams = serde_json::from_str(
            r#"{"name": "mytestjob1", "schedule": "@every 1m",
                "shell_executor": {"command": "/bin/true"}}"#,
        )
        .unwrap();
        assert_eq!(params.job_name, "mytestjob1");
        assert!(params.overwrite);
        assert_eq!(params.timezone, "UTC");
    }

    #[test]
    fn normalize_minimal_shell_job() {
        let request = normalize(&shell_params("mytestjob1")).unwrap();
        let cfg = &request.config;

        assert_eq!(request.operation, Operation::Upsert);
        assert_eq!(cfg.name, "mytestjob1");
        assert_eq!(cfg.schedule.as_deref(), Some("0 */10 * * * *"));
        assert_eq!(cfg.concurrency, Some(Concurrency::Allow));
        assert_eq!(cfg.executor.as_deref(), Some("shell"));
        assert_eq!(
            cfg.executor_config,
            Some(BTreeMap::from([(
                "command".to_string(),
                "/bin/true".to_string()
            )]))
        );
        assert_eq!(cfg.timezone.as_deref(), Some("UTC"));
        assert!(cfg.processors.is_none());
        assert!(cfg.owner.is_none());
        assert!(cfg.tags.is_none());
    }

    #[test]
    fn normalize_omits_absent_fields_on_the_wire() {
        let request = normalize(&shell_params("job")).unwrap();
        let value = serde_json::to_value(&request.config).unwrap();
        let obj = value.as_object().unwrap();

        assert!(!obj.contains_key("owner"));
        assert!(!obj.contains_key("parent_job"));
        assert!(!obj.contains_key("processors"));
        assert!(!obj.contains_key("displayname"));
        assert_eq!(obj["concurrency"], "allow");
    }

    #[test]
    fn normalize_copies_simple_fields() {
        let params = JobParams {
            display_name: Some("my_alt_job_name_1".to_string()),
            owner: Some("John Smith".to_string()),
            owner_email: Some("jsmith@example.com".to_string()),
            tags: Some(BTreeMap::from([(
                "my_defined_region".to_string(),
                "eu1".to_string(),
            )])),
            retries: 3,
            parent_job: Some("parent".to_string()),
            disabled: true,
            concurrency: false,
            ..shell_params("mytestjob1")
        };

        let cfg = normalize(&params).unwrap().config;
        assert_eq!(cfg.display_name.as_deref(), Some("my_alt_job_name_1"));
        assert_eq!(cfg.owner.as_deref(), Some("John Smith"));
        assert_eq!(cfg.owner_email.as_deref(), Some("jsmith@example.com"));
        assert_eq!(cfg.tags.unwrap()["my_defined_region"], "eu1");
        assert_eq!(cfg.retries, 3);
        assert_eq!(cfg.parent_job.as_deref(), Some("parent"));
        assert!(cfg.disabled);
        assert_eq!(cfg.concurrency, Some(Concurrency::Forbid));
    }

    #[test]
    fn normalize_assembles_processors() {
        let params = JobParams {
            log_processor: Some(ForwardProcessor { forward: true }),
            ..shell_params("job")
        };

        let processors = normalize(&params).unwrap().config.processors.unwrap();
        assert_eq!(processors.len(), 1);
        assert_eq!(processors["log"]["forward"], "true");
    }

    #[test]
    fn normalize_http_job() {
        let params = JobParams {
            shell_executor: None,
            http_executor: Some(HttpExecutor::new(HttpMethod::Get, "http://example.com")),
            ..shell_params("job")
        };

        let cfg = normalize(&params).unwrap().config;
        assert_eq!(cfg.executor.as_deref(), Some("http"));
        assert_eq!(cfg.executor_config.unwrap()["url"], "http://example.com");
    }

    #[test]
    fn normalize_rejects_both_executors() {
        let params = JobParams {
            http_executor: Some(HttpExecutor::new(HttpMethod::Get, "http://example.com")),
            ..shell_params("job")
        };
        assert!(matches!(
            normalize(&params),
            Err(DkronError::Validation(_))
        ));
    }

    #[test]
    fn normalize_rejects_missing_executor() {
        let params = JobParams {
            shell_executor: None,
            ..shell_params("job")
        };
        assert!(matches!(
            normalize(&params),
            Err(DkronError::Validation(_))
        ));
    }

    #[test]
    fn normalize_rejects_missing_schedule() {
        let params = JobParams {
            schedule: None,
            ..shell_params("job")
        };
        assert!(matches!(
            normalize(&params),
            Err(DkronError::Validation(_))
        ));

        let blank = JobParams {
            schedule: Some("  ".to_string()),
            ..shell_params("job")
        };
        assert!(matches!(normalize(&blank), Err(DkronError::Validation(_))));
    }

    #[test]
    fn normalize_rejects_blank_name() {
        assert!(matches!(
            normalize(&shell_params(" ")),
            Err(DkronError::Validation(_))
        ));
    }

    #[test]
    fn toggle_only_needs_a_name() {
        let params = JobParams {
            toggle: true,
            ..JobParams::new("mytestjob1")
        };
        let request = normalize(&params).unwrap();
        assert_eq!(request.operation, Operation::Toggle);
        assert_eq!(request.name(), "mytestjob1");
    }

    #[test]
    fn toggle_wins_over_absent() {
        let params = JobParams {
            toggle: true,
            state: JobState::Absent,
            ..JobParams::new("job")
        };
        assert_eq!(normalize(&params).unwrap().operation, Operation::Toggle);
    }

    #[test]
    fn delete_only_needs_a_name() {
        let params = JobParams {
            state: JobState::Absent,
            ..JobParams::new("job")
        };
        assert_eq!(normalize(&params).unwrap().operation, Operation::Delete);
    }

    #[test]
    fn both_executors_rejected_even_for_delete() {
        let params = JobParams {
            state: JobState::Absent,
            http_executor: Some(HttpExecutor::new(HttpMethod::Get, "http://example.com")),
            ..shell_params("job")
        };
        assert!(matches!(
            normalize(&params),
            Err(DkronError::Validation(_))
        ));
    }

    #[test]
    fn transient_flags_carried_on_config() {
        let params = JobParams {
            run_on_create: true,
            overwrite: false,
            ..shell_params("job")
        };
        let cfg = normalize(&params).unwrap().config;
        assert!(cfg.run_on_create);
        assert!(!cfg.overwrite);
    }

    #[test]
    fn normalize_copies_scalars_verbatim() {
        let params = JobParams {
            owner: Some(" John ".to_string()),
            display_name: Some("Nightly backup ".to_string()),
            owner_email: Some("   ".to_string()),
            ..shell_params("job")
        };
        let cfg = normalize(&params).unwrap().config;
        assert_eq!(cfg.owner.as_deref(), Some(" John "));
        assert_eq!(cfg.display_name.as_deref(), Some("Nightly backup "));
        assert!(cfg.owner_email.is_none());
    }

    #[test]
    fn job_state_from_str() {
        assert_eq!("present".parse::<JobState>().unwrap(), JobState::Present);
        assert_eq!("absent".parse::<JobState>().unwrap(), JobState::Absent);
        assert!("gone".parse::<JobState>().is_err());
    }
}
