//! Typed bindings for the cluster's `/v1` REST API.

use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::config::{ClientConfig, ClusterEndpoint};
use crate::error::{DkronError, Result};
use crate::job::{JobConfig, JobHistoryEntry, Member};
use crate::transport::{HttpRequest, ReqwestTransport, Transport};

// Characters that would change the meaning of a single path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Deserialize)]
struct JobName {
    name: String,
}

/// Stateless client for one cluster endpoint. Cloning shares the transport.
#[derive(Clone)]
pub struct ApiClient {
    root_url: String,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("root_url", &self.root_url)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(endpoint: &ClusterEndpoint, transport: Arc<dyn Transport>) -> Self {
        Self {
            root_url: endpoint.root_url(),
            transport,
        }
    }

    /// Build a client backed by the default `reqwest` transport.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::connect(config).await?;
        Ok(Self::new(&config.endpoint, Arc::new(transport)))
    }

    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    /// Cluster health payload, or `None` when the cluster sends nothing.
    pub async fn get_status(&self) -> Result<Option<Value>> {
        let body = self.call(Method::GET, "/", None).await?;
        decode_optional(&body, "cluster status")
    }

    pub async fn get_leader(&self) -> Result<Option<Member>> {
        let body = self.call(Method::GET, "/leader", None).await?;
        decode_optional(&body, "leader")
    }

    /// Addresses of all cluster members.
    pub async fn get_members(&self) -> Result<Option<Vec<String>>> {
        let body = self.call(Method::GET, "/members", None).await?;
        let members: Option<Vec<Member>> = decode_optional(&body, "member list")?;
        Ok(members.map(|m| m.into_iter().map(|member| member.addr).collect()))
    }

    /// Names of all jobs defined on the cluster.
    pub async fn get_jobs(&self) -> Result<Option<Vec<String>>> {
        let body = self.call(Method::GET, "/jobs", None).await?;
        let jobs: Option<Vec<JobName>> = decode_optional(&body, "job list")?;
        Ok(jobs.map(|j| j.into_iter().map(|job| job.name).collect()))
    }

    pub async fn get_job(&self, name: &str) -> Result<JobConfig> {
        let body = self.call(Method::GET, &job_path(name, ""), None).await?;
        decode(&body, "job configuration")
    }

    /// Like [`get_job`](Self::get_job), but a 404 means the job does not exist.
    pub async fn find_job(&self, name: &str) -> Result<Option<JobConfig>> {
        match self.get_job(name).await {
            Ok(job) => Ok(Some(job)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_job_history(&self, name: &str) -> Result<Vec<JobHistoryEntry>> {
        let body = self
            .call(Method::GET, &job_path(name, "/executions"), None)
            .await?;
        let history: Option<Vec<JobHistoryEntry>> = decode_optional(&body, "execution history")?;
        Ok(history.unwrap_or_default())
    }

    /// Create the job or replace its configuration.
    pub async fn upsert_job(&self, config: &JobConfig) -> Result<JobConfig> {
        let payload = serde_json::to_vec(config).map_err(|source| DkronError::Decode {
            context: "job configuration for upload".to_string(),
            source,
        })?;
        let body = self.call(Method::POST, "/jobs", Some(payload)).await?;
        decode(&body, "upserted job")
    }

    pub async fn delete_job(&self, name: &str) -> Result<JobConfig> {
        let body = self
            .call(Method::DELETE, &job_path(name, ""), None)
            .await?;
        decode(&body, "deleted job")
    }

    /// Start one execution now. Returns whatever the cluster acknowledges with.
    pub async fn trigger_job(&self, name: &str) -> Result<Option<Value>> {
        let body = self.call(Method::POST, &job_path(name, ""), None).await?;
        decode_optional(&body, "trigger acknowledgment")
    }

    /// Flip the job's `disabled` flag.
    pub async fn toggle_job(&self, name: &str) -> Result<JobConfig> {
        let body = self
            .call(Method::POST, &job_path(name, "/toggle"), None)
            .await?;
        decode(&body, "toggled job")
    }

    async fn call(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let url = format!("{}{}", self.root_url, path);
        tracing::debug!(method = %method, url = %url, "Sending request");

        let mut request =
            HttpRequest::new(method.clone(), url).header("Content-Type", "application/json");
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = self.transport.request(request).await?;
        if !response.is_success() {
            let message = error_message(response.status, &response.body);
            tracing::debug!(
                method = %method,
                path,
                status = response.status,
                message = %message,
                "Cluster rejected request"
            );
            return Err(DkronError::Api {
                status: response.status,
                message,
            });
        }

        Ok(response.body)
    }
}

fn job_path(name: &str, suffix: &str) -> String {
    format!("/jobs/{}{}", utf8_percent_encode(name, SEGMENT), suffix)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Decode a body that may legitimately be empty. Blank bodies, `null` and
/// `""` all mean "absent".
fn decode_optional<T: DeserializeOwned>(body: &[u8], context: &str) -> Result<Option<T>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let decode_err = |source| DkronError::Decode {
        context: context.to_string(),
        source,
    };

    let value: Value = serde_json::from_slice(body).map_err(decode_err)?;
    if is_blank(&value) {
        return Ok(None);
    }
    serde_json::from_value(value).map(Some).map_err(decode_err)
}

fn decode<T: DeserializeOwned>(body: &[u8], context: &str) -> Result<T> {
    serde_json::from_slice(body).map_err(|source| DkronError::Decode {
        context: context.to_string(),
        source,
    })
}

/// Extract the cluster's own error text from a failed response.
fn error_message(status: u16, body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("unknown error")
            .to_string();
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::String(s)) => s,
        Ok(Value::Object(obj)) => obj
            .get("error")
            .or_else(|| obj.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| trimmed.to_string()),
        _ => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::HttpResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replies with a fixed response and remembers every request.
    struct CannedTransport {
        status: u16,
        body: Vec<u8>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl CannedTransport {
        fn new(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                status,
                body: body.as_bytes().to_vec(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn last(&self) -> HttpRequest {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn request(
            &self,
            request: HttpRequest,
        ) -> std::result::Result<HttpResponse, TransportError> {
            self.seen.lock().unwrap().push(request);
            Ok(HttpResponse {
                status: self.status,
                body: self.body.clone(),
            })
        }
    }

    struct RefusingTransport;

    #[async_trait]
    impl Transport for RefusingTransport {
        async fn request(
            &self,
            _request: HttpRequest,
        ) -> std::result::Result<HttpResponse, TransportError> {
            Err(TransportError::Connect("connection refused".to_string()))
        }
    }

    fn client(transport: Arc<dyn Transport>) -> ApiClient {
        ApiClient::new(&ClusterEndpoint::new("10.0.0.1", 8080, false), transport)
    }

    #[tokio::test]
    async fn every_call_sends_json_content_type() {
        let transport = CannedTransport::new(200, "[]");
        let api = client(transport.clone());

        api.get_jobs().await.unwrap();

        let req = transport.last();
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.url, "http://10.0.0.1:8080/v1/jobs");
        assert!(req
            .headers
            .iter()
            .any(|(k, v)| k == "Content-Type" && v == "application/json"));
    }

    #[tokio::test]
    async fn job_paths_are_built_per_operation() {
        let transport = CannedTransport::new(200, r#"{"name": "job a"}"#);
        let api = client(transport.clone());

        api.toggle_job("job a").await.unwrap();
        let req = transport.last();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.url, "http://10.0.0.1:8080/v1/jobs/job%20a/toggle");

        api.delete_job("job a").await.unwrap();
        assert_eq!(transport.last().method, Method::DELETE);

        api.get_job("nested/name").await.unwrap();
        assert_eq!(
            transport.last().url,
            "http://10.0.0.1:8080/v1/jobs/nested%2Fname"
        );
    }

    #[tokio::test]
    async fn upsert_posts_the_config() {
        let transport = CannedTransport::new(201, r#"{"name": "job"}"#);
        let api = client(transport.clone());

        let created = api.upsert_job(&JobConfig::new("job")).await.unwrap();
        assert_eq!(created.name, "job");

        let req = transport.last();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.url, "http://10.0.0.1:8080/v1/jobs");
        let sent: Value = serde_json::from_slice(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(sent["name"], "job");
    }

    #[tokio::test]
    async fn blank_body_is_absent() {
        for body in ["", "  ", "\"\"", "null"] {
            let api = client(CannedTransport::new(200, body));
            assert!(api.get_status().await.unwrap().is_none(), "body {:?}", body);
        }
    }

    #[tokio::test]
    async fn members_are_reduced_to_addresses() {
        let api = client(CannedTransport::new(
            200,
            r#"[{"Name":"a","Addr":"10.0.0.1"},{"Name":"b","Addr":"10.0.0.2"}]"#,
        ));
        assert_eq!(
            api.get_members().await.unwrap(),
            Some(vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()])
        );
    }

    #[tokio::test]
    async fn non_success_status_is_api_error() {
        let api = client(CannedTransport::new(500, r#"{"error": "raft: not leader"}"#));
        match api.get_status().await {
            Err(DkronError::Api { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "raft: not leader");
            }
            other => panic!("expected api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn find_job_maps_404_to_absent() {
        let api = client(CannedTransport::new(404, "job not found"));
        assert!(api.find_job("ghost").await.unwrap().is_none());

        let api = client(CannedTransport::new(503, ""));
        assert!(api.find_job("ghost").await.is_err());
    }

    #[tokio::test]
    async fn transport_failure_is_not_an_api_error() {
        let api = client(Arc::new(RefusingTransport));
        let err = api.get_leader().await.unwrap_err();
        assert!(matches!(
            err,
            DkronError::Transport(TransportError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let api = client(CannedTransport::new(200, "{not json"));
        assert!(matches!(
            api.get_job("job").await,
            Err(DkronError::Decode { .. })
        ));
    }

    #[test]
    fn error_message_variants() {
        assert_eq!(error_message(404, br#""job not found""#), "job not found");
        assert_eq!(
            error_message(400, br#"{"message": "invalid schedule"}"#),
            "invalid schedule"
        );
        assert_eq!(error_message(502, b"bad gateway\n"), "bad gateway");
        assert_eq!(error_message(503, b""), "Service Unavailable");
        assert_eq!(
            error_message(500, &serde_json::to_vec(&json!({"code": 1})).unwrap()),
            r#"{"code":1}"#
        );
    }
}
