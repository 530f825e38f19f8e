//! Typed executor and processor inputs, rendered into the cluster's
//! string-map configuration format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const SHELL_EXECUTOR: &str = "shell";
pub const HTTP_EXECUTOR: &str = "http";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellExecutor {
    pub command: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

impl ShellExecutor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpExecutor {
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Request timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u32>,
    #[serde(default)]
    pub expect_code: Option<u16>,
    /// Expected response body; the cluster treats it as a regex.
    #[serde(default)]
    pub expect_body: Option<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_true")]
    pub tls_verify: bool,
    #[serde(default)]
    pub tls_cert: Option<String>,
    #[serde(default)]
    pub tls_key: Option<String>,
    #[serde(default)]
    pub tls_ca: Option<String>,
}

impl HttpExecutor {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
            expect_code: None,
            expect_body: None,
            debug: false,
            tls_verify: true,
            tls_cert: None,
            tls_key: None,
            tls_ca: None,
        }
    }
}

/// Exactly one way of running a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorSpec {
    Shell(ShellExecutor),
    Http(HttpExecutor),
}

impl ExecutorSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutorSpec::Shell(_) => SHELL_EXECUTOR,
            ExecutorSpec::Http(_) => HTTP_EXECUTOR,
        }
    }

    /// Render as the cluster's `executor_config` map. Unset values are left out.
    pub fn to_config(&self) -> BTreeMap<String, String> {
        let mut cfg = BTreeMap::new();
        match self {
            ExecutorSpec::Shell(shell) => {
                cfg.insert("command".to_string(), shell.command.clone());
                if !shell.env.is_empty() {
                    let env = shell
                        .env
                        .iter()
                        .map(|(k, v)| format!("{}={}", k, v))
                        .collect::<Vec<_>>()
                        .join(",");
                    cfg.insert("env".to_string(), env);
                }
                insert_opt(&mut cfg, "cwd", shell.cwd.as_deref());
            }
            ExecutorSpec::Http(http) => {
                cfg.insert("method".to_string(), http.method.as_str().to_string());
                cfg.insert("url".to_string(), http.url.clone());
                if !http.headers.is_empty() {
                    let headers: Vec<String> = http
                        .headers
                        .iter()
                        .map(|(k, v)| format!("{}: {}", k, v))
                        .collect();
                    cfg.insert(
                        "headers".to_string(),
                        serde_json::Value::from(headers).to_string(),
                    );
                }
                insert_opt(&mut cfg, "body", http.body.as_deref());
                if let Some(timeout) = http.timeout {
                    cfg.insert("timeout".to_string(), timeout.to_string());
                }
                if let Some(code) = http.expect_code {
                    cfg.insert("expectCode".to_string(), code.to_string());
                }
                insert_opt(&mut cfg, "expectBody", http.expect_body.as_deref());
                if http.debug {
                    cfg.insert("debug".to_string(), "true".to_string());
                }
                if !http.tls_verify {
                    cfg.insert("tlsNoVerifyPeer".to_string(), "true".to_string());
                }
                insert_opt(&mut cfg, "tlsCertificateFile", http.tls_cert.as_deref());
                insert_opt(&mut cfg, "tlsCertificateKeyFile", http.tls_key.as_deref());
                insert_opt(&mut cfg, "tlsRootCAsFile", http.tls_ca.as_deref());
            }
        }
        cfg
    }
}

fn insert_opt(cfg: &mut BTreeMap<String, String>, key: &str, value: Option<&str>) {
    if let Some(v) = value.filter(|v| !v.is_empty()) {
        cfg.insert(key.to_string(), v.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileProcessor {
    #[serde(default)]
    pub log_dir: Option<String>,
    #[serde(default)]
    pub forward: bool,
}

/// Log and syslog processors only decide whether output is forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ForwardProcessor {
    #[serde(default)]
    pub forward: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessorSpec {
    pub file: Option<FileProcessor>,
    pub log: Option<ForwardProcessor>,
    pub syslog: Option<ForwardProcessor>,
}

impl ProcessorSpec {
    pub fn is_empty(&self) -> bool {
        self.file.is_none() && self.log.is_none() && self.syslog.is_none()
    }

    /// Render as the cluster's `processors` map keyed by processor name, or
    /// `None` when no processor is configured.
    pub fn to_config(&self) -> Option<BTreeMap<String, BTreeMap<String, String>>> {
        if self.is_empty() {
            return None;
        }

        let mut processors = BTreeMap::new();
        if let Some(ref file) = self.file {
            let mut cfg = forward_config(file.forward);
            insert_opt(&mut cfg, "log_dir", file.log_dir.as_deref());
            processors.insert("files".to_string(), cfg);
        }
        if let Some(ref log) = self.log {
            processors.insert("log".to_string(), forward_config(log.forward));
        }
        if let Some(ref syslog) = self.syslog {
            processors.insert("syslog".to_string(), forward_config(syslog.forward));
        }
        Some(processors)
    }
}

fn forward_config(forward: bool) -> BTreeMap<String, String> {
    BTreeMap::from([("forward".to_string(), forward.to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_config_minimal() {
        let spec = ExecutorSpec::Shell(ShellExecutor::new("/bin/true"));
        let cfg = spec.to_config();
        assert_eq!(spec.kind(), "shell");
        assert_eq!(cfg.len(), 1);
        assert_eq!(cfg["command"], "/bin/true");
    }

    #[test]
    fn shell_config_joins_env() {
        let mut shell = ShellExecutor::new("echo $MY_FIRST_NAME");
        shell.env.insert("MY_FIRST_NAME".to_string(), "John".to_string());
        shell.env.insert("MY_LAST_NAME".to_string(), "Smith".to_string());
        shell.cwd = Some("/home/jsmith".to_string());

        let cfg = ExecutorSpec::Shell(shell).to_config();
        assert_eq!(cfg["env"], "MY_FIRST_NAME=John,MY_LAST_NAME=Smith");
        assert_eq!(cfg["cwd"], "/home/jsmith");
    }

    #[test]
    fn http_config_uses_cluster_keys() {
        let mut http = HttpExecutor::new(HttpMethod::Post, "https://example.com/hook");
        http.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        http.body = Some("{}".to_string());
        http.timeout = Some(30);
        http.expect_code = Some(200);
        http.tls_verify = false;
        http.tls_ca = Some("/etc/ca.pem".to_string());

        let spec = ExecutorSpec::Http(http);
        let cfg = spec.to_config();
        assert_eq!(spec.kind(), "http");
        assert_eq!(cfg["method"], "POST");
        assert_eq!(cfg["headers"], r#"["Content-Type: application/json"]"#);
        assert_eq!(cfg["timeout"], "30");
        assert_eq!(cfg["expectCode"], "200");
        assert_eq!(cfg["tlsNoVerifyPeer"], "true");
        assert_eq!(cfg["tlsRootCAsFile"], "/etc/ca.pem");
        assert!(!cfg.contains_key("debug"));
        assert!(!cfg.contains_key("expectBody"));
    }

    #[test]
    fn http_executor_verifies_tls_by_default() {
        let http: HttpExecutor =
            serde_json::from_str(r#"{"method": "GET", "url": "http://x"}"#).unwrap();
        assert!(http.tls_verify);
    }

    #[test]
    fn processors_absent_when_none_given() {
        assert!(ProcessorSpec::default().to_config().is_none());
    }

    #[test]
    fn processors_keyed_by_cluster_name() {
        let spec = ProcessorSpec {
            file: Some(FileProcessor {
                log_dir: Some("/var/log/dkron".to_string()),
                forward: true,
            }),
            log: None,
            syslog: Some(ForwardProcessor { forward: false }),
        };

        let processors = spec.to_config().unwrap();
        assert_eq!(processors.len(), 2);
        assert_eq!(processors["files"]["log_dir"], "/var/log/dkron");
        assert_eq!(processors["files"]["forward"], "true");
        assert_eq!(processors["syslog"]["forward"], "false");
        assert!(!processors.contains_key("log"));
    }
}
