use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use dkron_ctl::aggregate::{Aggregator, ClusterReport, ClusterScope, JobInfoReport};
use dkron_ctl::api::ApiClient;
use dkron_ctl::config::{
    ClientConfig, ClusterEndpoint, Credentials, PartialFailurePolicy, TlsConfig, DEFAULT_PORT,
};
use dkron_ctl::job::{JobParams, JobState};
use dkron_ctl::reconcile::{ReconcileOutcome, Reconciler};
use dkron_ctl::shutdown::install_shutdown_handler;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "dkron-ctl")]
#[command(version)]
#[command(about = "Reconcile and inspect jobs on a Dkron cluster")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Cluster inspection commands
    Cluster {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: ClusterCommands,
    },
}

// =============================================================================
// Client Arguments (shared by job and cluster commands)
// =============================================================================

#[derive(clap::Args, Debug)]
struct ClientArgs {
    /// IP or hostname of a node in the cluster
    #[arg(long, short = 'e', env = "DKRON_ENDPOINT", default_value = "localhost")]
    endpoint: String,

    /// Port of the cluster node's HTTP API
    #[arg(long, short = 'p', env = "DKRON_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Connect over HTTPS instead of HTTP
    #[arg(long, env = "DKRON_USE_SSL")]
    use_ssl: bool,

    /// Basic-auth username (cluster behind an authenticating proxy)
    #[arg(long, env = "DKRON_USERNAME")]
    username: Option<String>,

    /// Basic-auth password
    #[arg(long, env = "DKRON_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Extra CA certificate (PEM format) to trust
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Client certificate (PEM format) for mTLS
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// Client private key (PEM format) for mTLS
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Skip server certificate verification. NOT recommended for production.
    #[arg(long)]
    insecure: bool,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Maximum number of concurrent read requests
    #[arg(long, default_value = "4")]
    max_concurrent: usize,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

impl ClientArgs {
    fn to_config(&self) -> CliResult<ClientConfig> {
        let mut config = ClientConfig::new(ClusterEndpoint::new(
            self.endpoint.clone(),
            self.port,
            self.use_ssl,
        ))
        .with_tls(TlsConfig {
            ca_cert_path: self.ca_cert.clone(),
            cert_path: self.cert.clone(),
            key_path: self.key.clone(),
            accept_invalid_certs: self.insecure,
        })
        .with_timeout(Duration::from_secs(self.timeout_secs))
        .with_max_concurrent_requests(self.max_concurrent);

        if let Some(creds) =
            Credentials::from_parts(self.username.as_deref(), self.password.as_deref())?
        {
            config = config.with_credentials(creds);
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Create or update a job from a JSON job description
    Apply {
        /// Path to the job description (JSON)
        #[arg(long, short = 'f')]
        file: PathBuf,

        /// Report the decision without changing the cluster
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete a job if it exists
    Delete {
        name: String,

        #[arg(long)]
        dry_run: bool,
    },
    /// Enable a disabled job or disable an enabled one
    Toggle {
        name: String,

        #[arg(long)]
        dry_run: bool,
    },
    /// Start one execution of a job now
    Run { name: String },
    /// Show configuration and execution history
    Info {
        /// Job names (all jobs when omitted)
        names: Vec<String>,

        /// Keep only the first N history entries per job
        #[arg(long)]
        limit_history: Option<usize>,

        /// Abort on the first failed read instead of marking the job
        #[arg(long)]
        fail_fast: bool,

        /// Give up on outstanding reads after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
}

// =============================================================================
// Cluster Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum ClusterCommands {
    /// Show cluster status, leader, members and job names
    Info {
        /// all, status, leader, members, nodes or jobs
        #[arg(long, default_value = "all")]
        scope: ClusterScope,

        #[arg(long)]
        fail_fast: bool,

        #[arg(long)]
        deadline_secs: Option<u64>,
    },
}

// =============================================================================
// Helper Functions
// =============================================================================

fn print_json<T: Serialize>(value: &T) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn policy(fail_fast: bool) -> PartialFailurePolicy {
    if fail_fast {
        PartialFailurePolicy::FailFast
    } else {
        PartialFailurePolicy::BestEffort
    }
}

async fn load_params(path: &Path) -> CliResult<JobParams> {
    let raw = tokio::fs::read_to_string(path).await?;
    let params: JobParams = serde_json::from_str(&raw)
        .map_err(|e| format!("invalid job description {}: {}", path.display(), e))?;
    Ok(params)
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_reconcile(
    api: ApiClient,
    params: JobParams,
    dry_run: bool,
    output_format: &OutputFormat,
) -> CliResult<()> {
    let reconciler = Reconciler::new(api).with_dry_run(dry_run);
    let outcome = reconciler.apply_params(&params).await?;

    match output_format {
        OutputFormat::Json => print_json(&outcome)?,
        OutputFormat::Table => print_outcome(&params.job_name, &outcome),
    }
    Ok(())
}

fn print_outcome(name: &str, outcome: &ReconcileOutcome) {
    let prefix = if outcome.dry_run { "[dry-run] " } else { "" };
    println!("{}Job {}: {}", prefix, name, outcome.action);
    println!("Changed:  {}", outcome.changed);
    if let Some(ref job) = outcome.job {
        if let Some(ref schedule) = job.schedule {
            println!("Schedule: {}", schedule);
        }
        println!("Disabled: {}", job.disabled);
    }
    if outcome.triggered {
        println!("Triggered an execution after create");
    }
    if let Some(ref err) = outcome.trigger_error {
        eprintln!("Warning: trigger after create failed: {}", err);
    }
}

async fn handle_job_run(
    api: ApiClient,
    name: String,
    output_format: &OutputFormat,
) -> CliResult<()> {
    let ack = api.trigger_job(&name).await?;
    match output_format {
        OutputFormat::Json => print_json(&ack)?,
        OutputFormat::Table => println!("Triggered job {}", name),
    }
    Ok(())
}

async fn handle_job_info(
    aggregator: Aggregator,
    names: Vec<String>,
    limit_history: Option<usize>,
    output_format: &OutputFormat,
) -> CliResult<()> {
    let report = aggregator.job_info(&names, limit_history).await?;

    match output_format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_job_info(&report),
    }
    Ok(())
}

fn print_job_info(report: &JobInfoReport) {
    if report.jobs.is_empty() && report.abandoned.is_empty() {
        println!("No jobs found.");
        return;
    }

    for info in &report.jobs {
        println!("Job: {}", info.job_name);
        println!("{}", "=".repeat(60));
        if let Some(ref job) = info.configuration {
            println!("Schedule:  {}", job.schedule.as_deref().unwrap_or("-"));
            println!("Executor:  {}", job.executor.as_deref().unwrap_or("-"));
            println!("Disabled:  {}", job.disabled);
            if let Some(ref owner) = job.owner {
                println!("Owner:     {}", owner);
            }
        }
        if let Some(ref err) = info.error {
            println!("Error:     {}", err);
        }

        if info.history.is_empty() {
            println!("No executions recorded.");
        } else {
            println!();
            println!("{:<8} {:<32} {:<20} RESULT", "ATTEMPT", "STARTED", "NODE");
            println!("{}", "-".repeat(70));
            for entry in &info.history {
                let started = entry
                    .started_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                let result = if entry.success { "[+] success" } else { "[-] failed" };
                println!(
                    "{:<8} {:<32} {:<20} {}",
                    entry.attempt, started, entry.node_name, result
                );
            }
        }
        println!();
    }

    if !report.abandoned.is_empty() {
        println!("Abandoned: {}", report.abandoned.join(", "));
    }
}

async fn handle_cluster_info(
    aggregator: Aggregator,
    scope: ClusterScope,
    output_format: &OutputFormat,
) -> CliResult<()> {
    let report = aggregator.cluster_info(scope).await?;

    match output_format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_cluster_info(&report),
    }
    Ok(())
}

fn print_cluster_info(report: &ClusterReport) {
    let info = &report.info;
    println!("Cluster Info");
    println!("{}", "=".repeat(40));

    if let Some(ref leader) = info.leader {
        println!("Leader: {} ({})", leader.name, leader.addr);
    }
    if let Some(ref status) = info.status {
        println!("Status: {}", status);
    }
    if let Some(ref members) = info.members {
        println!();
        println!("Members:");
        for addr in members {
            println!("  {}", addr);
        }
    }
    if let Some(ref jobs) = info.jobs {
        println!();
        println!("Jobs ({}):", jobs.len());
        for name in jobs {
            println!("  {}", name);
        }
    }
    for (part, err) in &report.errors {
        eprintln!("Warning: failed to read {}: {}", part, err);
    }
    if !report.abandoned.is_empty() {
        eprintln!("Warning: abandoned {}", report.abandoned.join(", "));
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

async fn run(args: Args) -> CliResult<()> {
    match args.command {
        Commands::Job { client, command } => {
            let config = client.to_config()?;
            let api = ApiClient::connect(&config).await?;

            match command {
                JobCommands::Apply { file, dry_run } => {
                    let params = load_params(&file).await?;
                    handle_reconcile(api, params, dry_run, &client.output).await?;
                }
                JobCommands::Delete { name, dry_run } => {
                    let params = JobParams {
                        state: JobState::Absent,
                        ..JobParams::new(name)
                    };
                    handle_reconcile(api, params, dry_run, &client.output).await?;
                }
                JobCommands::Toggle { name, dry_run } => {
                    let params = JobParams {
                        toggle: true,
                        ..JobParams::new(name)
                    };
                    handle_reconcile(api, params, dry_run, &client.output).await?;
                }
                JobCommands::Run { name } => {
                    handle_job_run(api, name, &client.output).await?;
                }
                JobCommands::Info {
                    names,
                    limit_history,
                    fail_fast,
                    deadline_secs,
                } => {
                    let token = install_shutdown_handler(deadline_secs.map(Duration::from_secs));
                    let aggregator = Aggregator::new(api, &config)
                        .with_policy(policy(fail_fast))
                        .with_cancellation(token);
                    handle_job_info(aggregator, names, limit_history, &client.output).await?;
                }
            }
        }
        Commands::Cluster { client, command } => {
            let config = client.to_config()?;
            let api = ApiClient::connect(&config).await?;

            match command {
                ClusterCommands::Info {
                    scope,
                    fail_fast,
                    deadline_secs,
                } => {
                    let token = install_shutdown_handler(deadline_secs.map(Duration::from_secs));
                    let aggregator = Aggregator::new(api, &config)
                        .with_policy(policy(fail_fast))
                        .with_cancellation(token);
                    handle_cluster_info(aggregator, scope, &client.output).await?;
                }
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so JSON output on stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
