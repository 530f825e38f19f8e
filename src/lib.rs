pub mod aggregate;
pub mod api;
pub mod config;
pub mod error;
pub mod job;
pub mod reconcile;
pub mod shutdown;
pub mod tls;
pub mod transport;

pub use aggregate::{Aggregator, ClusterInfo, ClusterReport, ClusterScope, JobInfo, JobInfoReport};
pub use api::ApiClient;
pub use config::{ClientConfig, ClusterEndpoint, Credentials, PartialFailurePolicy, TlsConfig};
pub use error::{DkronError, Result, TransportError};
pub use reconcile::{Action, ReconcileOutcome, Reconciler};
