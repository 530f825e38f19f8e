pub mod model;
pub mod normalize;
pub mod spec;

pub use model::{Concurrency, JobConfig, JobHistoryEntry, Member};
pub use normalize::{normalize, JobParams, JobRequest, JobState, Operation};
pub use spec::{
    ExecutorSpec, FileProcessor, ForwardProcessor, HttpExecutor, HttpMethod, ProcessorSpec,
    ShellExecutor,
};
