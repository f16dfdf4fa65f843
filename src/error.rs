use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a [`Monitor`](crate::monitor::Monitor) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Node {node_id} cannot take load {requested}: only {available} of its capacity is free")]
    InsufficientCapacity {
        node_id: String,
        requested: u32,
        available: u32,
    },

    #[error("Monitor backing store unavailable: {0}")]
    Unavailable(String),

    #[error("Load feed error: {0}")]
    Feed(String),
}

/// Errors raised by a [`JobQueue`](crate::scheduler::queue::JobQueue).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobQueueError {
    /// The queue is at capacity. Callers should retry later.
    #[error("Job queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("Job queue is empty")]
    Empty,

    /// A new job reused the id of a job the repository already holds.
    #[error("Job {0} already exists")]
    Duplicate(String),

    #[error("Job repository error: {0}")]
    Repository(String),
}

/// Errors raised while dispatching a job through a batch manager.
#[derive(Error, Debug)]
pub enum JobExecutionError {
    #[error("Failed to launch job {job_id} on node {node_id}: {source}")]
    Spawn {
        job_id: String,
        node_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Node {0} is unavailable")]
    NodeUnavailable(String),

    #[error("Dispatch of job {job_id} timed out after {timeout_ms}ms")]
    Timeout { job_id: String, timeout_ms: u64 },
}

/// Errors raised by the LRU queue manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueManagerError {
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("Queue already exists: {0}")]
    QueueExists(String),
}

/// A failed scheduling attempt. Recovered by the run loop, never fatal.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("No node mapping for queue: {0}")]
    UnknownQueue(String),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Job queue error: {0}")]
    JobQueue(#[from] JobQueueError),
}

/// Problems found while loading node and queue mapping files. These are
/// logged and skipped, never propagated out of the loader.
#[derive(Error, Debug)]
pub enum MappingError {
    #[error("Invalid directory URI {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Top-level error returned by [`ResourceManager`](crate::manager::ResourceManager) operations.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    #[error("A job with id {0} already exists")]
    DuplicateJob(String),

    #[error("Job queue is full (capacity {0}), retry later")]
    QueueFull(usize),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Job queue error: {0}")]
    JobQueue(JobQueueError),

    #[error("Job execution error: {0}")]
    Execution(#[from] JobExecutionError),

    #[error("Queue manager error: {0}")]
    QueueManager(#[from] QueueManagerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JobQueueError> for ResourceError {
    fn from(err: JobQueueError) -> Self {
        match err {
            JobQueueError::Full { capacity } => ResourceError::QueueFull(capacity),
            JobQueueError::Duplicate(id) => ResourceError::DuplicateJob(id),
            other => ResourceError::JobQueue(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ResourceError>;
