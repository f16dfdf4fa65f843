//! Job dispatch onto resource nodes.
//!
//! The scheduler only depends on the [`BatchManager`] trait: hand a job to a
//! node and report whether the hand-off worked. How the job reaches the node
//! is up to the implementation.
//!
//! # Components
//!
//! - [`BatchManager`]: dispatch contract plus kill and execution tracking
//! - [`ProcessBatchManager`]: launches each job as a local child process on
//!   behalf of the chosen node

pub mod process;

use async_trait::async_trait;

use crate::error::JobExecutionError;
use crate::monitor::ResourceNode;
use crate::scheduler::JobSpec;

pub use process::ProcessBatchManager;

#[async_trait]
pub trait BatchManager: Send + Sync {
    /// Dispatch `spec` for execution on `node`. Returns once the job has been
    /// handed off, not when it finishes.
    async fn execute_remotely(&self, spec: &JobSpec, node: &ResourceNode) -> Result<(), JobExecutionError>;

    /// Ask `node` to stop a running job. Returns false if the job is not
    /// running there.
    async fn kill_job(&self, job_id: &str, node: &ResourceNode) -> bool;

    /// Id of the node a job is currently executing on.
    async fn execution_node(&self, job_id: &str) -> Option<String>;

    /// Ids of the jobs executing on `node_id`, sorted.
    async fn jobs_on_node(&self, node_id: &str) -> Vec<String>;
}
