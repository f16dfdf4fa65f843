use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};

use crate::batch::BatchManager;
use crate::error::JobExecutionError;
use crate::monitor::{Monitor, ResourceNode};
use crate::scheduler::{JobRepository, JobSpec, JobStatus};

#[derive(Debug)]
struct RunningJob {
    node_id: String,
    kill_tx: Option<oneshot::Sender<()>>,
}

/// Launches each job's `instance` as a child process.
///
/// The process gets the job and node identity through environment variables
/// and the job input as JSON on stdin:
/// - `RESMGR_JOB_ID`, `RESMGR_JOB_NAME`
/// - `RESMGR_NODE_ID`, `RESMGR_NODE_ADDRESS`
///
/// Dispatch succeeds as soon as the process is spawned. When it exits, the
/// job is marked `COMPLETE` (or `KILLED`) and its load is released through
/// the monitor.
#[derive(Clone)]
pub struct ProcessBatchManager {
    monitor: Arc<dyn Monitor>,
    repo: Arc<JobRepository>,
    running: Arc<Mutex<HashMap<String, RunningJob>>>,
}

impl ProcessBatchManager {
    pub fn new(monitor: Arc<dyn Monitor>, repo: Arc<JobRepository>) -> Self {
        Self {
            monitor,
            repo,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn command(spec: &JobSpec, node: &ResourceNode) -> Command {
        let mut cmd = Command::new(&spec.job.instance);
        cmd.env("RESMGR_JOB_ID", &spec.job.id)
            .env("RESMGR_JOB_NAME", &spec.job.name)
            .env("RESMGR_NODE_ID", &node.id)
            .env("RESMGR_NODE_ADDRESS", &node.address)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Wait for the job to exit or be killed, then record the result.
    async fn supervise(
        self,
        mut child: Child,
        spec: JobSpec,
        node: ResourceNode,
        kill_rx: oneshot::Receiver<()>,
    ) {
        let job_id = spec.job.id.clone();

        // A job that never reads stdin must still be killable, so the input
        // is fed from its own task. The write fails once the process is gone.
        if let Some(mut stdin) = child.stdin.take() {
            let input = spec.input.to_string();
            let writer_job_id = job_id.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    tracing::debug!(job_id = %writer_job_id, error = %e, "Job did not read its input");
                }
            });
        }

        let (status, exit_code) = tokio::select! {
            result = child.wait() => (JobStatus::Complete, Self::exit_code(&job_id, result)),
            Ok(()) = kill_rx => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to kill job process");
                }
                (JobStatus::Killed, None)
            }
        };

        tracing::info!(
            job_id = %job_id,
            node_id = %node.id,
            status = %status,
            exit_code = ?exit_code,
            "Job finished"
        );

        self.repo.record_exit(&job_id, status, exit_code).await;
        self.running.lock().await.remove(&job_id);
        if let Err(e) = self.monitor.reduce_load(&node, spec.job.load_value).await {
            tracing::warn!(
                job_id = %job_id,
                node_id = %node.id,
                error = %e,
                "Failed to release load after job exit"
            );
        }
    }

    fn exit_code(job_id: &str, result: std::io::Result<ExitStatus>) -> Option<i32> {
        match result {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::error!(job_id, error = %e, "Failed waiting on job process");
                None
            }
        }
    }
}

#[async_trait]
impl BatchManager for ProcessBatchManager {
    async fn execute_remotely(&self, spec: &JobSpec, node: &ResourceNode) -> Result<(), JobExecutionError> {
        tracing::info!(
            job_id = %spec.job.id,
            node_id = %node.id,
            instance = %spec.job.instance,
            "Launching job"
        );

        let child = Self::command(spec, node)
            .spawn()
            .map_err(|source| JobExecutionError::Spawn {
                job_id: spec.job.id.clone(),
                node_id: node.id.clone(),
                source,
            })?;

        let (kill_tx, kill_rx) = oneshot::channel();
        self.running.lock().await.insert(
            spec.job.id.clone(),
            RunningJob {
                node_id: node.id.clone(),
                kill_tx: Some(kill_tx),
            },
        );
        self.repo.update_status(&spec.job.id, JobStatus::Executed).await;

        tokio::spawn(
            self.clone()
                .supervise(child, spec.clone(), node.clone(), kill_rx),
        );
        Ok(())
    }

    async fn kill_job(&self, job_id: &str, node: &ResourceNode) -> bool {
        let mut running = self.running.lock().await;
        let Some(job) = running.get_mut(job_id) else {
            return false;
        };
        if job.node_id != node.id {
            tracing::warn!(job_id, node_id = %node.id, running_on = %job.node_id, "Job is not running on this node");
            return false;
        }
        match job.kill_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    async fn execution_node(&self, job_id: &str) -> Option<String> {
        self.running
            .lock()
            .await
            .get(job_id)
            .map(|job| job.node_id.clone())
    }

    async fn jobs_on_node(&self, node_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .running
            .lock()
            .await
            .iter()
            .filter(|(_, job)| job.node_id == node_id)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
