use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::batch::BatchManager;
use crate::error::{JobExecutionError, MonitorError, SchedulerError};
use crate::monitor::{Monitor, ResourceNode};
use crate::scheduler::job::{JobSpec, JobStatus};
use crate::scheduler::queue::JobQueue;
use crate::scheduler::queue_manager::LruQueueManager;
use crate::scheduler::repository::JobRepository;

pub const DEFAULT_WAIT: Duration = Duration::from_secs(20);
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(60);

/// How a candidate node's load is compared with a job's load value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// Accept a node when `capacity - load >= job load`.
    #[default]
    RemainingCapacity,
    /// Accept a node when `job load <= load`, i.e. the committed load is
    /// compared directly with the job's requirement. This favours nodes that
    /// are already busy and is kept for deployments that depend on it.
    CommittedLoad,
}

impl SelectionPolicy {
    pub fn accepts(&self, node: &ResourceNode, load: u32, job_load: u32) -> bool {
        match self {
            SelectionPolicy::RemainingCapacity => node.capacity.saturating_sub(load) >= job_load,
            SelectionPolicy::CommittedLoad => job_load <= load,
        }
    }
}

impl std::fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionPolicy::RemainingCapacity => write!(f, "remaining-capacity"),
            SelectionPolicy::CommittedLoad => write!(f, "committed-load"),
        }
    }
}

impl std::str::FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remaining-capacity" => Ok(SelectionPolicy::RemainingCapacity),
            "committed-load" => Ok(SelectionPolicy::CommittedLoad),
            other => Err(format!(
                "unknown selection policy {}, expected remaining-capacity or committed-load",
                other
            )),
        }
    }
}

/// What happened to a job handed to [`LruScheduler::schedule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Load was committed and the batch manager accepted the job.
    Dispatched { node_id: String },
    /// No node in the job's queue could take it. The job was requeued.
    NoNodeAvailable,
    /// The batch manager rejected the job. Load was rolled back and the job
    /// requeued.
    DispatchFailed { node_id: String },
}

/// Least-recently-used scheduler.
///
/// Each tick takes one job off the job queue and scans the nodes of the job's
/// queue in order, picking the first one the [`SelectionPolicy`] accepts. The
/// chosen node moves to the tail of the queue's node list, so nodes take turns.
///
/// Node selection, load commit and rotation run under one lock, so two
/// scheduling attempts can never race for the same remaining capacity.
/// Dispatch happens after the lock is released.
pub struct LruScheduler {
    monitor: Arc<dyn Monitor>,
    batch_manager: Arc<dyn BatchManager>,
    job_queue: Arc<dyn JobQueue>,
    repo: Arc<JobRepository>,
    queues: Mutex<LruQueueManager>,
    policy: SelectionPolicy,
    wait: Duration,
    dispatch_timeout: Option<Duration>,
}

impl LruScheduler {
    pub fn new(
        monitor: Arc<dyn Monitor>,
        batch_manager: Arc<dyn BatchManager>,
        job_queue: Arc<dyn JobQueue>,
        queues: LruQueueManager,
    ) -> Self {
        let repo = job_queue.repository();
        Self {
            monitor,
            batch_manager,
            job_queue,
            repo,
            queues: Mutex::new(queues),
            policy: SelectionPolicy::default(),
            wait: DEFAULT_WAIT,
            dispatch_timeout: Some(DEFAULT_DISPATCH_TIMEOUT),
        }
    }

    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// `None` lets a dispatch block for as long as the batch manager takes.
    pub fn with_dispatch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Exclusive access to the queue-to-node lists. Scheduling waits while the
    /// guard is held.
    pub async fn queue_manager(&self) -> MutexGuard<'_, LruQueueManager> {
        self.queues.lock().await
    }

    /// Run the scheduling loop until `shutdown` is cancelled.
    ///
    /// Sleeps for the poll interval, then schedules at most one job. Errors
    /// never stop the loop: a job that could not be scheduled goes back on
    /// the queue and is retried on a later tick.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(wait_ms = self.wait.as_millis() as u64, policy = %self.policy, "Scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Scheduler stopped");
                    break;
                }
                _ = tokio::time::sleep(self.wait) => {}
            }
            self.tick().await;
        }
    }

    /// One scheduling attempt: take the next job, if any, and schedule it.
    pub async fn tick(&self) -> Option<Result<ScheduleOutcome, SchedulerError>> {
        if self.job_queue.is_empty().await {
            return None;
        }

        let spec = match self.job_queue.get_next_job().await {
            Ok(spec) => spec,
            Err(e) => {
                tracing::warn!(error = %e, "Error getting next job from job queue");
                return Some(Err(e.into()));
            }
        };
        tracing::info!(job_id = %spec.job.id, "Obtained job from queue, scheduling for execution");

        let result = self.schedule(spec.clone()).await;
        if let Err(ref e) = result {
            tracing::warn!(job_id = %spec.job.id, error = %e, "Error scheduling job");
            self.requeue(spec).await;
        }
        Some(result)
    }

    /// Place `spec` on a node of its queue.
    ///
    /// Returns an error only when the attempt could not be completed (unknown
    /// queue, monitor failure); the caller is expected to requeue the job.
    /// When no node is free or dispatch fails, the job is requeued here and
    /// an `Ok` outcome describes what happened.
    pub async fn schedule(&self, spec: JobSpec) -> Result<ScheduleOutcome, SchedulerError> {
        let queue_name = spec.job.queue_name.clone();
        let load = spec.job.load_value;

        let node = {
            let mut queues = self.queues.lock().await;
            let Some(node) = self.select_node(&queues, &spec).await? else {
                drop(queues);
                tracing::debug!(job_id = %spec.job.id, queue = %queue_name, "No node available, requeueing job");
                self.requeue(spec).await;
                return Ok(ScheduleOutcome::NoNodeAvailable);
            };

            if let Err(e) = self.monitor.assign_load(&node, load).await {
                tracing::warn!(
                    node_id = %node.id,
                    load,
                    error = %e,
                    "Exception assigning load to resource node"
                );
                return Err(e.into());
            }
            if let Err(e) = queues.used_node(&queue_name, &node.id) {
                tracing::warn!(node_id = %node.id, error = %e, "Failed to rotate node in queue");
            }
            node
        };

        self.repo.update_status(&spec.job.id, JobStatus::Scheduled).await;
        tracing::info!(job_id = %spec.job.id, name = %spec.job.name, node_id = %node.id, "Assigning job to node");

        match self.dispatch(&spec, &node).await {
            Ok(()) => Ok(ScheduleOutcome::Dispatched { node_id: node.id }),
            Err(e) => {
                tracing::warn!(
                    job_id = %spec.job.id,
                    node_id = %node.id,
                    address = %node.address,
                    error = %e,
                    "Exception executing job on node"
                );
                if let Err(e) = self.monitor.reduce_load(&node, load).await {
                    tracing::warn!(node_id = %node.id, load, error = %e, "Failed to roll back load");
                }
                self.requeue(spec).await;
                Ok(ScheduleOutcome::DispatchFailed { node_id: node.id })
            }
        }
    }

    /// First node of the job's queue that can take it, scanning in LRU order.
    ///
    /// A node listed in the queue but unknown to the monitor is skipped with a
    /// warning rather than failing the attempt, so a node removed from the
    /// monitor alone does not stall its queues. Other monitor errors abort the
    /// scan.
    pub async fn node_available(&self, spec: &JobSpec) -> Result<Option<ResourceNode>, SchedulerError> {
        let queues = self.queues.lock().await;
        self.select_node(&queues, spec).await
    }

    async fn select_node(
        &self,
        queues: &LruQueueManager,
        spec: &JobSpec,
    ) -> Result<Option<ResourceNode>, SchedulerError> {
        let queue_name = &spec.job.queue_name;
        let node_ids = queues
            .nodes(queue_name)
            .map_err(|_| SchedulerError::UnknownQueue(queue_name.clone()))?;

        for node_id in node_ids {
            let node = match self.monitor.get_node_by_id(node_id).await {
                Ok(node) => node,
                Err(MonitorError::NodeNotFound(_)) => {
                    tracing::warn!(node_id = %node_id, queue = %queue_name, "Queue lists a node the monitor does not know, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(node_id = %node_id, error = %e, "Exception getting load on node");
                    return Err(e.into());
                }
            };
            let load = self.monitor.get_load(&node).await?;
            if self.policy.accepts(&node, load, spec.job.load_value) {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }

    async fn dispatch(&self, spec: &JobSpec, node: &ResourceNode) -> Result<(), JobExecutionError> {
        let dispatch = self.batch_manager.execute_remotely(spec, node);
        match self.dispatch_timeout {
            Some(timeout) => tokio::time::timeout(timeout, dispatch)
                .await
                .map_err(|_| JobExecutionError::Timeout {
                    job_id: spec.job.id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })?,
            None => dispatch.await,
        }
    }

    async fn requeue(&self, spec: JobSpec) {
        let job_id = spec.job.id.clone();
        if let Err(e) = self.job_queue.requeue_job(spec).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to requeue job");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_capacity_policy() {
        let node = ResourceNode::new("n1", "http://n1", 4);
        let policy = SelectionPolicy::RemainingCapacity;
        assert!(policy.accepts(&node, 0, 4));
        assert!(policy.accepts(&node, 2, 2));
        assert!(!policy.accepts(&node, 3, 2));
        assert!(policy.accepts(&node, 4, 0));
    }

    #[test]
    fn committed_load_policy_compares_load_directly() {
        let node = ResourceNode::new("n1", "http://n1", 4);
        let policy = SelectionPolicy::CommittedLoad;
        assert!(!policy.accepts(&node, 0, 2));
        assert!(policy.accepts(&node, 2, 2));
        assert!(policy.accepts(&node, 3, 2));
    }

    #[test]
    fn policy_parses_from_config_strings() {
        assert_eq!(
            "remaining-capacity".parse::<SelectionPolicy>(),
            Ok(SelectionPolicy::RemainingCapacity)
        );
        assert_eq!(
            "Committed-Load".parse::<SelectionPolicy>(),
            Ok(SelectionPolicy::CommittedLoad)
        );
        assert!("lru".parse::<SelectionPolicy>().is_err());
    }
}
