use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::batch::{BatchManager, ProcessBatchManager};
use crate::config::{BatchManagerKind, JobQueueKind, ManagerConfig, MonitorKind};
use crate::error::{ResourceError, Result};
use crate::mapping;
use crate::monitor::{
    AssignmentMonitor, FeedMonitor, FileLoadFeed, Monitor, QueueMuxMonitor, ResourceNode,
};
use crate::scheduler::{
    FifoJobQueue, Job, JobQueue, JobRepository, JobSpec, JobStatus, LruQueueManager, LruScheduler,
};

/// Assembles a [`ResourceManager`] from configuration, with optional
/// injected components replacing the configured ones.
pub struct ResourceManagerBuilder {
    config: ManagerConfig,
    monitor: Option<Arc<dyn Monitor>>,
    batch_manager: Option<Arc<dyn BatchManager>>,
    job_queue: Option<Arc<dyn JobQueue>>,
    queues: Option<LruQueueManager>,
}

impl ResourceManagerBuilder {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            monitor: None,
            batch_manager: None,
            job_queue: None,
            queues: None,
        }
    }

    pub fn monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn batch_manager(mut self, batch_manager: Arc<dyn BatchManager>) -> Self {
        self.batch_manager = Some(batch_manager);
        self
    }

    pub fn job_queue(mut self, job_queue: Arc<dyn JobQueue>) -> Self {
        self.job_queue = Some(job_queue);
        self
    }

    /// Use this queue-to-node mapping instead of loading `queues_dirs`.
    pub fn queues(mut self, queues: LruQueueManager) -> Self {
        self.queues = Some(queues);
        self
    }

    pub fn build(self) -> ResourceManager {
        let config = self.config;
        let queues = self.queues.unwrap_or_else(|| {
            LruQueueManager::from_mapping(mapping::load_queue_mapping(&config.queues_dirs))
        });
        let mut feeds = Vec::new();
        let mut queue_mux = None;

        let monitor: Arc<dyn Monitor> = match self.monitor {
            Some(monitor) => monitor,
            None => build_monitor(&config.monitor, &config, &queues, &mut feeds, &mut queue_mux),
        };

        let job_queue: Arc<dyn JobQueue> = match self.job_queue {
            Some(job_queue) => job_queue,
            None => match config.job_queue {
                JobQueueKind::Fifo => Arc::new(FifoJobQueue::with_capacity(
                    config.job_queue_capacity,
                    Arc::new(JobRepository::new()),
                )),
            },
        };
        let repo = job_queue.repository();

        let batch_manager: Arc<dyn BatchManager> = match self.batch_manager {
            Some(batch_manager) => batch_manager,
            None => match config.batch_manager {
                BatchManagerKind::Process => {
                    Arc::new(ProcessBatchManager::new(monitor.clone(), repo.clone()))
                }
            },
        };

        let scheduler = LruScheduler::new(
            monitor.clone(),
            batch_manager.clone(),
            job_queue.clone(),
            queues,
        )
        .with_policy(config.selection_policy)
        .with_wait(config.wait())
        .with_dispatch_timeout(config.dispatch_timeout());

        ResourceManager {
            scheduler: Arc::new(scheduler),
            monitor,
            batch_manager,
            job_queue,
            repo,
            feeds,
            queue_mux,
        }
    }
}

/// Construct the monitor `kind` names. Feed monitors are collected in
/// `feeds` so the manager can poll them, and a queue-mux monitor is kept in
/// `queue_mux` so queue edits can refresh its routing.
fn build_monitor(
    kind: &MonitorKind,
    config: &ManagerConfig,
    queues: &LruQueueManager,
    feeds: &mut Vec<Arc<FeedMonitor>>,
    queue_mux: &mut Option<Arc<QueueMuxMonitor>>,
) -> Arc<dyn Monitor> {
    match kind {
        MonitorKind::Assignment => {
            Arc::new(AssignmentMonitor::new(mapping::load_nodes(&config.nodes_dirs)))
        }
        MonitorKind::Feed {
            path,
            poll_interval_ms,
        } => {
            let feed = Arc::new(FeedMonitor::new(
                Arc::new(FileLoadFeed::new(path.clone())),
                Duration::from_millis(*poll_interval_ms),
            ));
            feeds.push(feed.clone());
            feed
        }
        MonitorKind::QueueMux { backends_path } => {
            let path = backends_path.display().to_string();
            let entries = mapping::load_backends(&path).unwrap_or_else(|e| {
                tracing::error!(path = %path, error = %e, "Failed to load queue backends, no queue has a monitor");
                Vec::new()
            });

            let mut backends = BTreeMap::new();
            for backend in entries {
                let monitor = build_monitor(&backend.monitor, config, queues, feeds, queue_mux);
                backends.insert(backend.queue, monitor);
            }
            let mux = Arc::new(QueueMuxMonitor::new(backends, queues.mapping()));
            *queue_mux = Some(mux.clone());
            mux
        }
    }
}

/// The operations the resource manager exposes to remote clients.
///
/// The transport that carries these calls lives outside this crate; every
/// method here is safe to call concurrently with the scheduler loop.
pub struct ResourceManager {
    scheduler: Arc<LruScheduler>,
    monitor: Arc<dyn Monitor>,
    batch_manager: Arc<dyn BatchManager>,
    job_queue: Arc<dyn JobQueue>,
    repo: Arc<JobRepository>,
    feeds: Vec<Arc<FeedMonitor>>,
    queue_mux: Option<Arc<QueueMuxMonitor>>,
}

impl ResourceManager {
    pub fn from_config(config: ManagerConfig) -> Self {
        ResourceManagerBuilder::new(config).build()
    }

    pub fn builder(config: ManagerConfig) -> ResourceManagerBuilder {
        ResourceManagerBuilder::new(config)
    }

    pub fn scheduler(&self) -> &Arc<LruScheduler> {
        &self.scheduler
    }

    pub fn monitor(&self) -> &Arc<dyn Monitor> {
        &self.monitor
    }

    pub fn repository(&self) -> &Arc<JobRepository> {
        &self.repo
    }

    /// Run the scheduler (and polling of any configured load feeds) until
    /// `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut handles = Vec::new();

        for feed in self.feeds.iter().cloned() {
            if let Err(e) = feed.refresh().await {
                tracing::warn!(error = %e, "Initial load feed poll failed");
            }
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move {
                feed.run(token).await;
            }));
        }

        let scheduler = self.scheduler.clone();
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run(token).await;
        }));

        tracing::info!("Resource manager running");
        shutdown.cancelled().await;

        for handle in handles {
            handle
                .await
                .map_err(|e| ResourceError::Internal(format!("task failed: {}", e)))?;
        }
        tracing::info!("Resource manager stopped");
        Ok(())
    }

    pub fn is_alive(&self) -> bool {
        true
    }

    /// Queue a job for scheduling. A job submitted without an id is given one;
    /// an id the manager already knows is rejected with
    /// [`ResourceError::DuplicateJob`].
    pub async fn submit_job(&self, mut job: Job, input: serde_json::Value) -> Result<String> {
        if job.id.is_empty() {
            job.id = Uuid::new_v4().to_string();
        }
        if !self.scheduler.queue_manager().await.contains_queue(&job.queue_name) {
            return Err(ResourceError::UnknownQueue(job.queue_name));
        }
        job.status = JobStatus::Queued;

        let id = self.job_queue.add_job(JobSpec::new(job, input)).await?;
        Ok(id)
    }

    pub async fn get_job_info(&self, job_id: &str) -> Result<Job> {
        self.repo
            .get_job(job_id)
            .await
            .map(|spec| spec.job)
            .ok_or_else(|| ResourceError::JobNotFound(job_id.to_string()))
    }

    pub async fn is_job_complete(&self, job_id: &str) -> Result<bool> {
        self.repo
            .job_finished(job_id)
            .await
            .ok_or_else(|| ResourceError::JobNotFound(job_id.to_string()))
    }

    /// Stop a job. A queued job is taken off the queue; an executing job is
    /// killed through the batch manager on the node running it.
    pub async fn kill_job(&self, job_id: &str) -> Result<bool> {
        if self.job_queue.remove_job(job_id).await {
            self.repo.update_status(job_id, JobStatus::Killed).await;
            tracing::info!(job_id, "Queued job killed");
            return Ok(true);
        }

        let Some(node_id) = self.batch_manager.execution_node(job_id).await else {
            tracing::warn!(
                job_id,
                "Cannot find execution node for job, has it already finished?"
            );
            return Ok(false);
        };
        let node = self.monitor.get_node_by_id(&node_id).await?;
        Ok(self.batch_manager.kill_job(job_id, &node).await)
    }

    pub async fn get_execution_node(&self, job_id: &str) -> Option<String> {
        let node = self.batch_manager.execution_node(job_id).await;
        if node.is_none() {
            tracing::debug!(job_id, "Job not currently executing on any known node");
        }
        node
    }

    /// Dispatch a job straight to the node at `address`, bypassing the queue.
    /// Fails with [`ResourceError::DuplicateJob`] if the id is already known.
    pub async fn execute_on_node(
        &self,
        mut job: Job,
        input: serde_json::Value,
        address: &str,
    ) -> Result<String> {
        if job.id.is_empty() {
            job.id = Uuid::new_v4().to_string();
        }
        let node = self.monitor.get_node_by_address(address).await?;
        let load = job.load_value;
        job.status = JobStatus::Scheduled;
        let spec = JobSpec::new(job, input);
        let id = spec.job.id.clone();

        if !self.repo.insert_new(spec.clone()).await {
            return Err(ResourceError::DuplicateJob(id));
        }
        if let Err(e) = self.monitor.assign_load(&node, load).await {
            self.repo.remove_job(&id).await;
            return Err(e.into());
        }
        if let Err(e) = self.batch_manager.execute_remotely(&spec, &node).await {
            if let Err(e) = self.monitor.reduce_load(&node, load).await {
                tracing::warn!(node_id = %node.id, error = %e, "Failed to roll back load");
            }
            self.repo.remove_job(&id).await;
            return Err(e.into());
        }
        Ok(id)
    }

    pub async fn get_nodes(&self) -> Result<Vec<ResourceNode>> {
        Ok(self.monitor.get_nodes().await?)
    }

    pub async fn get_node_by_id(&self, node_id: &str) -> Result<ResourceNode> {
        Ok(self.monitor.get_node_by_id(node_id).await?)
    }

    pub async fn get_job_queue_size(&self) -> usize {
        self.job_queue.size().await
    }

    pub fn get_job_queue_capacity(&self) -> usize {
        self.job_queue.capacity()
    }

    pub async fn add_node(&self, node: ResourceNode) -> Result<()> {
        Ok(self.monitor.add_node(node).await?)
    }

    /// Remove a node from the monitor and from every queue it serves.
    pub async fn remove_node(&self, node_id: &str) -> Result<()> {
        let mut queues = self.scheduler.queue_manager().await;
        self.monitor.remove_node_by_id(node_id).await?;
        let affected = queues.remove_node(node_id);
        self.sync_membership(&queues).await;
        tracing::info!(node_id, queues = ?affected, "Node removed from queues");
        Ok(())
    }

    pub async fn set_node_capacity(&self, node_id: &str, capacity: u32) -> Result<()> {
        Ok(self.monitor.set_node_capacity(node_id, capacity).await?)
    }

    pub async fn get_queues(&self) -> Vec<String> {
        self.scheduler.queue_manager().await.queues()
    }

    pub async fn add_queue(&self, queue: &str) -> Result<()> {
        let mut queues = self.scheduler.queue_manager().await;
        queues.add_queue(queue)?;
        self.sync_membership(&queues).await;
        tracing::info!(queue, "Queue added");
        Ok(())
    }

    pub async fn remove_queue(&self, queue: &str) -> Result<()> {
        let mut queues = self.scheduler.queue_manager().await;
        queues.remove_queue(queue)?;
        self.sync_membership(&queues).await;
        tracing::info!(queue, "Queue removed");
        Ok(())
    }

    pub async fn add_node_to_queue(&self, node_id: &str, queue: &str) -> Result<()> {
        self.monitor.get_node_by_id(node_id).await?;
        let mut queues = self.scheduler.queue_manager().await;
        queues.add_node_to_queue(node_id, queue)?;
        self.sync_membership(&queues).await;
        Ok(())
    }

    pub async fn remove_node_from_queue(&self, node_id: &str, queue: &str) -> Result<()> {
        let mut queues = self.scheduler.queue_manager().await;
        queues.remove_node_from_queue(node_id, queue)?;
        self.sync_membership(&queues).await;
        Ok(())
    }

    pub async fn get_nodes_in_queue(&self, queue: &str) -> Result<Vec<String>> {
        Ok(self.scheduler.queue_manager().await.nodes(queue)?.to_vec())
    }

    pub async fn get_queues_with_node(&self, node_id: &str) -> Vec<String> {
        self.scheduler.queue_manager().await.queues_with_node(node_id)
    }

    pub async fn jobs_on_node(&self, node_id: &str) -> Vec<String> {
        self.batch_manager.jobs_on_node(node_id).await
    }

    /// Keep the queue-mux monitor's routing in step with the queue lists.
    /// Called with the queue lock held so the two never disagree for a
    /// scheduling attempt.
    async fn sync_membership(&self, queues: &LruQueueManager) {
        if let Some(mux) = &self.queue_mux {
            mux.set_membership(queues.mapping()).await;
        }
    }
}
