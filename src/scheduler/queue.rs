use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::JobQueueError;
use crate::scheduler::job::{JobSpec, JobStatus};
use crate::scheduler::repository::JobRepository;

pub const DEFAULT_CAPACITY: usize = 1_000;

/// Buffers jobs waiting to be scheduled.
///
/// Any number of producers may call [`add_job`](JobQueue::add_job)
/// concurrently; the scheduler is the single consumer.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a newly submitted job. Fails with [`JobQueueError::Full`] when
    /// the queue is at capacity and with [`JobQueueError::Duplicate`] when the
    /// id is already queued or known to the repository.
    async fn add_job(&self, spec: JobSpec) -> Result<String, JobQueueError>;

    /// Put a job back after a failed scheduling attempt. Never rejected for
    /// capacity, since the job held a slot before it was taken off the queue.
    /// An id that is already queued is left where it is.
    async fn requeue_job(&self, spec: JobSpec) -> Result<String, JobQueueError>;

    /// Remove and return the job at the head of the queue. A head id with no
    /// repository record is dropped and reported as an error, so the next
    /// call moves on to the job behind it.
    async fn get_next_job(&self) -> Result<JobSpec, JobQueueError>;

    async fn is_empty(&self) -> bool;

    async fn size(&self) -> usize;

    fn capacity(&self) -> usize;

    /// Queued jobs in dequeue order.
    async fn queued_jobs(&self) -> Vec<JobSpec>;

    /// Drop a job from the queue without scheduling it. Returns false if the
    /// job was not queued.
    async fn remove_job(&self, job_id: &str) -> bool;

    /// Drop every queued job. Returns the number removed.
    async fn purge(&self) -> usize;

    fn repository(&self) -> Arc<JobRepository>;
}

/// First-in first-out job queue backed by a [`JobRepository`].
#[derive(Debug)]
pub struct FifoJobQueue {
    pending: Mutex<VecDeque<String>>,
    capacity: usize,
    repo: Arc<JobRepository>,
}

impl FifoJobQueue {
    pub fn new(repo: Arc<JobRepository>) -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, repo)
    }

    pub fn with_capacity(capacity: usize, repo: Arc<JobRepository>) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            capacity,
            repo,
        }
    }

    async fn enqueue(&self, mut spec: JobSpec, requeue: bool) -> Result<String, JobQueueError> {
        let mut pending = self.pending.lock().await;
        let id = spec.job.id.clone();

        if pending.iter().any(|queued| *queued == id) {
            if !requeue {
                return Err(JobQueueError::Duplicate(id));
            }
            tracing::debug!(job_id = %id, "Job already queued");
            return Ok(id);
        }
        if !requeue && pending.len() >= self.capacity {
            return Err(JobQueueError::Full {
                capacity: self.capacity,
            });
        }

        spec.job.status = JobStatus::Queued;
        if requeue {
            self.repo.add_job(spec).await;
        } else if !self.repo.insert_new(spec).await {
            return Err(JobQueueError::Duplicate(id));
        }
        pending.push_back(id.clone());
        Ok(id)
    }
}

#[async_trait]
impl JobQueue for FifoJobQueue {
    async fn add_job(&self, spec: JobSpec) -> Result<String, JobQueueError> {
        let name = spec.job.name.clone();
        let queue_name = spec.job.queue_name.clone();
        let id = self.enqueue(spec, false).await?;
        tracing::info!(job_id = %id, name, queue = %queue_name, "Job added to job queue");
        Ok(id)
    }

    async fn requeue_job(&self, spec: JobSpec) -> Result<String, JobQueueError> {
        let id = self.enqueue(spec, true).await?;
        tracing::info!(job_id = %id, "Job requeued");
        Ok(id)
    }

    async fn get_next_job(&self) -> Result<JobSpec, JobQueueError> {
        let mut pending = self.pending.lock().await;
        let id = pending.pop_front().ok_or(JobQueueError::Empty)?;

        match self.repo.get_job(&id).await {
            Some(spec) => Ok(spec),
            None => {
                tracing::warn!(job_id = %id, "Dropping queued job missing from repository");
                Err(JobQueueError::Repository(format!(
                    "job {} is queued but not in the repository",
                    id
                )))
            }
        }
    }

    async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    async fn size(&self) -> usize {
        self.pending.lock().await.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    async fn queued_jobs(&self) -> Vec<JobSpec> {
        let ids: Vec<String> = self.pending.lock().await.iter().cloned().collect();
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            match self.repo.get_job(&id).await {
                Some(spec) => jobs.push(spec),
                None => tracing::warn!(job_id = %id, "Queued job missing from repository"),
            }
        }
        jobs
    }

    async fn remove_job(&self, job_id: &str) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.iter().position(|id| id == job_id) {
            Some(index) => {
                pending.remove(index);
                true
            }
            None => {
                tracing::debug!(job_id, "Job could not be removed, it is not queued");
                false
            }
        }
    }

    async fn purge(&self) -> usize {
        let mut pending = self.pending.lock().await;
        let removed = pending.len();
        pending.clear();
        removed
    }

    fn repository(&self) -> Arc<JobRepository> {
        self.repo.clone()
    }
}
