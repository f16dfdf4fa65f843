use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::scheduler::job::{JobSpec, JobStatus};

/// Stores every job the manager knows about, keyed by job id.
///
/// The job queue only holds ids; the repository is the source of truth for
/// job state and is what `get_job_info` and `is_job_complete` read from.
#[derive(Debug, Default)]
pub struct JobRepository {
    jobs: RwLock<HashMap<String, JobSpec>>,
}

impl JobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a job spec.
    pub async fn add_job(&self, spec: JobSpec) {
        self.jobs.write().await.insert(spec.job.id.clone(), spec);
    }

    /// Insert a job spec unless its id is already taken. Returns false, and
    /// leaves the stored record alone, when it is.
    pub async fn insert_new(&self, spec: JobSpec) -> bool {
        match self.jobs.write().await.entry(spec.job.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(spec);
                true
            }
        }
    }

    pub async fn get_job(&self, id: &str) -> Option<JobSpec> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.jobs.read().await.contains_key(id)
    }

    /// Update a job's status. Returns false if the job is unknown.
    pub async fn update_status(&self, id: &str, status: JobStatus) -> bool {
        if let Some(spec) = self.jobs.write().await.get_mut(id) {
            spec.job.status = status;
            true
        } else {
            false
        }
    }

    /// Record the final state of a job once its process has exited.
    pub async fn record_exit(&self, id: &str, status: JobStatus, exit_code: Option<i32>) -> bool {
        if let Some(spec) = self.jobs.write().await.get_mut(id) {
            spec.job.status = status;
            spec.job.exit_code = exit_code;
            true
        } else {
            false
        }
    }

    /// Returns `None` for unknown jobs.
    pub async fn job_finished(&self, id: &str) -> Option<bool> {
        self.jobs
            .read()
            .await
            .get(id)
            .map(|spec| spec.job.status.is_finished())
    }

    pub async fn remove_job(&self, id: &str) -> Option<JobSpec> {
        self.jobs.write().await.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::Job;

    fn spec(id: &str) -> JobSpec {
        JobSpec::new(
            Job::new("job", "/bin/true", "default", 1).with_id(id),
            serde_json::Value::Null,
        )
    }

    #[tokio::test]
    async fn stores_and_updates_jobs() {
        let repo = JobRepository::new();
        repo.add_job(spec("a")).await;

        assert!(repo.contains("a").await);
        assert!(repo.update_status("a", JobStatus::Executed).await);
        assert_eq!(
            repo.get_job("a").await.unwrap().job.status,
            JobStatus::Executed
        );
        assert!(!repo.update_status("missing", JobStatus::Executed).await);
    }

    #[tokio::test]
    async fn job_finished_reflects_terminal_status() {
        let repo = JobRepository::new();
        repo.add_job(spec("a")).await;

        assert_eq!(repo.job_finished("a").await, Some(false));
        repo.record_exit("a", JobStatus::Complete, Some(0)).await;
        assert_eq!(repo.job_finished("a").await, Some(true));
        assert_eq!(repo.get_job("a").await.unwrap().job.exit_code, Some(0));
        assert_eq!(repo.job_finished("missing").await, None);
    }

    #[tokio::test]
    async fn insert_new_keeps_existing_record() {
        let repo = JobRepository::new();
        assert!(repo.insert_new(spec("a")).await);
        repo.record_exit("a", JobStatus::Complete, Some(0)).await;

        let mut other = spec("a");
        other.job.name = "other".to_string();
        assert!(!repo.insert_new(other).await);

        let stored = repo.get_job("a").await.unwrap();
        assert_eq!(stored.job.name, "job");
        assert_eq!(stored.job.status, JobStatus::Complete);
    }
}
