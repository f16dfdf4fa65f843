use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Scheduled,
    Executed,
    Complete,
    Killed,
}

impl JobStatus {
    /// A finished job will not be scheduled or executed again.
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Killed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "QUEUED"),
            JobStatus::Scheduled => write!(f, "SCHEDULED"),
            JobStatus::Executed => write!(f, "EXECUTED"),
            JobStatus::Complete => write!(f, "COMPLETE"),
            JobStatus::Killed => write!(f, "KILLED"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(JobStatus::Queued),
            "SCHEDULED" => Ok(JobStatus::Scheduled),
            "EXECUTED" => Ok(JobStatus::Executed),
            "COMPLETE" => Ok(JobStatus::Complete),
            "KILLED" => Ok(JobStatus::Killed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// A job definition as submitted to the resource manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Assigned on submission when left empty.
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// Program the batch manager launches for this job.
    pub instance: String,
    pub queue_name: String,
    /// Resource units the job consumes on the node it runs on.
    pub load_value: u32,
    #[serde(default = "default_status")]
    pub status: JobStatus,
    #[serde(default = "Utc::now")]
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

fn default_status() -> JobStatus {
    JobStatus::Queued
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        instance: impl Into<String>,
        queue_name: impl Into<String>,
        load_value: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            instance: instance.into(),
            queue_name: queue_name.into(),
            load_value,
            status: JobStatus::Queued,
            submitted_at: Utc::now(),
            exit_code: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// A job plus the opaque input it is launched with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub job: Job,
    #[serde(default)]
    pub input: serde_json::Value,
}

impl JobSpec {
    pub fn new(job: Job, input: serde_json::Value) -> Self {
        Self { job, input }
    }

    pub fn id(&self) -> &str {
        &self.job.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_display() {
        for status in [
            JobStatus::Queued,
            JobStatus::Scheduled,
            JobStatus::Executed,
            JobStatus::Complete,
            JobStatus::Killed,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>(), Ok(status));
        }
        assert!("RUNNING".parse::<JobStatus>().is_err());
    }

    #[test]
    fn only_complete_and_killed_are_finished() {
        assert!(JobStatus::Complete.is_finished());
        assert!(JobStatus::Killed.is_finished());
        assert!(!JobStatus::Executed.is_finished());
        assert!(!JobStatus::Queued.is_finished());
    }

    #[test]
    fn job_deserializes_with_defaults() {
        let job: Job = serde_json::from_str(
            r#"{"name":"sweep","instance":"/bin/true","queue_name":"default","load_value":2}"#,
        )
        .unwrap();
        assert!(job.id.is_empty());
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.load_value, 2);
        assert!(job.exit_code.is_none());
    }

    #[test]
    fn status_serializes_in_upper_case() {
        let json = serde_json::to_string(&JobStatus::Scheduled).unwrap();
        assert_eq!(json, "\"SCHEDULED\"");
    }
}
