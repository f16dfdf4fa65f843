use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};

use crate::error::ConfigError;
use crate::scheduler::queue::DEFAULT_CAPACITY;
use crate::scheduler::SelectionPolicy;

/// Which [`Monitor`](crate::monitor::Monitor) implementation to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorKind {
    /// Self-tracked load counters over the nodes in `nodes_dirs`.
    Assignment,
    /// Node status read from an external feed file.
    Feed {
        path: PathBuf,
        poll_interval_ms: u64,
    },
    /// One backend monitor per queue, declared in a backend file. See
    /// [`QueueMuxMonitor`](crate::monitor::QueueMuxMonitor).
    QueueMux { backends_path: PathBuf },
}

impl MonitorKind {
    pub fn parse(
        kind: &str,
        feed_path: Option<PathBuf>,
        poll_interval_ms: u64,
        backends_path: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "assignment" => Ok(MonitorKind::Assignment),
            "feed" => {
                let path = feed_path.ok_or_else(|| ConfigError::InvalidValue {
                    key: "monitor",
                    value: kind.to_string(),
                    reason: "the feed monitor needs a feed path".to_string(),
                })?;
                Ok(MonitorKind::Feed {
                    path,
                    poll_interval_ms,
                })
            }
            "queue-mux" => {
                let backends_path = backends_path.ok_or_else(|| ConfigError::InvalidValue {
                    key: "monitor",
                    value: kind.to_string(),
                    reason: "the queue-mux monitor needs a backends file".to_string(),
                })?;
                Ok(MonitorKind::QueueMux { backends_path })
            }
            other => Err(ConfigError::InvalidValue {
                key: "monitor",
                value: other.to_string(),
                reason: "expected assignment, feed or queue-mux".to_string(),
            }),
        }
    }
}

/// Which [`BatchManager`](crate::batch::BatchManager) implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchManagerKind {
    #[default]
    Process,
}

impl FromStr for BatchManagerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" => Ok(BatchManagerKind::Process),
            other => Err(ConfigError::InvalidValue {
                key: "batch_manager",
                value: other.to_string(),
                reason: "expected process".to_string(),
            }),
        }
    }
}

/// Which [`JobQueue`](crate::scheduler::JobQueue) implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobQueueKind {
    #[default]
    Fifo,
}

impl FromStr for JobQueueKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(JobQueueKind::Fifo),
            other => Err(ConfigError::InvalidValue {
                key: "job_queue",
                value: other.to_string(),
                reason: "expected fifo".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Seconds the scheduler sleeps between scheduling attempts.
    pub wait_seconds: u64,
    /// Upper bound on a single dispatch. `None` waits indefinitely.
    pub dispatch_timeout_ms: Option<u64>,
    pub selection_policy: SelectionPolicy,
    pub monitor: MonitorKind,
    pub batch_manager: BatchManagerKind,
    pub job_queue: JobQueueKind,
    pub job_queue_capacity: usize,
    /// Directories holding `*nodes.toml` node definitions.
    pub nodes_dirs: Vec<String>,
    /// Directories holding `*node-to-queue-mapping.toml` files.
    pub queues_dirs: Vec<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            wait_seconds: 20,
            dispatch_timeout_ms: Some(60_000),
            selection_policy: SelectionPolicy::default(),
            monitor: MonitorKind::Assignment,
            batch_manager: BatchManagerKind::default(),
            job_queue: JobQueueKind::default(),
            job_queue_capacity: DEFAULT_CAPACITY,
            nodes_dirs: Vec::new(),
            queues_dirs: Vec::new(),
        }
    }
}

impl ManagerConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_seconds)
    }

    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout_ms.map(Duration::from_millis)
    }

    pub fn with_wait_seconds(mut self, seconds: u64) -> Self {
        self.wait_seconds = seconds;
        self
    }

    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.selection_policy = policy;
        self
    }

    pub fn with_job_queue_capacity(mut self, capacity: usize) -> Self {
        self.job_queue_capacity = capacity;
        self
    }

    /// Use the same directories for node definitions and queue mappings.
    pub fn with_config_dir(mut self, dir: impl Into<String>) -> Self {
        let dir = dir.into();
        self.nodes_dirs.push(dir.clone());
        self.queues_dirs.push(dir);
        self
    }
}

/// Split a comma-separated list of directory URIs, expanding environment
/// variables in each entry. Empty entries are dropped.
pub fn parse_dir_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(expand_env)
        .collect()
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Hardcoded pattern, always compiles
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("env var pattern is valid")
    })
}

/// Replace `$VAR` and `${VAR}` with the variable's value. Unset variables
/// are left as written.
pub fn expand_env(input: &str) -> String {
    env_var_pattern()
        .replace_all(input, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match std::env::var(name) {
                Ok(value) => value,
                Err(_) => {
                    tracing::warn!(var = name, "Environment variable not set, leaving it unexpanded");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}
