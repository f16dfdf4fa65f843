pub mod assigner;
pub mod job;
pub mod queue;
pub mod queue_manager;
pub mod repository;

pub use assigner::{LruScheduler, ScheduleOutcome, SelectionPolicy};
pub use job::{Job, JobSpec, JobStatus};
pub use queue::{FifoJobQueue, JobQueue};
pub use queue_manager::LruQueueManager;
pub use repository::JobRepository;
