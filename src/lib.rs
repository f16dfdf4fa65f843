pub mod batch;
pub mod config;
pub mod error;
pub mod manager;
pub mod mapping;
pub mod monitor;
pub mod scheduler;
pub mod shutdown;

pub use error::{ResourceError, Result};
pub use manager::{ResourceManager, ResourceManagerBuilder};
