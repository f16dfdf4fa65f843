//! Node registry and load accounting.
//!
//! A [`Monitor`] owns the set of known [`ResourceNode`]s and the load
//! committed to each of them. The scheduler reads loads to pick a node and
//! commits or rolls back load around each dispatch; request handlers add and
//! remove nodes concurrently, so every implementation synchronizes
//! internally.
//!
//! # Implementations
//!
//! - [`AssignmentMonitor`]: tracks load itself, starting from zero
//! - [`FeedMonitor`]: takes node lists and loads from an external
//!   [`LoadFeed`] and layers locally assigned load on top
//! - [`QueueMuxMonitor`]: delegates to one backend monitor per queue

pub mod assignment;
pub mod feed;
pub mod mux;
pub mod node;

use async_trait::async_trait;

use crate::error::MonitorError;

pub use assignment::AssignmentMonitor;
pub use feed::{FeedMonitor, FileLoadFeed, LoadFeed, NodeReport};
pub use mux::QueueMuxMonitor;
pub use node::ResourceNode;

#[async_trait]
pub trait Monitor: Send + Sync {
    /// All known nodes, sorted by id.
    async fn get_nodes(&self) -> Result<Vec<ResourceNode>, MonitorError>;

    async fn get_node_by_id(&self, node_id: &str) -> Result<ResourceNode, MonitorError>;

    async fn get_node_by_address(&self, address: &str) -> Result<ResourceNode, MonitorError>;

    /// Load currently committed to `node`.
    async fn get_load(&self, node: &ResourceNode) -> Result<u32, MonitorError>;

    /// Atomically add `amount` to the node's load.
    async fn assign_load(&self, node: &ResourceNode, amount: u32) -> Result<(), MonitorError>;

    /// Atomically remove `amount` from the node's load, stopping at zero.
    async fn reduce_load(&self, node: &ResourceNode, amount: u32) -> Result<(), MonitorError>;

    async fn add_node(&self, node: ResourceNode) -> Result<(), MonitorError>;

    async fn remove_node_by_id(&self, node_id: &str) -> Result<(), MonitorError>;

    async fn set_node_capacity(&self, node_id: &str, capacity: u32) -> Result<(), MonitorError>;
}
