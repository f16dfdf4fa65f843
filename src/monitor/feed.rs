use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::MonitorError;
use crate::monitor::{Monitor, ResourceNode};

/// One node as seen by an external monitoring system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    #[serde(flatten)]
    pub node: ResourceNode,
    pub load: u32,
}

/// Source of node status from outside the resource manager.
#[async_trait]
pub trait LoadFeed: Send + Sync {
    async fn poll(&self) -> Result<Vec<NodeReport>, MonitorError>;
}

/// Reads a JSON array of [`NodeReport`]s that an external agent keeps
/// up to date.
#[derive(Debug, Clone)]
pub struct FileLoadFeed {
    path: PathBuf,
}

impl FileLoadFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LoadFeed for FileLoadFeed {
    async fn poll(&self) -> Result<Vec<NodeReport>, MonitorError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| MonitorError::Feed(format!("{}: {}", self.path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| MonitorError::Feed(format!("{}: {}", self.path.display(), e)))
    }
}

#[derive(Debug, Default)]
struct FeedState {
    /// Last successful poll. `None` until the feed has answered once.
    reported: Option<BTreeMap<String, NodeReport>>,
    added: BTreeMap<String, ResourceNode>,
    removed: HashSet<String>,
    capacities: HashMap<String, u32>,
    /// Load committed through this monitor and not yet released.
    assigned: HashMap<String, u32>,
}

impl FeedState {
    fn node(&self, node_id: &str) -> Result<(ResourceNode, u32), MonitorError> {
        let reported = self
            .reported
            .as_ref()
            .ok_or_else(|| MonitorError::Unavailable("load feed has not reported yet".to_string()))?;
        if self.removed.contains(node_id) {
            return Err(MonitorError::NodeNotFound(node_id.to_string()));
        }

        let (mut node, feed_load) = match (self.added.get(node_id), reported.get(node_id)) {
            (Some(node), report) => (node.clone(), report.map(|r| r.load).unwrap_or(0)),
            (None, Some(report)) => (report.node.clone(), report.load),
            (None, None) => return Err(MonitorError::NodeNotFound(node_id.to_string())),
        };
        if let Some(capacity) = self.capacities.get(node_id) {
            node.capacity = *capacity;
        }
        let assigned = self.assigned.get(node_id).copied().unwrap_or(0);
        Ok((node, feed_load.saturating_add(assigned)))
    }

    fn node_ids(&self) -> Result<Vec<String>, MonitorError> {
        let reported = self
            .reported
            .as_ref()
            .ok_or_else(|| MonitorError::Unavailable("load feed has not reported yet".to_string()))?;
        let mut ids: Vec<String> = reported
            .keys()
            .chain(self.added.keys())
            .filter(|id| !self.removed.contains(*id))
            .cloned()
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

/// Monitor backed by an external [`LoadFeed`].
///
/// Node lists and base loads come from the feed, refreshed every
/// `poll_interval` by [`run`](FeedMonitor::run). Load assigned through the
/// monitor is added on top of the reported value until it is reduced again,
/// so a freshly scheduled job is visible before the feed notices it.
/// Capacity is not enforced here; the reported load is outside our control.
pub struct FeedMonitor {
    feed: Arc<dyn LoadFeed>,
    poll_interval: Duration,
    state: RwLock<FeedState>,
}

impl FeedMonitor {
    pub fn new(feed: Arc<dyn LoadFeed>, poll_interval: Duration) -> Self {
        Self {
            feed,
            poll_interval,
            state: RwLock::new(FeedState::default()),
        }
    }

    /// Poll the feed once. On failure the previous snapshot is kept.
    pub async fn refresh(&self) -> Result<usize, MonitorError> {
        let reports = self.feed.poll().await?;
        let count = reports.len();
        let snapshot: BTreeMap<String, NodeReport> = reports
            .into_iter()
            .map(|report| (report.node.id.clone(), report))
            .collect();
        self.state.write().await.reported = Some(snapshot);
        tracing::debug!(nodes = count, "Load feed refreshed");
        Ok(count)
    }

    /// Poll the feed every `poll_interval` until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Load feed polling stopped");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.refresh().await {
                        tracing::warn!(error = %e, "Load feed poll failed, keeping last snapshot");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Monitor for FeedMonitor {
    async fn get_nodes(&self) -> Result<Vec<ResourceNode>, MonitorError> {
        let state = self.state.read().await;
        state
            .node_ids()?
            .iter()
            .map(|id| state.node(id).map(|(node, _)| node))
            .collect()
    }

    async fn get_node_by_id(&self, node_id: &str) -> Result<ResourceNode, MonitorError> {
        self.state.read().await.node(node_id).map(|(node, _)| node)
    }

    async fn get_node_by_address(&self, address: &str) -> Result<ResourceNode, MonitorError> {
        self.get_nodes()
            .await?
            .into_iter()
            .find(|n| n.address == address)
            .ok_or_else(|| MonitorError::NodeNotFound(address.to_string()))
    }

    async fn get_load(&self, node: &ResourceNode) -> Result<u32, MonitorError> {
        self.state.read().await.node(&node.id).map(|(_, load)| load)
    }

    async fn assign_load(&self, node: &ResourceNode, amount: u32) -> Result<(), MonitorError> {
        let mut state = self.state.write().await;
        state.node(&node.id)?;
        let assigned = state.assigned.entry(node.id.clone()).or_insert(0);
        *assigned = assigned.saturating_add(amount);
        Ok(())
    }

    async fn reduce_load(&self, node: &ResourceNode, amount: u32) -> Result<(), MonitorError> {
        let mut state = self.state.write().await;
        state.node(&node.id)?;
        if let Some(assigned) = state.assigned.get_mut(&node.id) {
            *assigned = assigned.saturating_sub(amount);
        }
        Ok(())
    }

    async fn add_node(&self, node: ResourceNode) -> Result<(), MonitorError> {
        let mut state = self.state.write().await;
        state.removed.remove(&node.id);
        tracing::info!(node_id = %node.id, "Node added to feed overlay");
        state.added.insert(node.id.clone(), node);
        Ok(())
    }

    async fn remove_node_by_id(&self, node_id: &str) -> Result<(), MonitorError> {
        let mut state = self.state.write().await;
        state.node(node_id)?;
        state.added.remove(node_id);
        state.assigned.remove(node_id);
        state.removed.insert(node_id.to_string());
        tracing::info!(node_id, "Node hidden from feed");
        Ok(())
    }

    async fn set_node_capacity(&self, node_id: &str, capacity: u32) -> Result<(), MonitorError> {
        let mut state = self.state.write().await;
        state.node(node_id)?;
        state.capacities.insert(node_id.to_string(), capacity);
        Ok(())
    }
}
