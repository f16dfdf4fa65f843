use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::MonitorError;
use crate::mapping::QueueMapping;
use crate::monitor::{Monitor, ResourceNode};

/// Monitor that routes each call to the backend monitors of the queues a
/// node serves.
///
/// Every queue named in the backend file has its own monitor. A node's load
/// is the highest load any of its queues' backends reports, and committed or
/// released load is applied to all of them. Lookups by id or address ask
/// every backend in queue-name order and return the first match.
///
/// Queue membership is a copy of the scheduler's queue mapping, refreshed by
/// the resource manager through [`set_membership`](Self::set_membership)
/// whenever queues or their nodes change.
pub struct QueueMuxMonitor {
    backends: BTreeMap<String, Arc<dyn Monitor>>,
    membership: RwLock<QueueMapping>,
}

impl QueueMuxMonitor {
    pub fn new(backends: BTreeMap<String, Arc<dyn Monitor>>, membership: QueueMapping) -> Self {
        Self {
            backends,
            membership: RwLock::new(membership),
        }
    }

    pub async fn set_membership(&self, membership: QueueMapping) {
        *self.membership.write().await = membership;
    }

    /// Queues that have a backend.
    pub fn queues(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// Backends of the queues `node_id` serves, in queue-name order.
    async fn routed(&self, node_id: &str) -> Vec<(String, Arc<dyn Monitor>)> {
        let membership = self.membership.read().await;
        let mut queues: Vec<&String> = membership
            .iter()
            .filter(|(_, nodes)| nodes.iter().any(|id| id == node_id))
            .map(|(queue, _)| queue)
            .collect();
        queues.sort();

        let mut routed = Vec::new();
        for queue in queues {
            match self.backends.get(queue) {
                Some(backend) => routed.push((queue.clone(), backend.clone())),
                None => tracing::warn!(queue = %queue, node_id, "Queue has no backend monitor"),
            }
        }
        routed
    }

    async fn routed_or_missing(&self, node_id: &str) -> Result<Vec<(String, Arc<dyn Monitor>)>, MonitorError> {
        let routed = self.routed(node_id).await;
        if routed.is_empty() {
            return Err(MonitorError::NodeNotFound(node_id.to_string()));
        }
        Ok(routed)
    }
}

#[async_trait]
impl Monitor for QueueMuxMonitor {
    async fn get_nodes(&self) -> Result<Vec<ResourceNode>, MonitorError> {
        let mut nodes: BTreeMap<String, ResourceNode> = BTreeMap::new();
        for backend in self.backends.values() {
            for node in backend.get_nodes().await? {
                nodes.entry(node.id.clone()).or_insert(node);
            }
        }
        Ok(nodes.into_values().collect())
    }

    async fn get_node_by_id(&self, node_id: &str) -> Result<ResourceNode, MonitorError> {
        for backend in self.backends.values() {
            match backend.get_node_by_id(node_id).await {
                Ok(node) => return Ok(node),
                Err(MonitorError::NodeNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(MonitorError::NodeNotFound(node_id.to_string()))
    }

    async fn get_node_by_address(&self, address: &str) -> Result<ResourceNode, MonitorError> {
        for backend in self.backends.values() {
            match backend.get_node_by_address(address).await {
                Ok(node) => return Ok(node),
                Err(MonitorError::NodeNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(MonitorError::NodeNotFound(address.to_string()))
    }

    async fn get_load(&self, node: &ResourceNode) -> Result<u32, MonitorError> {
        let mut max = 0;
        for (_, backend) in self.routed_or_missing(&node.id).await? {
            max = max.max(backend.get_load(node).await?);
        }
        Ok(max)
    }

    /// Commits to every routed backend or to none: a refusal rolls back the
    /// backends already charged.
    async fn assign_load(&self, node: &ResourceNode, amount: u32) -> Result<(), MonitorError> {
        let routed = self.routed_or_missing(&node.id).await?;
        for (index, (queue, backend)) in routed.iter().enumerate() {
            if let Err(e) = backend.assign_load(node, amount).await {
                tracing::warn!(node_id = %node.id, queue = %queue, error = %e, "Backend refused load");
                for (charged_queue, charged) in &routed[..index] {
                    if let Err(e) = charged.reduce_load(node, amount).await {
                        tracing::warn!(node_id = %node.id, queue = %charged_queue, error = %e, "Failed to roll back backend load");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn reduce_load(&self, node: &ResourceNode, amount: u32) -> Result<(), MonitorError> {
        let mut first_error = None;
        for (queue, backend) in self.routed_or_missing(&node.id).await? {
            if let Err(e) = backend.reduce_load(node, amount).await {
                tracing::warn!(node_id = %node.id, queue = %queue, error = %e, "Backend failed to release load");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Adds to the backends of the node's queues, or to every backend when
    /// the node serves no queue yet so it can be mapped to any of them.
    async fn add_node(&self, node: ResourceNode) -> Result<(), MonitorError> {
        let routed = self.routed(&node.id).await;
        let targets: Vec<Arc<dyn Monitor>> = if routed.is_empty() {
            self.backends.values().cloned().collect()
        } else {
            routed.into_iter().map(|(_, backend)| backend).collect()
        };
        for backend in targets {
            backend.add_node(node.clone()).await?;
        }
        Ok(())
    }

    async fn remove_node_by_id(&self, node_id: &str) -> Result<(), MonitorError> {
        let mut removed = false;
        for backend in self.backends.values() {
            match backend.remove_node_by_id(node_id).await {
                Ok(()) => removed = true,
                Err(MonitorError::NodeNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if removed {
            Ok(())
        } else {
            Err(MonitorError::NodeNotFound(node_id.to_string()))
        }
    }

    async fn set_node_capacity(&self, node_id: &str, capacity: u32) -> Result<(), MonitorError> {
        let mut updated = false;
        for backend in self.backends.values() {
            match backend.set_node_capacity(node_id, capacity).await {
                Ok(()) => updated = true,
                Err(MonitorError::NodeNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if updated {
            Ok(())
        } else {
            Err(MonitorError::NodeNotFound(node_id.to_string()))
        }
    }
}
