use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::MonitorError;
use crate::monitor::{Monitor, ResourceNode};

#[derive(Debug, Default)]
struct Registry {
    nodes: BTreeMap<String, ResourceNode>,
    loads: BTreeMap<String, u32>,
}

/// Monitor that keeps its own load counters.
///
/// Every node starts at zero load. Load only changes through
/// [`assign_load`](Monitor::assign_load) and
/// [`reduce_load`](Monitor::reduce_load), and a node never holds more load
/// than its capacity.
#[derive(Debug, Default)]
pub struct AssignmentMonitor {
    registry: RwLock<Registry>,
}

impl AssignmentMonitor {
    pub fn new(nodes: Vec<ResourceNode>) -> Self {
        let mut registry = Registry::default();
        for node in nodes {
            registry.loads.insert(node.id.clone(), 0);
            registry.nodes.insert(node.id.clone(), node);
        }
        Self {
            registry: RwLock::new(registry),
        }
    }

    /// Load map snapshot, keyed by node id.
    pub async fn loads(&self) -> BTreeMap<String, u32> {
        self.registry.read().await.loads.clone()
    }
}

#[async_trait]
impl Monitor for AssignmentMonitor {
    async fn get_nodes(&self) -> Result<Vec<ResourceNode>, MonitorError> {
        Ok(self.registry.read().await.nodes.values().cloned().collect())
    }

    async fn get_node_by_id(&self, node_id: &str) -> Result<ResourceNode, MonitorError> {
        self.registry
            .read()
            .await
            .nodes
            .get(node_id)
            .cloned()
            .ok_or_else(|| MonitorError::NodeNotFound(node_id.to_string()))
    }

    async fn get_node_by_address(&self, address: &str) -> Result<ResourceNode, MonitorError> {
        self.registry
            .read()
            .await
            .nodes
            .values()
            .find(|n| n.address == address)
            .cloned()
            .ok_or_else(|| MonitorError::NodeNotFound(address.to_string()))
    }

    async fn get_load(&self, node: &ResourceNode) -> Result<u32, MonitorError> {
        self.registry
            .read()
            .await
            .loads
            .get(&node.id)
            .copied()
            .ok_or_else(|| MonitorError::NodeNotFound(node.id.clone()))
    }

    async fn assign_load(&self, node: &ResourceNode, amount: u32) -> Result<(), MonitorError> {
        let mut registry = self.registry.write().await;
        let capacity = registry
            .nodes
            .get(&node.id)
            .map(|n| n.capacity)
            .ok_or_else(|| MonitorError::NodeNotFound(node.id.clone()))?;
        let load = registry.loads.entry(node.id.clone()).or_insert(0);

        let available = capacity.saturating_sub(*load);
        if amount > available {
            return Err(MonitorError::InsufficientCapacity {
                node_id: node.id.clone(),
                requested: amount,
                available,
            });
        }
        *load += amount;
        tracing::debug!(node_id = %node.id, amount, load = *load, "Load assigned");
        Ok(())
    }

    async fn reduce_load(&self, node: &ResourceNode, amount: u32) -> Result<(), MonitorError> {
        let mut registry = self.registry.write().await;
        let load = registry
            .loads
            .get_mut(&node.id)
            .ok_or_else(|| MonitorError::NodeNotFound(node.id.clone()))?;
        *load = load.saturating_sub(amount);
        tracing::debug!(node_id = %node.id, amount, load = *load, "Load reduced");
        Ok(())
    }

    async fn add_node(&self, node: ResourceNode) -> Result<(), MonitorError> {
        let mut registry = self.registry.write().await;
        registry.loads.entry(node.id.clone()).or_insert(0);
        tracing::info!(node_id = %node.id, address = %node.address, capacity = node.capacity, "Node added");
        registry.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    async fn remove_node_by_id(&self, node_id: &str) -> Result<(), MonitorError> {
        let mut registry = self.registry.write().await;
        if registry.nodes.remove(node_id).is_none() {
            return Err(MonitorError::NodeNotFound(node_id.to_string()));
        }
        registry.loads.remove(node_id);
        tracing::info!(node_id, "Node removed");
        Ok(())
    }

    async fn set_node_capacity(&self, node_id: &str, capacity: u32) -> Result<(), MonitorError> {
        let mut registry = self.registry.write().await;
        let node = registry
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| MonitorError::NodeNotFound(node_id.to_string()))?;
        node.capacity = capacity;
        tracing::info!(node_id, capacity, "Node capacity updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, capacity: u32) -> ResourceNode {
        ResourceNode::new(id, format!("http://{}:2001", id), capacity)
    }

    #[tokio::test]
    async fn assign_rejects_load_beyond_capacity() {
        let n1 = node("n1", 4);
        let monitor = AssignmentMonitor::new(vec![n1.clone()]);

        monitor.assign_load(&n1, 3).await.unwrap();
        assert_eq!(
            monitor.assign_load(&n1, 2).await,
            Err(MonitorError::InsufficientCapacity {
                node_id: "n1".to_string(),
                requested: 2,
                available: 1,
            })
        );
        assert_eq!(monitor.get_load(&n1).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn reduce_clamps_at_zero() {
        let n1 = node("n1", 4);
        let monitor = AssignmentMonitor::new(vec![n1.clone()]);

        monitor.assign_load(&n1, 1).await.unwrap();
        monitor.reduce_load(&n1, 5).await.unwrap();
        assert_eq!(monitor.get_load(&n1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_node_errors() {
        let monitor = AssignmentMonitor::default();
        let ghost = node("ghost", 1);
        assert_eq!(
            monitor.assign_load(&ghost, 1).await,
            Err(MonitorError::NodeNotFound("ghost".to_string()))
        );
        assert!(monitor.get_load(&ghost).await.is_err());
        assert!(monitor.remove_node_by_id("ghost").await.is_err());
    }

    #[tokio::test]
    async fn lookup_by_address() {
        let monitor = AssignmentMonitor::new(vec![node("n1", 1), node("n2", 1)]);
        let found = monitor.get_node_by_address("http://n2:2001").await.unwrap();
        assert_eq!(found.id, "n2");
    }
}
