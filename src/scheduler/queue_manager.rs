use std::collections::HashMap;

use crate::error::QueueManagerError;
use crate::mapping::QueueMapping;

/// Named queues, each with an ordered list of the node ids that serve it.
///
/// List order is the scan order for node selection. A node that has just been
/// given a job is moved to the tail, so the least recently used node is tried
/// first next time.
#[derive(Debug, Clone, Default)]
pub struct LruQueueManager {
    queues: HashMap<String, Vec<String>>,
}

impl LruQueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_mapping(mapping: QueueMapping) -> Self {
        Self { queues: mapping }
    }

    /// Node ids serving `queue`, in current scan order.
    pub fn nodes(&self, queue: &str) -> Result<&[String], QueueManagerError> {
        self.queues
            .get(queue)
            .map(|nodes| nodes.as_slice())
            .ok_or_else(|| QueueManagerError::UnknownQueue(queue.to_string()))
    }

    /// Copy of every queue's node list.
    pub fn mapping(&self) -> QueueMapping {
        self.queues.clone()
    }

    /// Queue names, sorted.
    pub fn queues(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Queues `node_id` serves, sorted.
    pub fn queues_with_node(&self, node_id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, nodes)| nodes.iter().any(|id| id == node_id))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn contains_queue(&self, queue: &str) -> bool {
        self.queues.contains_key(queue)
    }

    pub fn add_queue(&mut self, queue: &str) -> Result<(), QueueManagerError> {
        if self.queues.contains_key(queue) {
            return Err(QueueManagerError::QueueExists(queue.to_string()));
        }
        self.queues.insert(queue.to_string(), Vec::new());
        Ok(())
    }

    pub fn remove_queue(&mut self, queue: &str) -> Result<(), QueueManagerError> {
        self.queues
            .remove(queue)
            .map(|_| ())
            .ok_or_else(|| QueueManagerError::UnknownQueue(queue.to_string()))
    }

    /// Append `node_id` to the tail of `queue`. Adding a node that is already
    /// in the queue leaves its position unchanged.
    pub fn add_node_to_queue(&mut self, node_id: &str, queue: &str) -> Result<(), QueueManagerError> {
        let nodes = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueManagerError::UnknownQueue(queue.to_string()))?;
        if !nodes.iter().any(|id| id == node_id) {
            nodes.push(node_id.to_string());
        }
        Ok(())
    }

    pub fn remove_node_from_queue(&mut self, node_id: &str, queue: &str) -> Result<(), QueueManagerError> {
        let nodes = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueManagerError::UnknownQueue(queue.to_string()))?;
        nodes.retain(|id| id != node_id);
        Ok(())
    }

    /// Remove `node_id` from every queue. Returns the queues it was removed from.
    pub fn remove_node(&mut self, node_id: &str) -> Vec<String> {
        let mut affected = Vec::new();
        for (name, nodes) in self.queues.iter_mut() {
            let before = nodes.len();
            nodes.retain(|id| id != node_id);
            if nodes.len() != before {
                affected.push(name.clone());
            }
        }
        affected.sort();
        affected
    }

    /// Record that `node_id` was just used for `queue`: move it to the tail.
    pub fn used_node(&mut self, queue: &str, node_id: &str) -> Result<(), QueueManagerError> {
        let nodes = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueManagerError::UnknownQueue(queue.to_string()))?;
        if let Some(index) = nodes.iter().position(|id| id == node_id) {
            let id = nodes.remove(index);
            nodes.push(id);
        }
        Ok(())
    }
}
