use serde::{Deserialize, Serialize};

/// An addressable compute endpoint with a fixed capacity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: String,
    pub address: String,
    pub capacity: u32,
}

impl ResourceNode {
    pub fn new(id: impl Into<String>, address: impl Into<String>, capacity: u32) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            capacity,
        }
    }
}

impl std::fmt::Display for ResourceNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, capacity {})", self.id, self.address, self.capacity)
    }
}
