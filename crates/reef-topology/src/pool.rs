//! Named sets of storage nodes used as planner input.

use std::collections::BTreeSet;

use reef_types::StorageNodeId;
use serde::{Deserialize, Serialize};

/// Name of the pool every deployed storage node joins.
pub const DEFAULT_POOL: &str = "AllStorageNodes";

/// A named set of storage nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageNodePool {
    /// Pool name.
    pub name: String,
    /// Members.
    pub members: BTreeSet<StorageNodeId>,
}

impl StorageNodePool {
    /// An empty pool.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: BTreeSet::new(),
        }
    }

    /// Add a member; returns false if it was already present.
    pub fn add(&mut self, sn: StorageNodeId) -> bool {
        self.members.insert(sn)
    }

    /// Remove a member; returns false if it was absent.
    pub fn remove(&mut self, sn: StorageNodeId) -> bool {
        self.members.remove(&sn)
    }

    /// Whether `sn` is a member.
    pub fn contains(&self, sn: StorageNodeId) -> bool {
        self.members.contains(&sn)
    }
}
