//! Error types for topology edits.

use reef_types::{AdminId, ArbNodeId, PartitionId, RepGroupId, RepNodeId, StorageNodeId, ZoneId};

/// Errors returned when editing a [`Topology`](crate::Topology).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// Zone id not present.
    #[error("unknown zone {0}")]
    UnknownZone(ZoneId),

    /// No zone has this name.
    #[error("unknown zone name {0:?}")]
    UnknownZoneName(String),

    /// A zone with this name already exists.
    #[error("zone {0:?} already exists")]
    DuplicateZone(String),

    /// Storage node id not present.
    #[error("unknown storage node {0}")]
    UnknownStorageNode(StorageNodeId),

    /// Shard id not present.
    #[error("unknown shard {0}")]
    UnknownShard(RepGroupId),

    /// Replication node id not present.
    #[error("unknown replication node {0}")]
    UnknownRepNode(RepNodeId),

    /// Arbiter id not present.
    #[error("unknown arbiter {0}")]
    UnknownArbNode(ArbNodeId),

    /// Admin id not present.
    #[error("unknown admin {0}")]
    UnknownAdmin(AdminId),

    /// Partition id not present.
    #[error("unknown partition {0}")]
    UnknownPartition(PartitionId),

    /// The storage node still hosts services.
    #[error("storage node {sn} still hosts {count} service(s)")]
    StorageNodeInUse {
        /// The storage node.
        sn: StorageNodeId,
        /// Number of RNs, arbiters and admins it hosts.
        count: usize,
    },

    /// The shard still has members or partitions.
    #[error("shard {0} is not empty")]
    ShardInUse(RepGroupId),

    /// The storage directory is not declared on the storage node.
    #[error("storage directory {path:?} is not declared on {sn}")]
    UnknownStorageDir {
        /// The storage node.
        sn: StorageNodeId,
        /// Directory path.
        path: String,
    },
}
