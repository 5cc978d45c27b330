//! Error types for planner operations.

use reef_topology::TopologyError;
use reef_types::{RepGroupId, ServiceId, StorageNodeId, ZoneId};

/// Errors returned by topology planner operations. A failed operation
/// leaves the candidate unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlannerError {
    /// Malformed or contradictory arguments.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Not enough storage nodes, zones or capacity to satisfy the request.
    #[error("not enough resources: {0}")]
    InsufficientResources(String),

    /// A primary zone's replication factor cannot be lowered directly.
    #[error(
        "cannot reduce replication factor of primary zone {zone} from {old} to {new} \
         (reduction of {}); convert it to a secondary zone first",
        .old - .new
    )]
    RepFactorReduction {
        /// Zone name.
        zone: String,
        /// Current replication factor.
        old: u32,
        /// Requested replication factor.
        new: u32,
    },

    /// The total primary replication factor would drop below quorum support.
    #[error("total primary replication factor cannot drop from {old} to {new}")]
    PrimaryQuorumReduction {
        /// Current total.
        old: u32,
        /// Resulting total.
        new: u32,
    },

    /// Storage nodes can only be migrated within their zone.
    #[error("cannot migrate {source_sn} in {source_zone} to {target_sn} in {target_zone}")]
    CrossZoneMigration {
        /// Storage node being migrated.
        source_sn: StorageNodeId,
        /// Its zone.
        source_zone: ZoneId,
        /// Requested destination.
        target_sn: StorageNodeId,
        /// Destination zone.
        target_zone: ZoneId,
    },

    /// The migration source must be shut down first.
    #[error("{0} is still running; shut it down before migrating")]
    SourceStillRunning(StorageNodeId),

    /// The migration destination already hosts services.
    #[error("{0} already hosts services")]
    TargetInUse(StorageNodeId),

    /// A shard to remove still has reachable members.
    #[error("shard {shard} still has reachable member {service}; stop it first")]
    ShardReachable {
        /// The shard.
        shard: RepGroupId,
        /// A reachable member.
        service: ServiceId,
    },

    /// The topology references an unknown resource.
    #[error(transparent)]
    Topology(#[from] TopologyError),
}
