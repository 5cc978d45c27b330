//! Topology model for Reef.
//!
//! A [`Topology`] is an immutable-by-convention snapshot of the cluster:
//! zones contain storage nodes, storage nodes host replication nodes and
//! arbiters, replication nodes form shards, and every partition maps to
//! exactly one shard. Planner operations produce new snapshots wrapped in a
//! named [`TopologyCandidate`]; [`invariants::check`] validates them.

mod candidate;
mod error;
pub mod invariants;
mod model;
mod pool;

pub use candidate::TopologyCandidate;
pub use error::TopologyError;
pub use invariants::Violation;
pub use model::{Admin, ArbNode, RepGroup, RepNode, StorageDir, StorageNode, Topology, Zone};
pub use pool::{DEFAULT_POOL, StorageNodePool};
