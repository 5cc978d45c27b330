//! Topology planner for Reef.
//!
//! Every operation works on a [`TopologyCandidate`](reef_topology::TopologyCandidate):
//! it computes a new layout on a copy and, only on success, replaces the
//! candidate's topology and appends to its change log. Nothing here touches
//! live nodes; deploying a candidate is a plan.
//!
//! Placement rules shared by all operations live in [`placement`]: the
//! least-loaded eligible storage node hosts each new replica, and the
//! smallest sufficiently sized free directory backs it.

mod diff;
mod error;
mod layout;
mod moves;
pub mod placement;
mod zones;


pub use diff::{RnPlacement, RnRelocation, TopologyDiff};
pub use error::PlannerError;
pub use layout::{contract, create, rebalance, redistribute};
pub use moves::{migrate_storage_node, move_partition, move_rep_node, remove_failed_shard};
pub use placement::Pool;
pub use zones::{change_repfactor, change_zone_type, check_primary_reduction, quorum};
