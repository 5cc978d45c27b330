//! Durable storage for the Reef admin, wrapping Fjall.
//!
//! [`MetaStore`] provides typed accessors over the keyspaces the admin
//! persists. Values are postcard-encoded.
//!
//! - `plans`: [`PlanId`](reef_types::PlanId) (big-endian) → [`Plan`](reef_types::Plan)
//! - `plan_targets`: plan id → target [`Topology`](reef_topology::Topology) of a deploy plan
//! - `candidates`: candidate name → [`TopologyCandidate`](reef_topology::TopologyCandidate)
//! - `pools`: pool name → [`StorageNodePool`](reef_topology::StorageNodePool)
//! - `state`: singletons: the live topology, the parameter store and the
//!   plan id counter

mod error;
mod store;

pub use error::MetaError;
pub use store::MetaStore;
