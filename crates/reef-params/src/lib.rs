//! Parameters and replication node sizing for Reef.
//!
//! [`Parameters`] holds a policy map plus per-resource overrides for every
//! admin, storage node, replication node and arbiter. The [`calc`] module
//! derives RN heap, cache and thread counts from a storage node's capacity,
//! memory and CPU count.

pub mod calc;
mod error;
mod store;

pub use calc::{
    RnSizing, calc_cache_bytes, calc_endpoint_group_threads, calc_gc_threads, calc_rn_heap_mb,
};
pub use error::ParamsError;
pub use store::{Parameters, default_policy, validate_storage_node};
