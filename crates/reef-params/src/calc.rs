//! Pure sizing functions for replication nodes.
//!
//! Every RN on a storage node gets the same heap, cache and thread sizing:
//! the node's memory and CPUs are split evenly across
//! `max(capacity, hosted)` slots.

use reef_types::ParameterMap;
use reef_types::params::keys;
use serde::{Deserialize, Serialize};

const MB: u64 = 1024 * 1024;

/// Heap per RN in megabytes, or `None` when the node's memory is unknown.
///
/// `min(max_heap_mb, (memory_mb - reserved_mb) * heap_percent / 100 / max(capacity, hosted))`
pub fn calc_rn_heap_mb(
    memory_mb: u64,
    reserved_mb: u64,
    heap_percent: u64,
    max_heap_mb: u64,
    capacity: u64,
    hosted: u64,
) -> Option<u64> {
    if memory_mb == 0 {
        return None;
    }
    let slots = capacity.max(hosted).max(1);
    let usable = memory_mb.saturating_sub(reserved_mb);
    let heap = usable.saturating_mul(heap_percent) / 100 / slots;
    Some(heap.min(max_heap_mb))
}

/// Storage engine cache per RN in bytes; the cache lives inside the heap.
pub fn calc_cache_bytes(heap_mb: u64, cache_percent: u64) -> u64 {
    (heap_mb.saturating_mul(MB) / 100).saturating_mul(cache_percent)
}

/// Parallel GC threads per RN.
///
/// Zero CPUs disables thread tuning and yields 0. Otherwise the CPUs are
/// divided across `capacity` RNs; past `threshold` only `percent` of the
/// extra CPUs count. The result is raised to `floor` but never exceeds the
/// CPU count, which wins when `floor > cpus`.
pub fn calc_gc_threads(cpus: u64, capacity: u64, floor: u64, threshold: u64, percent: u64) -> u64 {
    if cpus == 0 {
        return 0;
    }
    let per_rn = cpus / capacity.max(1);
    let default = if per_rn <= threshold {
        per_rn
    } else {
        threshold + (per_rn - threshold) * percent / 100
    };
    default.max(floor).min(cpus)
}

/// Threads in the network endpoint group.
pub fn calc_endpoint_group_threads(cpus: u64, percent: u64) -> u64 {
    (cpus * percent / 100).max(1)
}

/// Computed sizing for every RN on one storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RnSizing {
    /// Heap in megabytes, `None` if the node's memory is unknown.
    pub heap_mb: Option<u64>,
    /// Cache in bytes, `None` if the heap is unknown.
    pub cache_bytes: Option<u64>,
    /// Parallel GC threads, 0 when thread tuning is disabled.
    pub gc_threads: u64,
    /// Endpoint group threads.
    pub endpoint_threads: u64,
}

impl RnSizing {
    /// Size RNs from a storage node's effective parameters and the number
    /// of services it hosts.
    pub fn for_storage_node(sn_params: &ParameterMap, hosted: u64) -> Self {
        let capacity = sn_params.u64_or(keys::CAPACITY, 1);
        let cpus = sn_params.u64_or(keys::NUM_CPUS, 0);
        let heap_mb = calc_rn_heap_mb(
            sn_params.u64_or(keys::MEMORY_MB, 0),
            sn_params.u64_or(keys::SYSTEM_RESERVED_MB, 0),
            sn_params.u64_or(keys::RN_HEAP_PERCENT, 85),
            sn_params.u64_or(keys::RN_HEAP_MAX_MB, u64::MAX),
            capacity,
            hosted,
        );
        let cache_bytes =
            heap_mb.map(|h| calc_cache_bytes(h, sn_params.u64_or(keys::RN_CACHE_PERCENT, 70)));
        let gc_threads = calc_gc_threads(
            cpus,
            capacity,
            sn_params.u64_or(keys::GC_THREAD_FLOOR, 4),
            sn_params.u64_or(keys::GC_THREAD_THRESHOLD, 8),
            sn_params.u64_or(keys::GC_THREAD_PERCENT, 62),
        );
        let endpoint_threads =
            calc_endpoint_group_threads(cpus, sn_params.u64_or(keys::ENDPOINT_GROUP_PERCENT, 100));
        Self {
            heap_mb,
            cache_bytes,
            gc_threads,
            endpoint_threads,
        }
    }

    /// Write the computed values into an RN parameter map. Unknown values
    /// remove any stale entry.
    pub fn apply(&self, rn_params: &mut ParameterMap) {
        match self.heap_mb {
            Some(heap) => {
                rn_params.set(keys::JVM_HEAP_MB, heap);
            }
            None => {
                rn_params.remove(keys::JVM_HEAP_MB);
            }
        }
        match self.cache_bytes {
            Some(cache) => {
                rn_params.set(keys::CACHE_SIZE, cache);
            }
            None => {
                rn_params.remove(keys::CACHE_SIZE);
            }
        }
        if self.gc_threads == 0 {
            rn_params.remove(keys::PARALLEL_GC_THREADS);
        } else {
            rn_params.set(keys::PARALLEL_GC_THREADS, self.gc_threads);
        }
        rn_params.set(keys::ENDPOINT_GROUP_THREADS, self.endpoint_threads);
    }
}
