//! Per-resource key/value parameter maps.
//!
//! Parameters for every admin, storage node, replication node and arbiter
//! are a policy default map overlaid with per-resource overrides. The
//! well-known keys live in [`keys`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known parameter names.
pub mod keys {
    /// Maximum number of replication/arbiter nodes an SN hosts.
    pub const CAPACITY: &str = "capacity";
    /// Physical memory of the SN in megabytes. 0 means unknown.
    pub const MEMORY_MB: &str = "memoryMB";
    /// Number of CPUs on the SN. 0 disables thread tuning.
    pub const NUM_CPUS: &str = "numCPUs";
    /// Percentage of SN memory given to RN heaps.
    pub const RN_HEAP_PERCENT: &str = "rnHeapPercent";
    /// Upper bound for a single RN heap, in megabytes.
    pub const RN_HEAP_MAX_MB: &str = "rnHeapMaxMB";
    /// Memory held back for non-RN processes, in megabytes.
    pub const SYSTEM_RESERVED_MB: &str = "systemReservedMB";
    /// Percentage of the RN heap given to the storage engine cache.
    pub const RN_CACHE_PERCENT: &str = "rnCachePercent";
    /// Lower bound for GC threads per RN.
    pub const GC_THREAD_FLOOR: &str = "gcThreadFloor";
    /// CPU count above which only a fraction of CPUs get GC threads.
    pub const GC_THREAD_THRESHOLD: &str = "gcThreadThreshold";
    /// Fraction (percent) of CPUs above the threshold given GC threads.
    pub const GC_THREAD_PERCENT: &str = "gcThreadPercent";
    /// Percentage of CPUs used for the network endpoint group.
    pub const ENDPOINT_GROUP_PERCENT: &str = "endpointGroupPercent";
    /// Computed JVM heap size of an RN, megabytes.
    pub const JVM_HEAP_MB: &str = "jvmHeapMB";
    /// Computed storage engine cache size of an RN, bytes.
    pub const CACHE_SIZE: &str = "cacheSize";
    /// Computed parallel GC thread count of an RN.
    pub const PARALLEL_GC_THREADS: &str = "parallelGCThreads";
    /// Computed endpoint group thread count.
    pub const ENDPOINT_GROUP_THREADS: &str = "endpointGroupThreads";
    /// Whether a service is administratively disabled (not restarted).
    pub const DISABLED: &str = "disabled";
    /// Seconds to wait for a newly started service to answer.
    pub const WAIT_TIMEOUT_SECS: &str = "waitTimeoutSecs";
}

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamValue {
    /// Unsigned integer value.
    Int(u64),
    /// Boolean flag.
    Bool(bool),
    /// Free-form string.
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Str(v) => f.write_str(v),
        }
    }
}

impl From<u64> for ParamValue {
    fn from(v: u64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

/// Ordered map of parameter name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMap {
    entries: BTreeMap<String, ParamValue>,
}

impl ParameterMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Insert or replace a value, returning the previous one.
    pub fn set(&mut self, key: &str, value: impl Into<ParamValue>) -> Option<ParamValue> {
        self.entries.insert(key.to_string(), value.into())
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        self.entries.remove(key)
    }

    /// Look up a raw value.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.get(key)
    }

    /// Look up an integer value.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.entries.get(key) {
            Some(ParamValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Look up an integer value, falling back to `default`.
    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.get_u64(key).unwrap_or(default)
    }

    /// Look up a boolean value.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key) {
            Some(ParamValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Look up a string value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(ParamValue::Str(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Return a new map with `overrides` laid over `self`.
    pub fn overlay(&self, overrides: &ParameterMap) -> ParameterMap {
        let mut merged = self.clone();
        for (k, v) in &overrides.entries {
            merged.entries.insert(k.clone(), v.clone());
        }
        merged
    }

    /// Names of keys whose values differ between `self` and `other`.
    pub fn changed_keys(&self, other: &ParameterMap) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(k, v)| other.entries.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        for k in other.entries.keys() {
            if !self.entries.contains_key(k) {
                keys.push(k.clone());
            }
        }
        keys.sort();
        keys
    }

    /// Iterate over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
