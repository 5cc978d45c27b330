//! Policy defaults plus per-resource overrides.

use std::collections::BTreeMap;

use reef_topology::Topology;
use reef_types::params::keys;
use reef_types::{ParameterMap, RepNodeId, ServiceId, StorageNodeId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calc::RnSizing;
use crate::error::ParamsError;

/// Default policy values applied beneath every override.
pub fn default_policy() -> ParameterMap {
    ParameterMap::new()
        .with(keys::RN_HEAP_PERCENT, 85u64)
        .with(keys::RN_HEAP_MAX_MB, 32_768u64)
        .with(keys::SYSTEM_RESERVED_MB, 1_024u64)
        .with(keys::RN_CACHE_PERCENT, 70u64)
        .with(keys::GC_THREAD_FLOOR, 4u64)
        .with(keys::GC_THREAD_THRESHOLD, 8u64)
        .with(keys::GC_THREAD_PERCENT, 62u64)
        .with(keys::ENDPOINT_GROUP_PERCENT, 100u64)
        .with(keys::WAIT_TIMEOUT_SECS, 120u64)
}

/// Parameter store for every admin, storage node, RN and arbiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters {
    /// Store-wide policy defaults.
    pub policy: ParameterMap,
    overrides: BTreeMap<ServiceId, ParameterMap>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self::new(default_policy())
    }
}

impl Parameters {
    /// Create a store with the given policy and no overrides.
    pub fn new(policy: ParameterMap) -> Self {
        Self {
            policy,
            overrides: BTreeMap::new(),
        }
    }

    /// Per-resource overrides (empty if none were set).
    pub fn overrides(&self, service: ServiceId) -> ParameterMap {
        self.overrides.get(&service).cloned().unwrap_or_default()
    }

    /// Policy overlaid with the resource's overrides.
    pub fn effective(&self, service: ServiceId) -> ParameterMap {
        match self.overrides.get(&service) {
            Some(map) => self.policy.overlay(map),
            None => self.policy.clone(),
        }
    }

    /// Merge `changes` into a resource's overrides; returns changed keys.
    pub fn merge(&mut self, service: ServiceId, changes: &ParameterMap) -> Vec<String> {
        let entry = self.overrides.entry(service).or_default();
        let merged = entry.overlay(changes);
        let changed = entry.changed_keys(&merged);
        *entry = merged;
        if !changed.is_empty() {
            debug!(%service, keys = ?changed, "parameters changed");
        }
        changed
    }

    /// Replace a resource's overrides wholesale.
    pub fn replace(&mut self, service: ServiceId, map: ParameterMap) {
        self.overrides.insert(service, map);
    }

    /// Drop every override of a removed resource.
    pub fn forget(&mut self, service: ServiceId) -> Option<ParameterMap> {
        self.overrides.remove(&service)
    }

    /// Resources with overrides, in id order.
    pub fn services(&self) -> impl Iterator<Item = ServiceId> + '_ {
        self.overrides.keys().copied()
    }

    /// Compute RN sizing for every RN hosted on `sn` in `topo`.
    ///
    /// All RNs on one storage node receive identical values.
    pub fn size_rep_nodes(
        &self,
        topo: &Topology,
        sn: StorageNodeId,
    ) -> Result<Vec<(RepNodeId, ParameterMap)>, ParamsError> {
        let node = topo.storage_node(sn)?;
        let sn_params = self
            .effective(ServiceId::StorageNode(sn))
            .with(keys::CAPACITY, u64::from(node.capacity));
        validate_storage_node(&sn_params)?;
        let sizing = RnSizing::for_storage_node(&sn_params, topo.hosted_count(sn) as u64);
        Ok(topo
            .rep_nodes_on(sn)
            .into_iter()
            .map(|rn| {
                let mut map = self.overrides(ServiceId::RepNode(rn));
                sizing.apply(&mut map);
                (rn, map)
            })
            .collect())
    }
}

/// Reject storage node parameters that cannot yield a usable RN.
pub fn validate_storage_node(params: &ParameterMap) -> Result<(), ParamsError> {
    check_percent(params, keys::RN_HEAP_PERCENT, 1, 95)?;
    check_percent(params, keys::RN_CACHE_PERCENT, 1, 90)?;
    check_percent(params, keys::GC_THREAD_PERCENT, 0, 100)?;
    if let (Some(memory), Some(reserved)) = (
        params.get_u64(keys::MEMORY_MB),
        params.get_u64(keys::SYSTEM_RESERVED_MB),
    ) {
        if memory != 0 && reserved >= memory {
            return Err(ParamsError::InvalidValue {
                key: keys::SYSTEM_RESERVED_MB.to_string(),
                value: reserved.to_string(),
                reason: format!("reserves all {memory} MB of memory"),
            });
        }
    }
    Ok(())
}

fn check_percent(params: &ParameterMap, key: &str, min: u64, max: u64) -> Result<(), ParamsError> {
    match params.get_u64(key) {
        Some(v) if v < min || v > max => Err(ParamsError::InvalidValue {
            key: key.to_string(),
            value: v.to_string(),
            reason: format!("must be between {min} and {max}"),
        }),
        _ => Ok(()),
    }
}
