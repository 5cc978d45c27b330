//! The live topology and parameter store owned by the admin.
//!
//! [`AdminState`] is the executor's [`TopologyCommitter`] and
//! [`ParameterSink`]: commit tasks promote a plan's stored target topology,
//! write-params tasks merge into the parameter store. Both are persisted
//! before the in-memory copy changes.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use reef_meta::{MetaError, MetaStore};
use reef_params::Parameters;
use reef_plan::{NodeError, ParameterSink, TopologyCommitter};
use reef_topology::Topology;
use reef_types::{ParameterMap, PlanId, ServiceId};
use tracing::{debug, info};

/// Shared live state of the store.
pub struct AdminState {
    meta: Arc<MetaStore>,
    topology: Mutex<Topology>,
    params: Mutex<Parameters>,
}

impl AdminState {
    /// Load the persisted topology and parameters, or start empty.
    pub fn load(meta: Arc<MetaStore>, store_name: &str) -> Result<Self, MetaError> {
        let topology = match meta.get_topology()? {
            Some(topo) => topo,
            None => Topology::new(store_name),
        };
        let params = meta.get_parameters()?.unwrap_or_default();
        debug!(
            sequence = topology.sequence,
            storage_nodes = topology.storage_nodes.len(),
            "loaded admin state"
        );
        Ok(Self {
            meta,
            topology: Mutex::new(topology),
            params: Mutex::new(params),
        })
    }

    /// A copy of the live topology.
    pub fn topology(&self) -> Topology {
        self.topology.lock().expect("topology lock poisoned").clone()
    }

    /// A copy of the parameter store.
    pub fn parameters(&self) -> Parameters {
        self.params.lock().expect("params lock poisoned").clone()
    }

    /// Promote `target` to be the live topology.
    ///
    /// Promoting the topology that is already live is a no-op. Otherwise
    /// `target` must be exactly one sequence ahead of the live topology.
    /// Parameters of services the target no longer contains are dropped.
    pub fn promote(&self, plan: PlanId, target: Topology) -> Result<u64, NodeError> {
        let mut current = self.topology.lock().expect("topology lock poisoned");
        if *current == target {
            debug!(plan_id = %plan, sequence = current.sequence, "topology already committed");
            return Ok(current.sequence);
        }
        if target.sequence != current.sequence + 1 {
            return Err(NodeError::Fatal(format!(
                "target of plan {plan} has sequence {}, live topology is at {}",
                target.sequence, current.sequence
            )));
        }

        let gone: Vec<ServiceId> = services(&current)
            .difference(&services(&target))
            .copied()
            .collect();
        if !gone.is_empty() {
            let mut params = self.params.lock().expect("params lock poisoned");
            let mut next = params.clone();
            for service in &gone {
                next.forget(*service);
            }
            self.meta.put_parameters(&next).map_err(fatal)?;
            *params = next;
        }

        self.meta.put_topology(&target).map_err(fatal)?;
        *current = target;
        info!(
            plan_id = %plan,
            sequence = current.sequence,
            forgotten = gone.len(),
            "live topology replaced"
        );
        Ok(current.sequence)
    }

    /// Merge parameter changes for one service and persist them.
    pub fn merge_parameters(
        &self,
        service: ServiceId,
        changes: &ParameterMap,
    ) -> Result<Vec<String>, MetaError> {
        let mut params = self.params.lock().expect("params lock poisoned");
        let mut next = params.clone();
        let changed = next.merge(service, changes);
        if !changed.is_empty() {
            self.meta.put_parameters(&next)?;
            *params = next;
        }
        Ok(changed)
    }
}

#[async_trait::async_trait]
impl TopologyCommitter for AdminState {
    async fn commit(&self, plan: PlanId) -> Result<u64, NodeError> {
        let target = self
            .meta
            .get_plan_target(plan)
            .map_err(fatal)?
            .ok_or_else(|| NodeError::Fatal(format!("plan {plan} has no target topology")))?;
        self.promote(plan, target)
    }

    fn current_sequence(&self) -> u64 {
        self.topology.lock().expect("topology lock poisoned").sequence
    }
}

#[async_trait::async_trait]
impl ParameterSink for AdminState {
    async fn record(
        &self,
        plan: PlanId,
        service: ServiceId,
        params: &ParameterMap,
    ) -> Result<Vec<String>, NodeError> {
        let changed = self.merge_parameters(service, params).map_err(fatal)?;
        debug!(plan_id = %plan, %service, changed = changed.len(), "parameters recorded");
        Ok(changed)
    }
}

/// Every service a topology defines, storage node agents included.
fn services(topo: &Topology) -> BTreeSet<ServiceId> {
    let mut out: BTreeSet<ServiceId> = BTreeSet::new();
    out.extend(topo.storage_nodes.keys().map(|sn| ServiceId::StorageNode(*sn)));
    out.extend(topo.rep_nodes.keys().map(|rn| ServiceId::RepNode(*rn)));
    out.extend(topo.arb_nodes.keys().map(|an| ServiceId::ArbNode(*an)));
    out.extend(topo.admins.keys().map(|a| ServiceId::Admin(*a)));
    out
}

fn fatal(e: MetaError) -> NodeError {
    NodeError::Fatal(e.to_string())
}
