//! [`Admin`]: the admin service that ties the control plane together.
//!
//! An `Admin` owns the live state, the plan manager and the collaborators
//! used to reach storage nodes, and exposes plan creation and control,
//! topology candidate operations and verification.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use reef_meta::MetaStore;
use reef_params::Parameters;
use reef_plan::{
    Executor, FaultHook, NoFaults, NodeControl, ParameterSink, PlanDraft, PlanManager,
    ServiceStatus, TopologyCommitter,
};
use reef_topology::Topology;
use reef_types::events::EventBus;
use reef_types::{LockSet, Plan, PlanId, PlanKind, PlanState, ResultCode, ServiceId, Task};
use reef_verify::{Prober, VerifyReport, deploy_check, hosted_services};
use tokio::time::Duration;
use tracing::{info, warn};

use crate::config::AdminConfig;
use crate::error::{AdminError, Result};
use crate::state::AdminState;

/// External collaborators an admin drives.
pub struct Collaborators {
    /// Control of storage node agents.
    pub nodes: Arc<dyn NodeControl>,
    /// Read-only status probes.
    pub prober: Arc<dyn Prober>,
    /// Fault injection consulted before every task.
    pub faults: Arc<dyn FaultHook>,
    /// Bus for plan, task and topology events.
    pub event_bus: EventBus,
}

impl Collaborators {
    /// Collaborators with no fault injection and a private event bus.
    pub fn new(nodes: Arc<dyn NodeControl>, prober: Arc<dyn Prober>) -> Self {
        Self {
            nodes,
            prober,
            faults: Arc::new(NoFaults),
            event_bus: EventBus::new(),
        }
    }

    /// Install a fault hook.
    pub fn with_faults(mut self, faults: Arc<dyn FaultHook>) -> Self {
        self.faults = faults;
        self
    }

    /// Use a shared event bus.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = bus;
        self
    }
}

/// The admin service.
pub struct Admin {
    pub(crate) config: AdminConfig,
    pub(crate) meta: Arc<MetaStore>,
    pub(crate) state: Arc<AdminState>,
    pub(crate) manager: Arc<PlanManager>,
    pub(crate) prober: Arc<dyn Prober>,
    /// Serializes read-modify-write of candidates and pools.
    pub(crate) catalog: Mutex<()>,
}

impl Admin {
    /// Open the admin over `meta`.
    ///
    /// Plans left running by a previous admin are moved to INTERRUPTED and
    /// must be re-executed explicitly.
    pub fn open(config: AdminConfig, meta: Arc<MetaStore>, parts: Collaborators) -> Result<Self> {
        let state = Arc::new(AdminState::load(Arc::clone(&meta), &config.store_name)?);
        let executor = Executor::new(
            parts.nodes,
            Arc::clone(&state) as Arc<dyn TopologyCommitter>,
            Arc::clone(&state) as Arc<dyn ParameterSink>,
            config.executor.clone(),
        )
        .with_faults(parts.faults)
        .with_event_bus(parts.event_bus);
        let manager = PlanManager::new(Arc::clone(&meta), executor);

        let recovered = manager.recover()?;
        if !recovered.is_empty() {
            warn!(plans = ?recovered, "plans interrupted by admin failover");
        }
        info!(
            store = %config.store_name,
            sequence = state.topology().sequence,
            "admin opened"
        );

        Ok(Self {
            config,
            meta,
            state,
            manager,
            prober: parts.prober,
            catalog: Mutex::new(()),
        })
    }

    /// Admin configuration.
    pub fn config(&self) -> &AdminConfig {
        &self.config
    }

    /// The backing store.
    pub fn meta(&self) -> &Arc<MetaStore> {
        &self.meta
    }

    /// The bus plan, task and topology events are emitted on.
    pub fn event_bus(&self) -> &EventBus {
        self.manager.event_bus()
    }

    /// A copy of the live topology.
    pub fn current_topology(&self) -> Topology {
        self.state.topology()
    }

    /// A copy of the parameter store.
    pub fn parameters(&self) -> Parameters {
        self.state.parameters()
    }

    // ------------------------------------------------------------------
    // Plan control
    // ------------------------------------------------------------------

    /// PENDING -> APPROVED.
    pub async fn approve_plan(&self, id: PlanId) -> Result<()> {
        Ok(self.manager.approve(id).await?)
    }

    /// Start executing a plan. Returns once it is RUNNING.
    ///
    /// Deploy-topology plans first run the deploy checks against their
    /// target; `force` skips them.
    pub async fn execute_plan(&self, id: PlanId, force: bool) -> Result<()> {
        let plan = self.manager.get(id)?;
        if plan.kind == PlanKind::DeployTopology && plan.state.is_executable() {
            if force {
                warn!(plan_id = %id, "deploy checks skipped");
            } else if let Some(target) = self.meta.get_plan_target(id)? {
                let problems = deploy_check(&target);
                if !problems.is_empty() {
                    warn!(plan_id = %id, problems = problems.len(), "deploy checks failed");
                    return Err(AdminError::DeployBlocked { plan: id, problems });
                }
            }
        }
        Ok(self.manager.execute(id).await?)
    }

    /// Wait until the plan settles or `timeout` passes; returns the state
    /// it is in.
    pub async fn await_plan(&self, id: PlanId, timeout: Duration) -> Result<PlanState> {
        Ok(self.manager.await_plan(id, timeout).await?)
    }

    /// Wait like [`Admin::await_plan`] and report the boundary code.
    pub async fn await_plan_result(
        &self,
        id: PlanId,
        timeout: Duration,
    ) -> Result<(PlanState, ResultCode)> {
        let state = self.await_plan(id, timeout).await?;
        Ok((state, ResultCode::for_state(state)))
    }

    /// Cancel a plan that is not running.
    pub async fn cancel_plan(&self, id: PlanId) -> Result<()> {
        Ok(self.manager.cancel(id).await?)
    }

    /// Ask a running plan to stop after its current task.
    pub async fn interrupt_plan(&self, id: PlanId) -> Result<PlanState> {
        Ok(self.manager.interrupt(id).await?)
    }

    /// Look up a plan.
    pub fn get_plan(&self, id: PlanId) -> Result<Plan> {
        Ok(self.manager.get(id)?)
    }

    /// Plans with ids in `start..=end`.
    pub fn plan_range(&self, start: PlanId, end: PlanId) -> Result<Vec<Plan>> {
        Ok(self.manager.range(start, end)?)
    }

    /// All plan ids in ascending order.
    pub fn plan_ids(&self) -> Result<Vec<PlanId>> {
        Ok(self.manager.ids()?)
    }

    /// Plans currently executing.
    pub fn running_plans(&self) -> Vec<PlanId> {
        self.manager.running()
    }

    /// Delete the oldest finished plans beyond the configured retention.
    pub fn prune_plans(&self) -> Result<Vec<PlanId>> {
        Ok(self.manager.prune(self.config.plan_retention)?)
    }

    // ------------------------------------------------------------------
    // Verification
    // ------------------------------------------------------------------

    /// Audit the live topology, parameters and every service.
    pub async fn verify_configuration(&self) -> VerifyReport {
        let topo = self.state.topology();
        let params = self.state.parameters();
        reef_verify::verify(&topo, &params, self.prober.as_ref(), &self.config.verify).await
    }

    // ------------------------------------------------------------------
    // Helpers shared by plan builders
    // ------------------------------------------------------------------

    /// Services in `topo` that report running. Services on an unreachable
    /// storage node are not probed.
    pub(crate) async fn reachable(&self, topo: &Topology) -> BTreeSet<ServiceId> {
        let mut up = BTreeSet::new();
        for sn in topo.storage_nodes.keys() {
            let agent = ServiceId::StorageNode(*sn);
            if !matches!(self.prober.status(agent, *sn).await, Ok(ServiceStatus::Running)) {
                continue;
            }
            up.insert(agent);
            for service in hosted_services(topo, *sn) {
                if matches!(
                    self.prober.status(service, *sn).await,
                    Ok(ServiceStatus::Running)
                ) {
                    up.insert(service);
                }
            }
        }
        up
    }

    /// Create a plan. When `target` is given it is pinned one sequence
    /// ahead of the live topology and stored for the commit task.
    pub(crate) fn submit(
        &self,
        name: &str,
        kind: PlanKind,
        tasks: Vec<Task>,
        locks: LockSet,
        target: Option<Topology>,
    ) -> Result<PlanId> {
        let mut draft = PlanDraft::new(name, kind, tasks, locks);
        if let Some(owner) = &self.config.owner {
            draft = draft.owner(owner.clone());
        }
        let target = match target {
            Some(mut topo) => {
                let base = self.state.topology().sequence;
                topo.sequence = base + 1;
                draft = draft.base_topology_seq(base);
                Some(topo)
            }
            None => None,
        };
        let id = self.manager.create(draft)?;
        if let Some(topo) = &target {
            self.meta.put_plan_target(id, topo)?;
        }
        Ok(id)
    }
}
