//! Shared test harness for Reef integration tests.
//!
//! Provides [`TestCluster`], an admin over a temporary metadata store whose
//! storage node agents are simulated by [`MockNodeControl`]. The mock
//! supports down nodes, transient and fatal service failures, storage usage
//! reports and a gate that holds `start_service` calls mid-flight so tests
//! can observe running plans.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reef_admin::{Admin, AdminConfig, Collaborators, StorageNodeSpec, ZoneSpec};
use reef_meta::MetaStore;
use reef_plan::{ExecutorConfig, NodeControl, NodeError, OneShotFaults, RetryPolicy, ServiceStatus};
use reef_topology::{DEFAULT_POOL, StorageDir};
use reef_types::params::keys;
use reef_types::{
    ParameterMap, PartitionId, PlanId, PlanState, RepGroupId, ServiceId, StorageNodeId, ZoneId,
};
use reef_verify::{Prober, StorageUsage};
use tokio::sync::Semaphore;
use tokio::time::Duration;

/// How long tests wait for a plan to settle.
pub const WAIT: Duration = Duration::from_secs(10);

/// Size of every storage directory the harness declares.
pub const DIR_SIZE: u64 = 100 << 30;

// =========================================================================
// Mock node control
// =========================================================================

#[derive(Default)]
struct Nodes {
    registered: HashSet<StorageNodeId>,
    deployed: HashSet<ServiceId>,
    running: HashSet<ServiceId>,
    down: HashSet<StorageNodeId>,
    /// Remaining transient start failures per service.
    flaky: HashMap<ServiceId, u32>,
    /// Services whose start fails fatally.
    broken: HashSet<ServiceId>,
    /// Services whose start succeeds but which never come up.
    stillborn: HashSet<ServiceId>,
    usage: HashMap<(StorageNodeId, String), StorageUsage>,
}

/// In-memory storage node agents.
///
/// Registered agents run until their node is taken down. Every call is
/// logged as a short string such as `"start rg1-rn1"`.
pub struct MockNodeControl {
    nodes: Mutex<Nodes>,
    calls: Mutex<Vec<String>>,
    hold: AtomicBool,
    gate: Semaphore,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockNodeControl {
    fn default() -> Self {
        Self {
            nodes: Mutex::new(Nodes::default()),
            calls: Mutex::new(Vec::new()),
            hold: AtomicBool::new(false),
            gate: Semaphore::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl MockNodeControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // ----- failure injection -----

    /// Make every call to `sn` fail as unreachable.
    pub fn take_down(&self, sn: StorageNodeId) {
        self.nodes.lock().unwrap().down.insert(sn);
    }

    /// Undo [`MockNodeControl::take_down`].
    pub fn bring_up(&self, sn: StorageNodeId) {
        self.nodes.lock().unwrap().down.remove(&sn);
    }

    /// Stop a service without telling the admin.
    pub fn crash(&self, service: ServiceId) {
        self.nodes.lock().unwrap().running.remove(&service);
    }

    /// Delete a service's configuration without telling the admin.
    pub fn wipe(&self, service: ServiceId) {
        let mut nodes = self.nodes.lock().unwrap();
        nodes.running.remove(&service);
        nodes.deployed.remove(&service);
    }

    /// Fail the next `times` starts of `service` transiently.
    pub fn fail_starts(&self, service: ServiceId, times: u32) {
        self.nodes.lock().unwrap().flaky.insert(service, times);
    }

    /// Fail every start of `service` fatally.
    pub fn break_service(&self, service: ServiceId) {
        self.nodes.lock().unwrap().broken.insert(service);
    }

    /// Undo [`MockNodeControl::break_service`] and
    /// [`MockNodeControl::never_comes_up`].
    pub fn fix_service(&self, service: ServiceId) {
        let mut nodes = self.nodes.lock().unwrap();
        nodes.broken.remove(&service);
        nodes.stillborn.remove(&service);
    }

    /// Accept starts of `service` without ever running it.
    pub fn never_comes_up(&self, service: ServiceId) {
        self.nodes.lock().unwrap().stillborn.insert(service);
    }

    /// Report usage for a storage directory.
    pub fn set_usage(&self, sn: StorageNodeId, path: &str, used: u64, available: u64) {
        self.nodes
            .lock()
            .unwrap()
            .usage
            .insert((sn, path.to_string()), StorageUsage { used, available });
    }

    // ----- gate -----

    /// Hold every `start_service` call until [`MockNodeControl::release`].
    pub fn hold_starts(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    /// Let held and future starts through.
    pub fn release(&self) {
        self.hold.store(false, Ordering::SeqCst);
        self.gate.add_permits(1024);
    }

    /// Wait until `n` starts are held at the gate.
    pub async fn wait_in_flight(&self, n: usize) {
        tokio::time::timeout(WAIT, async {
            while self.in_flight.load(Ordering::SeqCst) < n {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("starts never reached the gate");
    }

    /// Most starts ever in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    // ----- observation -----

    pub fn is_running(&self, service: ServiceId) -> bool {
        self.nodes.lock().unwrap().running.contains(&service)
    }

    pub fn is_registered(&self, sn: StorageNodeId) -> bool {
        self.nodes.lock().unwrap().registered.contains(&sn)
    }

    /// Every call so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls equal to `call`.
    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    /// Number of calls starting with `prefix`.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn reach(&self, sn: StorageNodeId, call: String) -> Result<(), NodeError> {
        if self.nodes.lock().unwrap().down.contains(&sn) {
            return Err(NodeError::Unreachable(ServiceId::StorageNode(sn)));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }

    fn status_of(&self, service: ServiceId) -> ServiceStatus {
        let nodes = self.nodes.lock().unwrap();
        if nodes.running.contains(&service) {
            ServiceStatus::Running
        } else if nodes.deployed.contains(&service) {
            ServiceStatus::Stopped
        } else {
            ServiceStatus::Absent
        }
    }
}

#[async_trait]
impl NodeControl for MockNodeControl {
    async fn register_storage_node(
        &self,
        sn: StorageNodeId,
        host: &str,
        port: u16,
    ) -> Result<(), NodeError> {
        self.reach(sn, format!("register {sn} {host}:{port}"))?;
        let agent = ServiceId::StorageNode(sn);
        let mut nodes = self.nodes.lock().unwrap();
        nodes.registered.insert(sn);
        nodes.deployed.insert(agent);
        nodes.running.insert(agent);
        Ok(())
    }

    async fn unregister_storage_node(&self, sn: StorageNodeId) -> Result<(), NodeError> {
        self.reach(sn, format!("unregister {sn}"))?;
        let agent = ServiceId::StorageNode(sn);
        let mut nodes = self.nodes.lock().unwrap();
        nodes.registered.remove(&sn);
        nodes.deployed.remove(&agent);
        nodes.running.remove(&agent);
        Ok(())
    }

    async fn deploy_service(
        &self,
        service: ServiceId,
        sn: StorageNodeId,
        storage_dir: Option<&str>,
    ) -> Result<(), NodeError> {
        let dir = storage_dir.unwrap_or("root");
        self.reach(sn, format!("deploy {service} {sn} {dir}"))?;
        self.nodes.lock().unwrap().deployed.insert(service);
        Ok(())
    }

    async fn remove_service(&self, service: ServiceId, sn: StorageNodeId) -> Result<(), NodeError> {
        self.reach(sn, format!("remove {service}"))?;
        let mut nodes = self.nodes.lock().unwrap();
        nodes.deployed.remove(&service);
        nodes.running.remove(&service);
        Ok(())
    }

    async fn start_service(&self, service: ServiceId, sn: StorageNodeId) -> Result<(), NodeError> {
        self.reach(sn, format!("start {service}"))?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if self.hold.load(Ordering::SeqCst) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut nodes = self.nodes.lock().unwrap();
        if nodes.broken.contains(&service) {
            return Err(NodeError::Fatal(format!("{service} cannot open its environment")));
        }
        if let Some(left) = nodes.flaky.get_mut(&service) {
            if *left > 0 {
                *left -= 1;
                return Err(NodeError::Transient(format!("{service} is busy")));
            }
        }
        if !nodes.deployed.contains(&service) {
            return Err(NodeError::Fatal(format!("{service} is not deployed on {sn}")));
        }
        if !nodes.stillborn.contains(&service) {
            nodes.running.insert(service);
        }
        Ok(())
    }

    async fn stop_service(&self, service: ServiceId, sn: StorageNodeId) -> Result<(), NodeError> {
        self.reach(sn, format!("stop {service}"))?;
        self.nodes.lock().unwrap().running.remove(&service);
        Ok(())
    }

    async fn ping(&self, service: ServiceId, sn: StorageNodeId) -> Result<ServiceStatus, NodeError> {
        if self.nodes.lock().unwrap().down.contains(&sn) {
            return Err(NodeError::Unreachable(ServiceId::StorageNode(sn)));
        }
        Ok(self.status_of(service))
    }

    async fn migrate_partition(
        &self,
        partition: PartitionId,
        source: RepGroupId,
        target: RepGroupId,
    ) -> Result<(), NodeError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("migrate {partition} {source} {target}"));
        Ok(())
    }

    async fn push_params(
        &self,
        service: ServiceId,
        sn: StorageNodeId,
        _params: &ParameterMap,
    ) -> Result<(), NodeError> {
        self.reach(sn, format!("params {service}"))
    }
}

#[async_trait]
impl Prober for MockNodeControl {
    async fn status(&self, service: ServiceId, sn: StorageNodeId) -> Result<ServiceStatus, NodeError> {
        self.ping(service, sn).await
    }

    async fn storage_usage(
        &self,
        sn: StorageNodeId,
        path: &str,
    ) -> Result<Option<StorageUsage>, NodeError> {
        let nodes = self.nodes.lock().unwrap();
        if nodes.down.contains(&sn) {
            return Err(NodeError::Unreachable(ServiceId::StorageNode(sn)));
        }
        Ok(nodes.usage.get(&(sn, path.to_string())).copied())
    }
}

// =========================================================================
// Test cluster
// =========================================================================

/// Executor settings that keep tests fast.
pub fn fast_config() -> AdminConfig {
    AdminConfig {
        store_name: "kvtest".to_string(),
        owner: Some("tester".to_string()),
        executor: ExecutorConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(10),
            },
            wait_timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(5),
            max_parallel_tasks: 4,
        },
        plan_retention: 100,
        ..AdminConfig::default()
    }
}

/// An admin, its metadata store and its simulated storage nodes.
pub struct TestCluster {
    pub meta: Arc<MetaStore>,
    pub nodes: Arc<MockNodeControl>,
    pub faults: Arc<OneShotFaults>,
    pub admin: Admin,
}

impl TestCluster {
    /// A cluster with no zones or storage nodes.
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: AdminConfig) -> Self {
        let meta = Arc::new(MetaStore::open_temporary().expect("temporary store"));
        Self::open(meta, MockNodeControl::new(), config)
    }

    /// Open an admin over an existing store and set of nodes.
    pub fn open(meta: Arc<MetaStore>, nodes: Arc<MockNodeControl>, config: AdminConfig) -> Self {
        let faults = Arc::new(OneShotFaults::new());
        let parts = Collaborators::new(nodes.clone(), nodes.clone()).with_faults(faults.clone());
        let admin = Admin::open(config.clone(), Arc::clone(&meta), parts).expect("open admin");
        Self {
            meta,
            nodes,
            faults,
            admin,
        }
    }

    /// Replace the admin with a new one over the same store and nodes, as
    /// after an admin failover.
    pub fn failover(self) -> Self {
        let config = self.admin.config().clone();
        let Self {
            meta, nodes, admin, ..
        } = self;
        drop(admin);
        Self::open(meta, nodes, config)
    }

    /// Approve, execute and await a plan.
    pub async fn run(&self, id: PlanId) -> PlanState {
        self.admin.approve_plan(id).await.expect("approve");
        self.admin.execute_plan(id, false).await.expect("execute");
        self.admin.await_plan(id, WAIT).await.expect("await")
    }

    /// Run a plan and assert it succeeds.
    pub async fn run_ok(&self, id: PlanId) {
        let state = self.run(id).await;
        let plan = self.admin.get_plan(id).expect("plan");
        assert_eq!(
            state,
            PlanState::Succeeded,
            "plan {id} ({}) ended {state}: {:?}",
            plan.name,
            plan.failure
        );
    }

    /// Deploy a primary zone.
    pub async fn deploy_zone(&self, name: &str, repfactor: u32) -> ZoneId {
        self.deploy_zone_spec(ZoneSpec::primary(name, repfactor)).await
    }

    pub async fn deploy_zone_spec(&self, spec: ZoneSpec) -> ZoneId {
        let name = spec.name.clone();
        let id = self
            .admin
            .create_deploy_zone_plan(&format!("deploy zone {name}"), spec)
            .expect("deploy-zone plan");
        self.run_ok(id).await;
        self.admin
            .current_topology()
            .zone_by_name(&name)
            .expect("zone deployed")
            .id
    }

    /// Deploy a storage node at `host{n}:5000` with `capacity` sized
    /// directories.
    pub async fn deploy_sn(&self, zone: ZoneId, n: u32, capacity: u32) -> StorageNodeId {
        let id = self
            .admin
            .create_deploy_sn_plan(&format!("deploy sn {n}"), sn_spec(zone, n, capacity))
            .expect("deploy-sn plan");
        self.run_ok(id).await;
        let host = format!("host{n}");
        self.admin
            .current_topology()
            .storage_nodes
            .values()
            .find(|node| node.host == host)
            .expect("storage node deployed")
            .id
    }

    /// Deploy a store: one zone of `count` storage nodes, one admin on the
    /// first node, and an initial layout of `partitions` partitions.
    pub async fn deploy_store(
        &self,
        repfactor: u32,
        count: u32,
        capacity: u32,
        partitions: u32,
    ) -> (ZoneId, Vec<StorageNodeId>) {
        let zone = self.deploy_zone("east", repfactor).await;
        let mut sns = Vec::new();
        for n in 1..=count {
            sns.push(self.deploy_sn(zone, n, capacity).await);
        }
        let id = self
            .admin
            .create_deploy_admin_plan("deploy admin", sns[0])
            .expect("deploy-admin plan");
        self.run_ok(id).await;
        self.deploy_candidate("initial", |admin| {
            admin.create_topology("initial", DEFAULT_POOL, partitions)
        })
        .await;
        (zone, sns)
    }

    /// Build a candidate with `build` and deploy it.
    pub async fn deploy_candidate<F, T>(&self, name: &str, build: F)
    where
        F: FnOnce(&Admin) -> reef_admin::error::Result<T>,
    {
        build(&self.admin).expect("candidate");
        let id = self
            .admin
            .create_deploy_topology_plan(&format!("deploy {name}"), name)
            .expect("deploy-topology plan");
        self.run_ok(id).await;
    }

    /// Every replication node of the live topology as a service id.
    pub fn rep_node_services(&self) -> Vec<ServiceId> {
        self.admin
            .current_topology()
            .rep_nodes
            .keys()
            .map(|rn| ServiceId::RepNode(*rn))
            .collect()
    }

    /// Stop `services` through a plan.
    pub async fn stop(&self, services: &[ServiceId]) {
        let id = self
            .admin
            .create_stop_services_plan("stop", services)
            .expect("stop plan");
        self.run_ok(id).await;
    }

    /// Approve and execute a plan that starts `services` without waiting
    /// for it to settle.
    pub async fn start_in_background(&self, name: &str, services: &[ServiceId]) -> PlanId {
        let id = self
            .admin
            .create_start_services_plan(name, services)
            .expect("start plan");
        self.admin.approve_plan(id).await.expect("approve");
        self.admin.execute_plan(id, false).await.expect("execute");
        id
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// A storage node spec with `capacity` directories of [`DIR_SIZE`].
pub fn sn_spec(zone: ZoneId, n: u32, capacity: u32) -> StorageNodeSpec {
    StorageNodeSpec {
        zone,
        host: format!("host{n}"),
        port: 5000,
        capacity,
        storage_dirs: (1..=capacity)
            .map(|d| StorageDir::sized(format!("/disk{d}"), DIR_SIZE))
            .collect(),
        params: ParameterMap::new()
            .with(keys::MEMORY_MB, 32_768u64)
            .with(keys::NUM_CPUS, 16u64),
    }
}

/// Install a console subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
