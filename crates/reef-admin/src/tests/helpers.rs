//! Shared test utilities for reef-admin tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use reef_meta::MetaStore;
use reef_plan::{ExecutorConfig, NodeControl, NodeError, RetryPolicy, ServiceStatus};
use reef_topology::StorageDir;
use reef_types::{
    ParameterMap, PartitionId, PlanId, PlanState, RepGroupId, ServiceId, StorageNodeId, ZoneId,
};
use reef_types::params::keys;
use reef_verify::{Prober, StorageUsage};
use tokio::time::Duration;

use crate::{Admin, AdminConfig, Collaborators, StorageNodeSpec, ZoneSpec};

pub const WAIT: Duration = Duration::from_secs(10);

/// In-memory storage node agents. Every registered agent runs until its
/// node is marked down.
#[derive(Default)]
pub struct MockCluster {
    pub registered: Mutex<HashSet<StorageNodeId>>,
    pub deployed: Mutex<HashSet<ServiceId>>,
    pub running: Mutex<HashSet<ServiceId>>,
    pub down: Mutex<HashSet<StorageNodeId>>,
    pub calls: Mutex<Vec<String>>,
}

impl MockCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take_down(&self, sn: StorageNodeId) {
        self.down.lock().unwrap().insert(sn);
    }

    /// Stop a service behind the admin's back.
    pub fn crash(&self, service: ServiceId) {
        self.running.lock().unwrap().remove(&service);
    }

    pub fn is_running(&self, service: ServiceId) -> bool {
        self.running.lock().unwrap().contains(&service)
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn reach(&self, sn: StorageNodeId, call: String) -> Result<(), NodeError> {
        if self.down.lock().unwrap().contains(&sn) {
            return Err(NodeError::Unreachable(ServiceId::StorageNode(sn)));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }

    fn status_of(&self, service: ServiceId) -> ServiceStatus {
        if self.running.lock().unwrap().contains(&service) {
            ServiceStatus::Running
        } else if self.deployed.lock().unwrap().contains(&service) {
            ServiceStatus::Stopped
        } else {
            ServiceStatus::Absent
        }
    }
}

#[async_trait::async_trait]
impl NodeControl for MockCluster {
    async fn register_storage_node(
        &self,
        sn: StorageNodeId,
        host: &str,
        port: u16,
    ) -> Result<(), NodeError> {
        self.reach(sn, format!("register {sn} {host}:{port}"))?;
        self.registered.lock().unwrap().insert(sn);
        self.deployed.lock().unwrap().insert(ServiceId::StorageNode(sn));
        self.running.lock().unwrap().insert(ServiceId::StorageNode(sn));
        Ok(())
    }

    async fn unregister_storage_node(&self, sn: StorageNodeId) -> Result<(), NodeError> {
        self.reach(sn, format!("unregister {sn}"))?;
        self.registered.lock().unwrap().remove(&sn);
        self.deployed.lock().unwrap().remove(&ServiceId::StorageNode(sn));
        self.running.lock().unwrap().remove(&ServiceId::StorageNode(sn));
        Ok(())
    }

    async fn deploy_service(
        &self,
        service: ServiceId,
        sn: StorageNodeId,
        _storage_dir: Option<&str>,
    ) -> Result<(), NodeError> {
        self.reach(sn, format!("deploy {service}"))?;
        self.deployed.lock().unwrap().insert(service);
        Ok(())
    }

    async fn remove_service(&self, service: ServiceId, sn: StorageNodeId) -> Result<(), NodeError> {
        self.reach(sn, format!("remove {service}"))?;
        self.deployed.lock().unwrap().remove(&service);
        self.running.lock().unwrap().remove(&service);
        Ok(())
    }

    async fn start_service(&self, service: ServiceId, sn: StorageNodeId) -> Result<(), NodeError> {
        self.reach(sn, format!("start {service}"))?;
        if !self.deployed.lock().unwrap().contains(&service) {
            return Err(NodeError::Fatal(format!("{service} is not deployed on {sn}")));
        }
        self.running.lock().unwrap().insert(service);
        Ok(())
    }

    async fn stop_service(&self, service: ServiceId, sn: StorageNodeId) -> Result<(), NodeError> {
        self.reach(sn, format!("stop {service}"))?;
        self.running.lock().unwrap().remove(&service);
        Ok(())
    }

    async fn ping(&self, service: ServiceId, sn: StorageNodeId) -> Result<ServiceStatus, NodeError> {
        self.reach(sn, format!("ping {service}"))?;
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

#[async_trait::async_trait]
impl Prober for MockCluster {
    async fn status(&self, service: ServiceId, sn: StorageNodeId) -> Result<ServiceStatus, NodeError> {
        if self.down.lock().unwrap().contains(&sn) {
            return Err(NodeError::Unreachable(ServiceId::StorageNode(sn)));
        }
        Ok(self.status_of(service))
    }

    async fn storage_usage(
        &self,
        _sn: StorageNodeId,
        _path: &str,
    ) -> Result<Option<StorageUsage>, NodeError> {
        Ok(None)
    }
}

/// Executor settings that keep tests fast.
pub fn fast_executor() -> ExecutorConfig {
    ExecutorConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
        wait_timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(5),
        max_parallel_tasks: 4,
    }
}

/// An admin over a fresh temporary store.
pub fn admin() -> (Admin, Arc<MockCluster>) {
    let meta = Arc::new(MetaStore::open_temporary().unwrap());
    admin_over(meta)
}

pub fn admin_over(meta: Arc<MetaStore>) -> (Admin, Arc<MockCluster>) {
    let cluster = MockCluster::new();
    let config = AdminConfig {
        store_name: "kvtest".into(),
        executor: fast_executor(),
        ..AdminConfig::default()
    };
    let parts = Collaborators::new(cluster.clone(), cluster.clone());
    (Admin::open(config, meta, parts).unwrap(), cluster)
}

/// Approve, execute and await a plan.
pub async fn run(admin: &Admin, id: PlanId) -> PlanState {
    admin.approve_plan(id).await.unwrap();
    admin.execute_plan(id, false).await.unwrap();
    admin.await_plan(id, WAIT).await.unwrap()
}

/// A storage node with one sized directory.
pub fn sn_spec(zone: ZoneId, n: u16, capacity: u32) -> StorageNodeSpec {
    StorageNodeSpec {
        zone,
        host: format!("node{n}"),
        port: 5000,
        capacity,
        storage_dirs: (0..capacity)
            .map(|d| StorageDir::sized(format!("/data/{d}"), 100 << 30))
            .collect(),
        params: ParameterMap::new()
            .with(keys::MEMORY_MB, 16_384u64)
            .with(keys::NUM_CPUS, 8u64),
    }
}

/// Deploy a primary zone and `count` storage nodes of capacity 1.
pub async fn bootstrap(admin: &Admin, rf: u32, count: u16) -> (ZoneId, Vec<StorageNodeId>) {
    let plan = admin
        .create_deploy_zone_plan("zone", ZoneSpec::primary("east", rf))
        .unwrap();
    assert_eq!(run(admin, plan).await, PlanState::Succeeded);
    let zone = admin.current_topology().zone_by_name("east").unwrap().id;

    let mut sns = Vec::new();
    for n in 1..=count {
        let plan = admin
            .create_deploy_sn_plan(&format!("sn{n}"), sn_spec(zone, n, 1))
            .unwrap();
        assert_eq!(run(admin, plan).await, PlanState::Succeeded);
        let topo = admin.current_topology();
        let sn = topo
            .storage_nodes
            .values()
            .find(|node| node.host == format!("node{n}"))
            .unwrap()
            .id;
        sns.push(sn);
    }
    (zone, sns)
}

/// Bootstrap and deploy an initial layout with `partitions` partitions.
pub async fn deployed(admin: &Admin, rf: u32, count: u16, partitions: u32) -> Vec<StorageNodeId> {
    let (_, sns) = bootstrap(admin, rf, count).await;
    admin
        .create_topology("initial", reef_topology::DEFAULT_POOL, partitions)
        .unwrap();
    let plan = admin
        .create_deploy_topology_plan("deploy initial", "initial")
        .unwrap();
    assert_eq!(run(admin, plan).await, PlanState::Succeeded);
    sns
}
