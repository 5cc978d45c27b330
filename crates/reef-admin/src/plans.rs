//! Plan builders: one `create_*_plan` per plan kind.
//!
//! Builders compute the target topology (if any) and the task list from the
//! live state at creation time. Plans that commit a topology are pinned to
//! the live sequence and become stale if another plan commits first.

use std::collections::BTreeSet;

use reef_params::validate_storage_node;
use reef_planner::{migrate_storage_node, remove_failed_shard};
use reef_topology::{StorageDir, TopologyCandidate};
use reef_types::params::keys;
use reef_types::{
    AdminId, LockSet, ParameterMap, PlanId, PlanKind, RepGroupId, ServiceId, StorageNodeId,
    TaskKind, ZoneId, ZoneType,
};
use reef_verify::Problem;
use tracing::{info, warn};

use crate::admin::Admin;
use crate::error::{AdminError, Result};
use crate::tasks::{TaskList, Unavailable, deploy_locks, deploy_tasks, host_of};

/// A zone to add to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneSpec {
    /// Unique zone name.
    pub name: String,
    /// Replicas of every shard kept in the zone.
    pub repfactor: u32,
    /// Primary or secondary.
    pub zone_type: ZoneType,
    /// Whether arbiters may be placed in the zone.
    pub allow_arbiters: bool,
    /// Whether masters should prefer the zone.
    pub master_affinity: bool,
}

impl ZoneSpec {
    /// A primary zone without arbiters or master affinity.
    pub fn primary(name: impl Into<String>, repfactor: u32) -> Self {
        Self {
            name: name.into(),
            repfactor,
            zone_type: ZoneType::Primary,
            allow_arbiters: false,
            master_affinity: false,
        }
    }
}

/// A storage node to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageNodeSpec {
    /// Zone the node joins.
    pub zone: ZoneId,
    /// Agent host name.
    pub host: String,
    /// Agent port.
    pub port: u16,
    /// Number of services the node may host.
    pub capacity: u32,
    /// Declared storage directories.
    pub storage_dirs: Vec<StorageDir>,
    /// Initial parameters (memory, CPU count, ...).
    pub params: ParameterMap,
}

impl Admin {
    /// Add a zone.
    pub fn create_deploy_zone_plan(&self, name: &str, zone: ZoneSpec) -> Result<PlanId> {
        let mut target = self.state.topology();
        let id = target.add_zone(
            &zone.name,
            zone.repfactor,
            zone.zone_type,
            zone.allow_arbiters,
            zone.master_affinity,
        )?;
        let mut list = TaskList::new();
        list.push(TaskKind::CommitTopology);
        let locks = LockSet::new().topology_writer().zone(id);
        let plan = self.submit(name, PlanKind::DeployZone, list.into_tasks(), locks, Some(target))?;
        info!(plan_id = %plan, zone = %id, "deploy-zone plan created");
        Ok(plan)
    }

    /// Register a storage node and record its parameters.
    pub fn create_deploy_sn_plan(&self, name: &str, spec: StorageNodeSpec) -> Result<PlanId> {
        let params = self.state.parameters();
        let effective = params
            .policy
            .overlay(&spec.params)
            .with(keys::CAPACITY, u64::from(spec.capacity));
        validate_storage_node(&effective)?;
        if spec.capacity == 0 {
            return Err(AdminError::InvalidRequest(
                "storage node capacity must be at least 1".into(),
            ));
        }

        let mut target = self.state.topology();
        if target
            .storage_nodes
            .values()
            .any(|n| n.host == spec.host && n.port == spec.port)
        {
            return Err(AdminError::InvalidRequest(format!(
                "a storage node at {}:{} is already registered",
                spec.host, spec.port
            )));
        }
        let sn = target.add_storage_node(
            spec.zone,
            &spec.host,
            spec.port,
            spec.capacity,
            spec.storage_dirs,
        )?;

        let mut list = TaskList::new();
        list.push(TaskKind::RegisterStorageNode {
            sn,
            host: spec.host,
            port: spec.port,
        });
        list.push(TaskKind::WriteParams {
            service: ServiceId::StorageNode(sn),
            sn,
            params: spec.params.with(keys::CAPACITY, u64::from(spec.capacity)),
        });
        list.push(TaskKind::CommitTopology);
        let locks = LockSet::new()
            .topology_writer()
            .zone(spec.zone)
            .storage_node(sn);
        let plan = self.submit(
            name,
            PlanKind::DeployStorageNode,
            list.into_tasks(),
            locks,
            Some(target),
        )?;
        info!(plan_id = %plan, %sn, "deploy-sn plan created");
        Ok(plan)
    }

    /// Add an admin service on a storage node.
    pub fn create_deploy_admin_plan(&self, name: &str, sn: StorageNodeId) -> Result<PlanId> {
        let mut target = self.state.topology();
        if !target.admins_on(sn).is_empty() {
            return Err(AdminError::InvalidRequest(format!(
                "{sn} already hosts an admin"
            )));
        }
        let admin = target.add_admin(sn)?;
        let mut list = TaskList::new();
        list.push(TaskKind::DeployAdmin { admin, sn });
        list.push(TaskKind::WaitForService {
            service: ServiceId::Admin(admin),
            sn,
        });
        list.push(TaskKind::CommitTopology);
        let locks = LockSet::new()
            .topology_writer()
            .service(ServiceId::Admin(admin), sn);
        self.submit(name, PlanKind::DeployAdmin, list.into_tasks(), locks, Some(target))
    }

    /// Remove an admin service. The last admin cannot be removed.
    pub fn create_remove_admin_plan(&self, name: &str, admin: AdminId) -> Result<PlanId> {
        let mut target = self.state.topology();
        let sn = target.admin(admin)?.sn;
        if target.admins.len() <= 1 {
            return Err(AdminError::InvalidRequest(format!(
                "{admin} is the only admin"
            )));
        }
        target.remove_admin(admin)?;
        let mut list = TaskList::new();
        list.push(TaskKind::RemoveAdmin { admin, sn });
        list.push(TaskKind::CommitTopology);
        let locks = LockSet::new()
            .topology_writer()
            .service(ServiceId::Admin(admin), sn);
        self.submit(name, PlanKind::RemoveAdmin, list.into_tasks(), locks, Some(target))
    }

    /// Make a topology candidate the live topology.
    ///
    /// The candidate must have been built from the current live topology;
    /// otherwise deploying it would undo whatever was committed since.
    pub fn create_deploy_topology_plan(&self, name: &str, candidate: &str) -> Result<PlanId> {
        let cand = self
            .meta
            .get_candidate(candidate)?
            .ok_or_else(|| AdminError::CandidateNotFound(candidate.to_string()))?;
        let current = self.state.topology();
        if !cand.is_based_on(current.sequence) {
            warn!(
                candidate,
                base = cand.base_sequence,
                live = current.sequence,
                "candidate is out of date"
            );
            return Err(AdminError::InvalidRequest(format!(
                "candidate {candidate} was built from topology sequence {}, \
                 the live topology is at {}; recreate it",
                cand.base_sequence, current.sequence
            )));
        }
        self.deploy_plan(
            name,
            PlanKind::DeployTopology,
            &current,
            cand.topology,
            &Unavailable::default(),
        )
    }

    /// Move every service of a failed storage node to an unused one in the
    /// same zone.
    pub async fn create_migrate_sn_plan(
        &self,
        name: &str,
        source: StorageNodeId,
        target: StorageNodeId,
    ) -> Result<PlanId> {
        let current = self.state.topology();
        let up = self.reachable(&current).await;
        let mut cand = TopologyCandidate::new(name, current.clone());
        migrate_storage_node(&mut cand, source, target, &|s| up.contains(&s))?;
        let unavailable = Unavailable {
            storage_nodes: BTreeSet::from([source]),
            ..Unavailable::default()
        };
        self.deploy_plan(
            name,
            PlanKind::MigrateStorageNode,
            &current,
            cand.topology,
            &unavailable,
        )
    }

    /// Remove a storage node that hosts nothing. An unreachable node is
    /// only dropped from the topology.
    pub async fn create_remove_sn_plan(&self, name: &str, sn: StorageNodeId) -> Result<PlanId> {
        let current = self.state.topology();
        let node = current.storage_node(sn)?;
        let hosted = current.hosted_count(sn) + current.admins_on(sn).len();
        if hosted > 0 {
            return Err(AdminError::InvalidRequest(format!(
                "{sn} still hosts {hosted} service(s); migrate or remove them first"
            )));
        }
        let zone = node.zone;
        let mut target = current.clone();
        target.remove_storage_node(sn)?;

        let agent = ServiceId::StorageNode(sn);
        let up = self.reachable(&current).await;
        let mut list = TaskList::new();
        if up.contains(&agent) {
            list.push(TaskKind::StopService { service: agent, sn });
            list.push(TaskKind::UnregisterStorageNode { sn });
        } else {
            info!(%sn, "storage node unreachable; dropping it from the topology only");
        }
        list.push(TaskKind::CommitTopology);
        let locks = LockSet::new().topology_writer().zone(zone).storage_node(sn);
        self.submit(
            name,
            PlanKind::RemoveStorageNode,
            list.into_tasks(),
            locks,
            Some(target),
        )
    }

    /// Drop a shard whose members are all down, spreading its partitions
    /// over the remaining shards. Its data is lost.
    pub async fn create_remove_failed_shard_plan(
        &self,
        name: &str,
        shard: RepGroupId,
    ) -> Result<PlanId> {
        let current = self.state.topology();
        let up = self.reachable(&current).await;
        let mut cand = TopologyCandidate::new(name, current.clone());
        remove_failed_shard(&mut cand, shard, &|s| up.contains(&s))?;
        let unavailable = Unavailable {
            storage_nodes: current
                .storage_nodes
                .keys()
                .filter(|sn| !up.contains(&ServiceId::StorageNode(**sn)))
                .copied()
                .collect(),
            shards: BTreeSet::from([shard]),
        };
        self.deploy_plan(
            name,
            PlanKind::RemoveFailedShard,
            &current,
            cand.topology,
            &unavailable,
        )
    }

    /// Change one service's parameters and restart what they affect.
    ///
    /// For a storage node, every replication node it hosts is re-sized and
    /// restarted one at a time. A new capacity also updates the topology.
    pub fn create_change_params_plan(
        &self,
        name: &str,
        service: ServiceId,
        changes: ParameterMap,
    ) -> Result<PlanId> {
        if changes.is_empty() {
            return Err(AdminError::InvalidRequest("no parameters given".into()));
        }
        let current = self.state.topology();
        let sn = host_of(&current, service).ok_or(AdminError::UnknownService(service))?;
        let mut scratch = self.state.parameters();
        let changed = scratch.merge(service, &changes);

        let mut list = TaskList::new();
        let mut locks = LockSet::new().service(service, sn);
        let mut target = None;

        match service {
            ServiceId::StorageNode(_) => {
                let mut topo = current.clone();
                if let Some(capacity) = changes.get_u64(keys::CAPACITY) {
                    let capacity = u32::try_from(capacity).ok().filter(|c| *c > 0).ok_or_else(
                        || AdminError::InvalidRequest(format!("invalid capacity {capacity}")),
                    )?;
                    if topo.storage_node(sn)?.capacity != capacity {
                        topo.storage_node_mut(sn)?.capacity = capacity;
                        target = Some(topo.clone());
                    }
                }
                validate_storage_node(
                    &scratch
                        .effective(service)
                        .with(keys::CAPACITY, u64::from(topo.storage_node(sn)?.capacity)),
                )?;
                let resized: Vec<_> = scratch
                    .size_rep_nodes(&topo, sn)?
                    .into_iter()
                    .filter(|(rn, map)| scratch.overrides(ServiceId::RepNode(*rn)) != *map)
                    .collect();
                if changed.is_empty() && resized.is_empty() && target.is_none() {
                    return Err(AdminError::InvalidRequest(format!(
                        "parameters of {service} already have these values"
                    )));
                }

                list.push(TaskKind::WriteParams {
                    service,
                    sn,
                    params: changes,
                });
                for (rn, map) in resized {
                    let rn_service = ServiceId::RepNode(rn);
                    locks = locks.service(rn_service, sn);
                    list.push(TaskKind::WriteParams {
                        service: rn_service,
                        sn,
                        params: map,
                    });
                    list.restart(rn_service, sn);
                }
                if target.is_some() {
                    locks = locks.topology_writer();
                    list.push(TaskKind::CommitTopology);
                }
            }
            _ => {
                if changed.is_empty() {
                    return Err(AdminError::InvalidRequest(format!(
                        "parameters of {service} already have these values"
                    )));
                }
                list.push(TaskKind::WriteParams {
                    service,
                    sn,
                    params: changes,
                });
                list.restart(service, sn);
            }
        }

        let plan = self.submit(name, PlanKind::ChangeParams, list.into_tasks(), locks, target)?;
        info!(plan_id = %plan, %service, keys = ?changed, "change-params plan created");
        Ok(plan)
    }

    /// Start services, then wait until they answer.
    pub fn create_start_services_plan(
        &self,
        name: &str,
        services: &[ServiceId],
    ) -> Result<PlanId> {
        let (hosted, locks) = self.locate(services)?;
        let mut list = TaskList::new();
        list.start_and_wait(&hosted);
        self.submit(name, PlanKind::StartServices, list.into_tasks(), locks, None)
    }

    /// Stop services.
    pub fn create_stop_services_plan(&self, name: &str, services: &[ServiceId]) -> Result<PlanId> {
        let (hosted, locks) = self.locate(services)?;
        let mut list = TaskList::new();
        list.parallel(
            hosted
                .iter()
                .map(|(service, sn)| TaskKind::StopService {
                    service: *service,
                    sn: *sn,
                })
                .collect(),
        );
        self.submit(name, PlanKind::StopServices, list.into_tasks(), locks, None)
    }

    /// Redeploy missing services, restart stopped ones and rewrite drifted
    /// replication node parameters, as found by a live verification.
    pub async fn create_repair_plan(&self, name: &str) -> Result<PlanId> {
        let report = self.verify_configuration().await;
        let topo = self.state.topology();
        let params = self.state.parameters();

        let mut deploys = Vec::new();
        let mut restarts = Vec::new();
        let mut rewrites = Vec::new();
        let mut locks = LockSet::new();
        for problem in report.violations.iter().chain(report.warnings.iter()) {
            match problem {
                Problem::ServiceStopped {
                    service,
                    sn,
                    deployed,
                } => {
                    if !deployed {
                        match service {
                            ServiceId::RepNode(rn) => deploys.push(TaskKind::DeployRepNode {
                                rn: *rn,
                                sn: *sn,
                                storage_dir: topo.rep_node(*rn)?.storage_dir.clone(),
                            }),
                            ServiceId::ArbNode(an) => {
                                deploys.push(TaskKind::DeployArbNode { an: *an, sn: *sn })
                            }
                            ServiceId::Admin(admin) => deploys.push(TaskKind::DeployAdmin {
                                admin: *admin,
                                sn: *sn,
                            }),
                            ServiceId::StorageNode(_) => {
                                let node = topo.storage_node(*sn)?;
                                deploys.push(TaskKind::RegisterStorageNode {
                                    sn: *sn,
                                    host: node.host.clone(),
                                    port: node.port,
                                })
                            }
                        }
                    }
                    locks = locks.service(*service, *sn);
                    restarts.push((*service, *sn));
                }
                Problem::ParamMismatch { service, .. } => {
                    let ServiceId::RepNode(rn) = service else {
                        continue;
                    };
                    let Some(sn) = host_of(&topo, *service) else {
                        continue;
                    };
                    let duplicate = rewrites.iter().any(
                        |t| matches!(t, TaskKind::WriteParams { service: s, .. } if s == service),
                    );
                    if duplicate {
                        continue;
                    }
                    let sized = params
                        .size_rep_nodes(&topo, sn)?
                        .into_iter()
                        .find(|(id, _)| id == rn);
                    if let Some((_, map)) = sized {
                        locks = locks.service(*service, sn);
                        rewrites.push(TaskKind::WriteParams {
                            service: *service,
                            sn,
                            params: map,
                        });
                    }
                }
                _ => {}
            }
        }

        let mut list = TaskList::new();
        list.parallel(rewrites);
        list.parallel(deploys);
        list.start_and_wait(&restarts);
        if list.is_empty() {
            info!("repair found nothing to do");
        }
        self.submit(name, PlanKind::Repair, list.into_tasks(), locks, None)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn deploy_plan(
        &self,
        name: &str,
        kind: PlanKind,
        current: &reef_topology::Topology,
        mut target: reef_topology::Topology,
        unavailable: &Unavailable,
    ) -> Result<PlanId> {
        target.sequence = current.sequence;
        if target == *current {
            return Err(AdminError::InvalidRequest(
                "the target topology equals the live topology".into(),
            ));
        }
        let params = self.state.parameters();
        let tasks = deploy_tasks(current, &target, &params, unavailable)?;
        let locks = deploy_locks(current, &target);
        let plan = self.submit(name, kind, tasks, locks, Some(target))?;
        info!(plan_id = %plan, %kind, "deployment plan created");
        Ok(plan)
    }

    fn locate(&self, services: &[ServiceId]) -> Result<(Vec<(ServiceId, StorageNodeId)>, LockSet)> {
        if services.is_empty() {
            return Err(AdminError::InvalidRequest("no services given".into()));
        }
        let topo = self.state.topology();
        let mut hosted = Vec::with_capacity(services.len());
        let mut locks = LockSet::new();
        for service in services {
            let sn = host_of(&topo, *service).ok_or(AdminError::UnknownService(*service))?;
            locks = locks.service(*service, sn);
            hosted.push((*service, sn));
        }
        Ok((hosted, locks))
    }
}
