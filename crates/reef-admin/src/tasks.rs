//! Task lists derived from topology changes.
//!
//! A deployment runs in a fixed order: register new storage nodes, deploy
//! new admins, tear down services that move, bring up new and moved
//! services, restart RNs whose host's sizing changed, migrate partitions, tear down removed services, unregister
//! removed storage nodes and finally commit the target topology. Services
//! on storage nodes known to be down are not contacted during teardown.

use std::collections::BTreeSet;

use reef_params::Parameters;
use reef_planner::TopologyDiff;
use reef_topology::Topology;
use reef_types::{
    ArbNodeId, LockSet, ParameterMap, RepGroupId, RepNodeId, ServiceId, StorageNodeId, Task,
    TaskKind,
};

use crate::error::Result;

/// Appends tasks, numbering parallel groups.
#[derive(Debug, Default)]
pub(crate) struct TaskList {
    tasks: Vec<Task>,
    next_group: u32,
}

impl TaskList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append one sequential task.
    pub(crate) fn push(&mut self, kind: TaskKind) {
        self.tasks.push(Task::new(kind));
    }

    /// Append tasks that may run together. A single task stays sequential.
    pub(crate) fn parallel(&mut self, kinds: Vec<TaskKind>) {
        match kinds.len() {
            0 => {}
            1 => self.tasks.extend(kinds.into_iter().map(Task::new)),
            _ => {
                self.next_group += 1;
                let group = self.next_group;
                self.tasks
                    .extend(kinds.into_iter().map(|k| Task::parallel(k, group)));
            }
        }
    }

    /// Start, then wait for, a set of services.
    pub(crate) fn start_and_wait(&mut self, services: &[(ServiceId, StorageNodeId)]) {
        self.parallel(
            services
                .iter()
                .map(|(service, sn)| TaskKind::StartService {
                    service: *service,
                    sn: *sn,
                })
                .collect(),
        );
        self.parallel(
            services
                .iter()
                .map(|(service, sn)| TaskKind::WaitForService {
                    service: *service,
                    sn: *sn,
                })
                .collect(),
        );
    }

    /// Stop, start and wait for one service.
    pub(crate) fn restart(&mut self, service: ServiceId, sn: StorageNodeId) {
        self.push(TaskKind::StopService { service, sn });
        self.push(TaskKind::StartService { service, sn });
        self.push(TaskKind::WaitForService { service, sn });
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }
}

/// What is known to be gone when a deployment is planned.
#[derive(Debug, Clone, Default)]
pub(crate) struct Unavailable {
    /// Storage nodes whose agents cannot be reached.
    pub storage_nodes: BTreeSet<StorageNodeId>,
    /// Shards whose data is lost; their partitions are reassigned without
    /// migration.
    pub shards: BTreeSet<RepGroupId>,
}

impl Unavailable {
    fn can_stop(&self, service: ServiceId, sn: StorageNodeId) -> bool {
        !self.storage_nodes.contains(&sn) && service.shard().is_none_or(|s| !self.shards.contains(&s))
    }

    fn can_contact(&self, sn: StorageNodeId) -> bool {
        !self.storage_nodes.contains(&sn)
    }
}

/// Tasks that turn `current` into `target`, ending with a commit.
pub(crate) fn deploy_tasks(
    current: &Topology,
    target: &Topology,
    params: &Parameters,
    unavailable: &Unavailable,
) -> Result<Vec<Task>> {
    let diff = TopologyDiff::between(current, target);
    let mut list = TaskList::new();

    for sn in &diff.new_storage_nodes {
        let node = target.storage_node(*sn)?;
        list.push(TaskKind::RegisterStorageNode {
            sn: *sn,
            host: node.host.clone(),
            port: node.port,
        });
    }

    // Admins are not part of the shard diff.
    let mut new_admins = Vec::new();
    let mut old_admins = Vec::new();
    for (id, admin) in &target.admins {
        match current.admins.get(id) {
            None => new_admins.push((*id, admin.sn)),
            Some(old) if old.sn != admin.sn => {
                old_admins.push((*id, old.sn));
                new_admins.push((*id, admin.sn));
            }
            Some(_) => {}
        }
    }
    for (id, admin) in &current.admins {
        if !target.admins.contains_key(id) {
            old_admins.push((*id, admin.sn));
        }
    }
    list.parallel(
        new_admins
            .iter()
            .map(|(admin, sn)| TaskKind::DeployAdmin {
                admin: *admin,
                sn: *sn,
            })
            .collect(),
    );
    list.parallel(
        new_admins
            .iter()
            .map(|(admin, sn)| TaskKind::WaitForService {
                service: ServiceId::Admin(*admin),
                sn: *sn,
            })
            .collect(),
    );

    // Moving services give up their old home first.
    let moving: Vec<(ServiceId, StorageNodeId)> = diff
        .relocated_rns
        .iter()
        .map(|r| (ServiceId::RepNode(r.rn), r.from))
        .chain(
            diff.relocated_ans
                .iter()
                .map(|(an, from, _)| (ServiceId::ArbNode(*an), *from)),
        )
        .collect();
    teardown(&mut list, &moving, unavailable);

    // New and moved services come up on their new home.
    let mut rns: Vec<(RepNodeId, StorageNodeId, Option<String>)> = diff
        .added_rns
        .iter()
        .map(|p| (p.rn, p.sn, p.storage_dir.clone()))
        .collect();
    rns.extend(
        diff.relocated_rns
            .iter()
            .map(|r| (r.rn, r.to.sn, r.to.storage_dir.clone())),
    );
    let mut ans: Vec<(ArbNodeId, StorageNodeId)> = diff.added_ans.clone();
    ans.extend(diff.relocated_ans.iter().map(|(an, _, to)| (*an, *to)));

    let mut sized = Vec::new();
    for (rn, sn, _) in &rns {
        let map = params
            .size_rep_nodes(target, *sn)?
            .into_iter()
            .find(|(id, _)| id == rn)
            .map(|(_, map)| map)
            .unwrap_or_default();
        sized.push(TaskKind::WriteParams {
            service: ServiceId::RepNode(*rn),
            sn: *sn,
            params: map,
        });
    }

    // RNs that stay where they are get new sizing when their host's load
    // changes; they pick it up on a rolling restart once the new services run.
    let mut resized = Vec::new();
    for (rn, sn) in staying_on_rehosted(current, target) {
        if !unavailable.can_contact(sn) {
            continue;
        }
        let service = ServiceId::RepNode(rn);
        let sized_in = |topo: &Topology| -> Result<Option<ParameterMap>> {
            Ok(params
                .size_rep_nodes(topo, sn)?
                .into_iter()
                .find(|(id, _)| *id == rn)
                .map(|(_, map)| map))
        };
        let Some(map) = sized_in(target)? else {
            continue;
        };
        if sized_in(current)?.as_ref() != Some(&map) {
            sized.push(TaskKind::WriteParams {
                service,
                sn,
                params: map,
            });
            resized.push((service, sn));
        }
    }
    list.parallel(sized);

    let mut deploys: Vec<TaskKind> = rns
        .iter()
        .map(|(rn, sn, dir)| TaskKind::DeployRepNode {
            rn: *rn,
            sn: *sn,
            storage_dir: dir.clone(),
        })
        .collect();
    deploys.extend(
        ans.iter()
            .map(|(an, sn)| TaskKind::DeployArbNode { an: *an, sn: *sn }),
    );
    list.parallel(deploys);

    let started: Vec<(ServiceId, StorageNodeId)> = rns
        .iter()
        .map(|(rn, sn, _)| (ServiceId::RepNode(*rn), *sn))
        .chain(ans.iter().map(|(an, sn)| (ServiceId::ArbNode(*an), *sn)))
        .collect();
    list.start_and_wait(&started);
    for (service, sn) in resized {
        list.restart(service, sn);
    }

    for (partition, source, target_shard) in &diff.moved_partitions {
        if unavailable.shards.contains(source) {
            continue;
        }
        list.push(TaskKind::MigratePartition {
            partition: *partition,
            source: *source,
            target: *target_shard,
        });
    }

    let removed: Vec<(ServiceId, StorageNodeId)> = diff
        .removed_rns
        .iter()
        .map(|(rn, sn)| (ServiceId::RepNode(*rn), *sn))
        .chain(
            diff.removed_ans
                .iter()
                .map(|(an, sn)| (ServiceId::ArbNode(*an), *sn)),
        )
        .collect();
    teardown(&mut list, &removed, unavailable);

    list.parallel(
        old_admins
            .iter()
            .filter(|(_, sn)| unavailable.can_contact(*sn))
            .map(|(admin, sn)| TaskKind::RemoveAdmin {
                admin: *admin,
                sn: *sn,
            })
            .collect(),
    );

    for sn in &diff.removed_storage_nodes {
        if unavailable.can_contact(*sn) {
            list.push(TaskKind::UnregisterStorageNode { sn: *sn });
        }
    }

    list.push(TaskKind::CommitTopology);
    Ok(list.into_tasks())
}

/// Stop, then remove, services from their hosts.
fn teardown(
    list: &mut TaskList,
    services: &[(ServiceId, StorageNodeId)],
    unavailable: &Unavailable,
) {
    list.parallel(
        services
            .iter()
            .filter(|(service, sn)| unavailable.can_stop(*service, *sn))
            .map(|(service, sn)| TaskKind::StopService {
                service: *service,
                sn: *sn,
            })
            .collect(),
    );
    list.parallel(
        services
            .iter()
            .filter(|(_, sn)| unavailable.can_contact(*sn))
            .filter_map(|(service, sn)| match service {
                ServiceId::RepNode(rn) => Some(TaskKind::RemoveRepNode { rn: *rn, sn: *sn }),
                ServiceId::ArbNode(an) => Some(TaskKind::RemoveArbNode { an: *an, sn: *sn }),
                _ => None,
            })
            .collect(),
    );
}

/// Locks for a deployment from `current` to `target`.
pub(crate) fn deploy_locks(current: &Topology, target: &Topology) -> LockSet {
    let diff = TopologyDiff::between(current, target);
    let mut locks = LockSet::new().topology_writer();
    for shard in diff.touched_shards() {
        locks = locks.shard(shard);
    }
    for sn in diff.touched_storage_nodes() {
        locks = locks.storage_node(sn);
    }
    for zone in diff.new_zones.iter().chain(diff.changed_zones.iter()) {
        locks = locks.zone(*zone);
    }
    for (rn, sn) in staying_on_rehosted(current, target) {
        locks = locks.service(ServiceId::RepNode(rn), sn);
    }
    for (id, admin) in &target.admins {
        if current.admins.get(id) != Some(admin) {
            locks = locks.admin(*id).storage_node(admin.sn);
        }
    }
    for (id, admin) in &current.admins {
        if !target.admins.contains_key(id) {
            locks = locks.admin(*id).storage_node(admin.sn);
        }
    }
    locks
}

/// RNs that keep their storage node while the number of services on that
/// node changes.
fn staying_on_rehosted(
    current: &Topology,
    target: &Topology,
) -> Vec<(RepNodeId, StorageNodeId)> {
    target
        .rep_nodes
        .iter()
        .filter(|(id, rn)| current.rep_nodes.get(id).is_some_and(|old| old.sn == rn.sn))
        .filter(|(_, rn)| current.hosted_count(rn.sn) != target.hosted_count(rn.sn))
        .map(|(id, rn)| (*id, rn.sn))
        .collect()
}

/// The storage node hosting `service` in `topo`.
pub(crate) fn host_of(topo: &Topology, service: ServiceId) -> Option<StorageNodeId> {
    match service {
        ServiceId::StorageNode(sn) => topo.storage_nodes.contains_key(&sn).then_some(sn),
        ServiceId::RepNode(rn) => topo.rep_nodes.get(&rn).map(|n| n.sn),
        ServiceId::ArbNode(an) => topo.arb_nodes.get(&an).map(|n| n.sn),
        ServiceId::Admin(admin) => topo.admins.get(&admin).map(|a| a.sn),
    }
}
