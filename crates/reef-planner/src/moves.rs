//! Targeted moves: storage node migration, single partitions and
//! replication nodes, and removal of failed shards.

use std::collections::BTreeSet;

use reef_topology::TopologyCandidate;
use reef_types::{PartitionId, RepGroupId, RepNodeId, ServiceId, StorageNodeId};
use tracing::info;

use crate::error::PlannerError;
use crate::layout::{commit, drop_shard};
use crate::placement::{
    Pool, choose_storage_dir, even_out_partitions, pick_rn_host, required_dir_size,
    smallest_sufficient,
};

type Result<T> = std::result::Result<T, PlannerError>;

/// Move every replication node, arbiter and admin from `source` to the
/// unused `target` in the same zone.
///
/// Cross-zone moves are always rejected. The source must be unreachable.
/// Destination directories follow the smallest-sufficient rule; a target
/// that declares no directories inherits the source's.
pub fn migrate_storage_node(
    cand: &mut TopologyCandidate,
    source: StorageNodeId,
    target: StorageNodeId,
    is_reachable: &dyn Fn(ServiceId) -> bool,
) -> Result<()> {
    let topo = &cand.topology;
    let src = topo.storage_node(source)?;
    let dst = topo.storage_node(target)?;
    if src.zone != dst.zone {
        return Err(PlannerError::CrossZoneMigration {
            source_sn: source,
            source_zone: src.zone,
            target_sn: target,
            target_zone: dst.zone,
        });
    }
    if source == target {
        return Err(PlannerError::InvalidRequest(format!(
            "cannot migrate {source} to itself"
        )));
    }
    if is_reachable(ServiceId::StorageNode(source)) {
        return Err(PlannerError::SourceStillRunning(source));
    }
    if topo.hosted_count(target) + topo.admins_on(target).len() > 0 {
        return Err(PlannerError::TargetInUse(target));
    }
    let rep_nodes = topo.rep_nodes_on(source);
    let arb_nodes = topo.arb_nodes_on(source);
    let needed = rep_nodes.len() + arb_nodes.len();
    if (dst.capacity as usize) < needed {
        return Err(PlannerError::InsufficientResources(format!(
            "{target} has capacity {} but {source} hosts {needed} service(s)",
            dst.capacity
        )));
    }

    let mut work = topo.clone();
    let mut notes = Vec::new();
    let inherit = dst.storage_dirs.is_empty();
    if inherit {
        let dirs = src.storage_dirs.clone();
        let log_dir = src.log_dir.clone();
        let node = work.storage_node_mut(target)?;
        node.storage_dirs = dirs;
        node.log_dir = log_dir;
        if !node.storage_dirs.is_empty() {
            notes.push(format!("{target} inherits storage directories of {source}"));
        }
    }

    for rn in rep_nodes {
        let old_dir = work.rep_node(rn)?.storage_dir.clone();
        let new_dir = if inherit {
            old_dir
        } else {
            let required = old_dir
                .as_deref()
                .and_then(|p| src.storage_dir(p))
                .and_then(|d| d.size)
                .unwrap_or(0);
            let free = work.free_storage_dirs(target)?;
            let dir = smallest_sufficient(&free, required)
                .or_else(|| free.iter().copied().find(|d| d.size.is_none()))
                .ok_or_else(|| {
                    PlannerError::InsufficientResources(format!(
                        "no storage directory on {target} can hold {rn}"
                    ))
                })?;
            Some(dir.path.clone())
        };
        let node = work.rep_node_mut(rn)?;
        node.sn = target;
        node.storage_dir = new_dir;
        notes.push(format!("moved {rn} from {source} to {target}"));
    }
    for an in arb_nodes {
        work.arb_node_mut(an)?.sn = target;
        notes.push(format!("moved {an} from {source} to {target}"));
    }
    for admin in work.admins_on(source) {
        if let Some(a) = work.admins.get_mut(&admin) {
            a.sn = target;
            notes.push(format!("moved {admin} from {source} to {target}"));
        }
    }
    info!(candidate = %cand.name, %source, %target, "planned storage node migration");
    commit(cand, work, notes);
    Ok(())
}

/// Reassign one partition to `shard`.
pub fn move_partition(
    cand: &mut TopologyCandidate,
    partition: PartitionId,
    shard: RepGroupId,
) -> Result<()> {
    let topo = &cand.topology;
    let from = *topo
        .partitions
        .get(&partition)
        .ok_or_else(|| PlannerError::InvalidRequest(format!("{partition} does not exist")))?;
    if !topo.rep_groups.contains_key(&shard) {
        return Err(PlannerError::InvalidRequest(format!("{shard} does not exist")));
    }
    if from == shard {
        cand.note(format!("{partition} is already in {shard}"));
        return Ok(());
    }
    let mut work = topo.clone();
    work.assign_partition(partition, shard)?;
    commit(
        cand,
        work,
        vec![format!("moved {partition} from {from} to {shard}")],
    );
    Ok(())
}

/// Move a replication node to another storage node in the same zone.
///
/// When `target` is `None` the least-loaded eligible pool node is chosen.
pub fn move_rep_node(
    cand: &mut TopologyCandidate,
    pool: &Pool,
    rn: RepNodeId,
    target: Option<StorageNodeId>,
) -> Result<()> {
    let topo = &cand.topology;
    let current = topo.rep_node(rn)?;
    let zone = topo.storage_node(current.sn)?.zone;
    let required = required_dir_size(topo);
    let exclude = BTreeSet::from([current.sn]);

    let target = match target {
        Some(sn) => {
            let node = topo.storage_node(sn)?;
            if node.zone != zone {
                return Err(PlannerError::InvalidRequest(format!(
                    "{sn} is in {}, but {rn} must stay in {zone}",
                    node.zone
                )));
            }
            let single: Pool = BTreeSet::from([sn]);
            pick_rn_host(topo, &single, zone, rn.group, required, &exclude).ok_or_else(|| {
                PlannerError::InsufficientResources(format!("{sn} cannot host {rn}"))
            })?
        }
        None => pick_rn_host(topo, pool, zone, rn.group, required, &exclude).ok_or_else(|| {
            PlannerError::InsufficientResources(format!("no storage node can host {rn}"))
        })?,
    };

    let mut work = topo.clone();
    let mut notes = Vec::new();
    let from = current.sn;
    let dir = choose_storage_dir(&work, target, required, &mut notes)
        .ok_or_else(|| PlannerError::InsufficientResources(format!("no free directory on {target}")))?;
    let node = work.rep_node_mut(rn)?;
    node.sn = target;
    node.storage_dir = dir.into_path();
    notes.push(format!("moved {rn} from {from} to {target}"));
    commit(cand, work, notes);
    Ok(())
}

/// Remove a shard whose members have all been stopped, spreading its
/// partitions over the remaining shards.
pub fn remove_failed_shard(
    cand: &mut TopologyCandidate,
    shard: RepGroupId,
    is_reachable: &dyn Fn(ServiceId) -> bool,
) -> Result<()> {
    let topo = &cand.topology;
    topo.rep_group(shard)?;
    let members = topo
        .group_members(shard)
        .into_iter()
        .map(ServiceId::RepNode)
        .chain(topo.group_arbiters(shard).into_iter().map(ServiceId::ArbNode));
    for service in members {
        if is_reachable(service) {
            return Err(PlannerError::ShardReachable { shard, service });
        }
    }
    let mut work = topo.clone();
    let mut notes = Vec::new();
    drop_shard(&mut work, shard, &mut notes)?;
    for (p, from, to) in even_out_partitions(&mut work) {
        notes.push(format!("moved {p} from {from} to {to}"));
    }
    info!(candidate = %cand.name, %shard, "planned removal of failed shard");
    commit(cand, work, notes);
    Ok(())
}
