//! Whole-topology layout operations: create, rebalance, redistribute and
//! contract.

use std::collections::BTreeSet;

use reef_topology::{Topology, TopologyCandidate};
use reef_types::{RepGroupId, StorageNodeId, ZoneId};
use tracing::{debug, info};

use crate::error::PlannerError;
use crate::placement::{
    Pool, add_replica, assign_contiguous, choose_storage_dir, even_out_partitions,
    pick_arbiter_host, pick_rn_host, place_shard, required_dir_size,
};

type Result<T> = std::result::Result<T, PlannerError>;

/// Lay out shards over a topology that has zones and storage nodes but no
/// shards yet.
///
/// As many complete replica sets as the pool supports are created (at most
/// one per partition), then partitions are assigned in contiguous blocks.
pub fn create(cand: &mut TopologyCandidate, pool: &Pool, partitions: u32) -> Result<()> {
    if partitions == 0 {
        return Err(PlannerError::InvalidRequest(
            "partition count must be at least 1".into(),
        ));
    }
    let topo = &cand.topology;
    if !topo.rep_groups.is_empty() {
        return Err(PlannerError::InvalidRequest(format!(
            "topology {} already has shards; use rebalance or redistribute",
            cand.name
        )));
    }
    if topo.primary_repfactor() == 0 {
        return Err(PlannerError::InsufficientResources(
            "no primary zone with a replication factor above zero".into(),
        ));
    }
    for zone in topo.zones.values().filter(|z| z.repfactor > 0) {
        let in_pool = pool
            .iter()
            .filter(|sn| topo.storage_nodes.get(*sn).is_some_and(|n| n.zone == zone.id))
            .count();
        if in_pool < zone.repfactor as usize {
            return Err(PlannerError::InsufficientResources(format!(
                "zone {} has replication factor {} but only {in_pool} storage node(s) in the pool",
                zone.name, zone.repfactor
            )));
        }
    }

    let mut work = cand.topology.clone();
    let mut notes = Vec::new();
    while (work.rep_groups.len() as u32) < partitions {
        if place_shard(&mut work, pool, 0, &mut notes).is_none() {
            break;
        }
    }
    if work.rep_groups.is_empty() {
        return Err(PlannerError::InsufficientResources(
            "not enough storage nodes or capacity for a single shard".into(),
        ));
    }
    assign_contiguous(&mut work, partitions);
    info!(
        candidate = %cand.name,
        shards = work.rep_groups.len(),
        partitions,
        "created topology layout"
    );
    notes.push(format!(
        "assigned {partitions} partitions to {} shard(s)",
        work.rep_groups.len()
    ));
    commit(cand, work, notes);
    Ok(())
}

/// Repair placement without adding shards: fill missing replicas, drop
/// surplus ones, move replicas off over-capacity nodes and fix arbiters.
/// `zone` limits replica changes to one zone.
pub fn rebalance(cand: &mut TopologyCandidate, pool: &Pool, zone: Option<ZoneId>) -> Result<()> {
    if let Some(zone) = zone {
        cand.topology.zone(zone)?;
    }
    let mut work = cand.topology.clone();
    let mut notes = Vec::new();
    rebalance_in_place(&mut work, pool, zone, &mut notes)?;
    commit(cand, work, notes);
    Ok(())
}

pub(crate) fn rebalance_in_place(
    topo: &mut Topology,
    pool: &Pool,
    zone: Option<ZoneId>,
    notes: &mut Vec<String>,
) -> Result<()> {
    let required = required_dir_size(topo);
    let zones: Vec<(ZoneId, String, u32)> = topo
        .zones
        .values()
        .filter(|z| zone.is_none_or(|only| only == z.id))
        .map(|z| (z.id, z.name.clone(), z.repfactor))
        .collect();

    relieve_over_capacity(topo, pool, &zones, required, notes);

    let shards: Vec<RepGroupId> = topo.rep_groups.keys().copied().collect();
    for shard in &shards {
        for (zone_id, zone_name, rf) in &zones {
            let members = topo.group_members_in_zone(*shard, *zone_id);
            let have = members.len() as u32;
            for _ in have..*rf {
                if !add_replica(topo, pool, *zone_id, *shard, required, notes) {
                    return Err(PlannerError::InsufficientResources(format!(
                        "no storage node in zone {zone_name} can host another replica of {shard}"
                    )));
                }
            }
            if have > *rf {
                for rn in members.iter().rev().take((have - rf) as usize) {
                    topo.remove_rep_node(*rn)?;
                    notes.push(format!("removed {rn}"));
                }
            }
        }
    }

    fix_arbiters(topo, pool, notes)?;
    note_small_directories(topo, pool, required, notes);
    Ok(())
}

fn relieve_over_capacity(
    topo: &mut Topology,
    pool: &Pool,
    zones: &[(ZoneId, String, u32)],
    required: u64,
    notes: &mut Vec<String>,
) {
    let scoped: BTreeSet<ZoneId> = zones.iter().map(|(id, _, _)| *id).collect();
    let crowded: Vec<StorageNodeId> = topo
        .storage_nodes
        .values()
        .filter(|sn| scoped.contains(&sn.zone))
        .filter(|sn| topo.hosted_count(sn.id) > sn.capacity as usize)
        .map(|sn| sn.id)
        .collect();
    for sn in crowded {
        let Ok(node) = topo.storage_node(sn) else {
            continue;
        };
        let (zone, capacity) = (node.zone, node.capacity as usize);
        let mut excess = topo.hosted_count(sn).saturating_sub(capacity);
        let exclude = BTreeSet::from([sn]);
        for rn in topo.rep_nodes_on(sn).into_iter().rev() {
            if excess == 0 {
                break;
            }
            let Some(target) = pick_rn_host(topo, pool, zone, rn.group, required, &exclude) else {
                continue;
            };
            let Some(dir) = choose_storage_dir(topo, target, required, notes) else {
                continue;
            };
            if let Ok(node) = topo.rep_node_mut(rn) {
                node.sn = target;
                node.storage_dir = dir.into_path();
                notes.push(format!("moved {rn} from over-capacity {sn} to {target}"));
                excess -= 1;
            }
        }
        if excess > 0 {
            notes.push(format!("{sn} remains over capacity by {excess}"));
        }
    }
}

fn fix_arbiters(topo: &mut Topology, pool: &Pool, notes: &mut Vec<String>) -> Result<()> {
    let required = topo.arbiters_required();
    let shards: Vec<RepGroupId> = topo.rep_groups.keys().copied().collect();
    for shard in shards {
        let mut arbiters = topo.group_arbiters(shard);
        // Drop arbiters that are not needed, duplicated or in a zone that no
        // longer allows them.
        let keep = if required {
            arbiters
                .iter()
                .position(|an| arbiter_zone_ok(topo, topo.arb_nodes.get(an).map(|a| a.sn)))
        } else {
            None
        };
        for (i, an) in arbiters.drain(..).enumerate() {
            if Some(i) != keep {
                topo.remove_arb_node(an)?;
                notes.push(format!("removed {an}"));
            }
        }
        if required && keep.is_none() {
            let Some(sn) = pick_arbiter_host(topo, pool, shard, &BTreeSet::new()) else {
                return Err(PlannerError::InsufficientResources(format!(
                    "no storage node in a zone that allows arbiters can host the arbiter of {shard}"
                )));
            };
            let an = topo.add_arb_node(shard, sn)?;
            notes.push(format!("added {an} on {sn}"));
        }
    }
    Ok(())
}

fn arbiter_zone_ok(topo: &Topology, sn: Option<StorageNodeId>) -> bool {
    sn.and_then(|sn| topo.storage_nodes.get(&sn))
        .and_then(|n| topo.zones.get(&n.zone))
        .is_some_and(|z| z.is_primary() && z.allow_arbiters)
}

fn note_small_directories(topo: &Topology, pool: &Pool, required: u64, notes: &mut Vec<String>) {
    if required == 0 {
        return;
    }
    for sn in pool {
        let Ok(node) = topo.storage_node(*sn) else {
            continue;
        };
        for dir in &node.storage_dirs {
            if let Some(size) = dir.size {
                if size < required && topo.hosted_count(*sn) == 0 {
                    notes.push(format!(
                        "storage directory {} on {sn} ({size} bytes) is smaller than the \
                         existing minimum of {required} bytes and will be skipped",
                        dir.path
                    ));
                }
            }
        }
    }
}

/// Rebalance, then add shards while the pool can hold another complete
/// replica set, then spread partitions evenly over all shards.
pub fn redistribute(cand: &mut TopologyCandidate, pool: &Pool) -> Result<()> {
    let mut work = cand.topology.clone();
    let mut notes = Vec::new();
    rebalance_in_place(&mut work, pool, None, &mut notes)?;
    let required = required_dir_size(&work);
    let mut added = 0;
    while work.rep_groups.len() < work.partitions.len() {
        if place_shard(&mut work, pool, required, &mut notes).is_none() {
            break;
        }
        added += 1;
    }
    for (p, from, to) in even_out_partitions(&mut work) {
        notes.push(format!("moved {p} from {from} to {to}"));
    }
    info!(candidate = %cand.name, added_shards = added, "redistributed topology");
    commit(cand, work, notes);
    Ok(())
}

/// Empty and remove every storage node not in `pool`.
///
/// Replicas move to pool nodes in the same zone; shards that cannot be
/// fully rehomed are removed and their partitions spread over the rest.
pub fn contract(cand: &mut TopologyCandidate, pool: &Pool) -> Result<()> {
    let mut work = cand.topology.clone();
    let mut notes = Vec::new();
    let required = required_dir_size(&work);
    let leaving: BTreeSet<StorageNodeId> = work
        .storage_nodes
        .keys()
        .filter(|sn| !pool.contains(sn))
        .copied()
        .collect();

    let mut doomed: BTreeSet<RepGroupId> = BTreeSet::new();
    for sn in &leaving {
        let zone = work.storage_node(*sn)?.zone;
        for rn in work.rep_nodes_on(*sn) {
            let target = pick_rn_host(&work, pool, zone, rn.group, required, &leaving);
            let dir = target.and_then(|t| choose_storage_dir(&work, t, required, &mut notes));
            match (target, dir) {
                (Some(target), Some(dir)) => {
                    let node = work.rep_node_mut(rn)?;
                    node.sn = target;
                    node.storage_dir = dir.into_path();
                    notes.push(format!("moved {rn} from {sn} to {target}"));
                }
                _ => {
                    doomed.insert(rn.group);
                }
            }
        }
        for an in work.arb_nodes_on(*sn) {
            match pick_arbiter_host(&work, pool, an.group, &leaving) {
                Some(target) => {
                    work.arb_node_mut(an)?.sn = target;
                    notes.push(format!("moved {an} from {sn} to {target}"));
                }
                None => {
                    doomed.insert(an.group);
                }
            }
        }
    }

    if doomed.len() >= work.rep_groups.len() && !work.rep_groups.is_empty() {
        return Err(PlannerError::InsufficientResources(
            "the remaining storage nodes cannot host any complete shard".into(),
        ));
    }
    for shard in doomed.iter().rev() {
        drop_shard(&mut work, *shard, &mut notes)?;
    }
    for (p, from, to) in even_out_partitions(&mut work) {
        notes.push(format!("moved {p} from {from} to {to}"));
    }
    for sn in &leaving {
        if work.admins_on(*sn).is_empty() {
            work.remove_storage_node(*sn)?;
            notes.push(format!("removed {sn}"));
        } else {
            notes.push(format!("{sn} still hosts an admin and was kept"));
        }
    }
    info!(candidate = %cand.name, removed_shards = doomed.len(), "contracted topology");
    commit(cand, work, notes);
    Ok(())
}

/// Remove a shard's members and hand its partitions to the first remaining
/// shard; callers even out afterwards.
pub(crate) fn drop_shard(
    topo: &mut Topology,
    shard: RepGroupId,
    notes: &mut Vec<String>,
) -> Result<()> {
    let heir = topo
        .rep_groups
        .keys()
        .copied()
        .find(|rg| *rg != shard)
        .ok_or_else(|| {
            PlannerError::InvalidRequest(format!("{shard} is the only shard and cannot be removed"))
        })?;
    for p in topo.partitions_of(shard) {
        topo.assign_partition(p, heir)?;
    }
    for rn in topo.group_members(shard) {
        topo.remove_rep_node(rn)?;
    }
    for an in topo.group_arbiters(shard) {
        topo.remove_arb_node(an)?;
    }
    topo.remove_rep_group(shard)?;
    debug!(%shard, "dropped shard");
    notes.push(format!("removed shard {shard}"));
    Ok(())
}

pub(crate) fn commit(cand: &mut TopologyCandidate, work: Topology, notes: Vec<String>) {
    cand.topology = work;
    cand.log.extend(notes);
}
