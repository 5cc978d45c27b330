//! Host and storage directory selection shared by all planner operations.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use reef_topology::{StorageDir, Topology};
use reef_types::{PartitionId, RepGroupId, StorageNodeId, ZoneId};
use tracing::debug;

/// The set of storage nodes a planner operation may place services on.
pub type Pool = BTreeSet<StorageNodeId>;

/// Where a new replication node's data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirChoice {
    /// A declared directory large enough for the shard.
    Sized(String),
    /// A declared directory without a size.
    Unsized(String),
    /// The node declares no directories; use its root directory.
    Root,
}

impl DirChoice {
    /// Path stored on the replication node.
    pub fn into_path(self) -> Option<String> {
        match self {
            DirChoice::Sized(p) | DirChoice::Unsized(p) => Some(p),
            DirChoice::Root => None,
        }
    }
}

/// Among `dirs`, the smallest one whose declared size is at least
/// `required`. Ties go to the lexicographically smallest path.
pub fn smallest_sufficient<'a>(dirs: &[&'a StorageDir], required: u64) -> Option<&'a StorageDir> {
    dirs.iter()
        .copied()
        .filter(|d| d.size.is_some_and(|s| s >= required))
        .min_by(|a, b| a.size.cmp(&b.size).then_with(|| a.path.cmp(&b.path)))
}

/// Smallest declared directory size currently backing a replication node;
/// new directories below it would be skipped. Zero if none is sized.
pub fn required_dir_size(topo: &Topology) -> u64 {
    topo.rep_nodes
        .values()
        .filter_map(|rn| {
            let path = rn.storage_dir.as_deref()?;
            topo.storage_nodes.get(&rn.sn)?.storage_dir(path)?.size
        })
        .min()
        .unwrap_or(0)
}

/// Pick a free directory on `sn` for a new replication node.
///
/// Sized directories that fit win; unsized directories are a fallback and
/// produce a note. `None` means the node has declared directories but none
/// is usable.
pub fn choose_storage_dir(
    topo: &Topology,
    sn: StorageNodeId,
    required: u64,
    notes: &mut Vec<String>,
) -> Option<DirChoice> {
    let node = topo.storage_node(sn).ok()?;
    if node.storage_dirs.is_empty() {
        return Some(DirChoice::Root);
    }
    let free = topo.free_storage_dirs(sn).ok()?;
    if let Some(dir) = smallest_sufficient(&free, required) {
        return Some(DirChoice::Sized(dir.path.clone()));
    }
    let fallback = free
        .iter()
        .filter(|d| d.size.is_none())
        .min_by(|a, b| a.path.cmp(&b.path))?;
    notes.push(format!(
        "storage directory {} on {sn} has no declared size",
        fallback.path
    ));
    Some(DirChoice::Unsized(fallback.path.clone()))
}

/// Whether a directory could host a new replication node without notes.
fn has_usable_dir(topo: &Topology, sn: StorageNodeId, required: u64) -> bool {
    let Ok(node) = topo.storage_node(sn) else {
        return false;
    };
    if node.storage_dirs.is_empty() {
        return true;
    }
    topo.free_storage_dirs(sn)
        .map(|free| smallest_sufficient(&free, required).is_some() || free.iter().any(|d| d.size.is_none()))
        .unwrap_or(false)
}

/// Compare load as `hosted / capacity` without division.
fn load_cmp(topo: &Topology, a: StorageNodeId, b: StorageNodeId) -> Ordering {
    let cap = |sn| {
        topo.storage_nodes
            .get(&sn)
            .map(|n| u64::from(n.capacity))
            .unwrap_or(0)
    };
    let hosted = |sn| topo.hosted_count(sn) as u64;
    (hosted(a) * cap(b))
        .cmp(&(hosted(b) * cap(a)))
        .then_with(|| a.cmp(&b))
}

/// Pick the least-loaded pool node in `zone` that can host another member
/// of `group`.
pub fn pick_rn_host(
    topo: &Topology,
    pool: &Pool,
    zone: ZoneId,
    group: RepGroupId,
    required: u64,
    exclude: &BTreeSet<StorageNodeId>,
) -> Option<StorageNodeId> {
    let busy: BTreeSet<StorageNodeId> = topo
        .rep_nodes
        .values()
        .filter(|rn| rn.id.group == group)
        .map(|rn| rn.sn)
        .collect();
    pool.iter()
        .copied()
        .filter(|sn| !exclude.contains(sn) && !busy.contains(sn))
        .filter(|sn| topo.storage_nodes.get(sn).is_some_and(|n| n.zone == zone))
        .filter(|sn| topo.free_slots(*sn).unwrap_or(0) > 0)
        .filter(|sn| has_usable_dir(topo, *sn, required))
        .min_by(|a, b| load_cmp(topo, *a, *b))
}

/// Pick a host for `group`'s arbiter: a pool node in a primary zone that
/// allows arbiters, preferring zones with replication factor zero, then
/// nodes with the fewest arbiters.
pub fn pick_arbiter_host(
    topo: &Topology,
    pool: &Pool,
    group: RepGroupId,
    exclude: &BTreeSet<StorageNodeId>,
) -> Option<StorageNodeId> {
    let busy: BTreeSet<StorageNodeId> = topo
        .rep_nodes
        .values()
        .filter(|rn| rn.id.group == group)
        .map(|rn| rn.sn)
        .collect();
    pool.iter()
        .copied()
        .filter(|sn| !exclude.contains(sn) && !busy.contains(sn))
        .filter_map(|sn| {
            let node = topo.storage_nodes.get(&sn)?;
            let zone = topo.zones.get(&node.zone)?;
            (zone.is_primary() && zone.allow_arbiters && topo.free_slots(sn).unwrap_or(0) > 0)
                .then_some((zone.repfactor != 0, topo.arb_nodes_on(sn).len(), sn))
        })
        .min_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| load_cmp(topo, a.2, b.2))
        })
        .map(|(_, _, sn)| sn)
}

/// Add one replica of `group` in `zone`. Returns false when no host fits.
pub fn add_replica(
    topo: &mut Topology,
    pool: &Pool,
    zone: ZoneId,
    group: RepGroupId,
    required: u64,
    notes: &mut Vec<String>,
) -> bool {
    let Some(sn) = pick_rn_host(topo, pool, zone, group, required, &BTreeSet::new()) else {
        return false;
    };
    let Some(dir) = choose_storage_dir(topo, sn, required, notes) else {
        return false;
    };
    match topo.add_rep_node(group, sn, dir.into_path()) {
        Ok(rn) => {
            notes.push(format!("added {rn} on {sn}"));
            true
        }
        Err(_) => false,
    }
}

/// Try to create a new shard with a complete replica set (and arbiter if
/// needed). On failure the topology is left unchanged.
pub fn place_shard(
    topo: &mut Topology,
    pool: &Pool,
    required: u64,
    notes: &mut Vec<String>,
) -> Option<RepGroupId> {
    let mut work = topo.clone();
    let mut local_notes = Vec::new();
    let group = work.add_rep_group();
    let zones: Vec<(ZoneId, u32)> = work
        .zones
        .values()
        .map(|z| (z.id, z.repfactor))
        .collect();
    for (zone, rf) in zones {
        for _ in 0..rf {
            if !add_replica(&mut work, pool, zone, group, required, &mut local_notes) {
                debug!(%group, %zone, "no room for a complete replica set");
                return None;
            }
        }
    }
    if work.arbiters_required() {
        let sn = pick_arbiter_host(&work, pool, group, &BTreeSet::new())?;
        let an = work.add_arb_node(group, sn).ok()?;
        local_notes.push(format!("added {an} on {sn}"));
    }
    *topo = work;
    notes.push(format!("created shard {group}"));
    notes.extend(local_notes);
    Some(group)
}

/// Per-shard partition targets: shards in id order get `total / n`, the
/// first `total % n` one more.
fn partition_targets(shards: &[RepGroupId], total: usize) -> BTreeMap<RepGroupId, usize> {
    let n = shards.len().max(1);
    shards
        .iter()
        .enumerate()
        .map(|(i, rg)| (*rg, total / n + usize::from(i < total % n)))
        .collect()
}

/// Assign partitions `1..=count` in contiguous blocks across all shards.
pub fn assign_contiguous(topo: &mut Topology, count: u32) {
    let shards: Vec<RepGroupId> = topo.rep_groups.keys().copied().collect();
    let targets = partition_targets(&shards, count as usize);
    topo.partitions.clear();
    let mut next = 1u32;
    for rg in &shards {
        for _ in 0..targets[rg] {
            topo.partitions.insert(PartitionId::new(next), *rg);
            next += 1;
        }
    }
}

/// Move partitions so every shard holds a near-equal share, moving the
/// highest-numbered surplus partitions first. Returns the moves made.
pub fn even_out_partitions(
    topo: &mut Topology,
) -> Vec<(PartitionId, RepGroupId, RepGroupId)> {
    let shards: Vec<RepGroupId> = topo.rep_groups.keys().copied().collect();
    if shards.is_empty() {
        return Vec::new();
    }
    let targets = partition_targets(&shards, topo.partitions.len());
    let mut owned: BTreeMap<RepGroupId, Vec<PartitionId>> =
        shards.iter().map(|rg| (*rg, Vec::new())).collect();
    let mut spare: Vec<(PartitionId, RepGroupId)> = Vec::new();
    for (p, rg) in &topo.partitions {
        match owned.get_mut(rg) {
            Some(list) => list.push(*p),
            None => spare.push((*p, *rg)),
        }
    }
    for (rg, list) in owned.iter_mut() {
        while list.len() > targets[rg] {
            if let Some(p) = list.pop() {
                spare.push((p, *rg));
            }
        }
    }
    spare.sort();
    let mut moves = Vec::new();
    for rg in &shards {
        let have = owned.get(rg).map(Vec::len).unwrap_or(0);
        for _ in have..targets[rg] {
            let Some((p, from)) = spare.pop() else { break };
            topo.partitions.insert(p, *rg);
            moves.push((p, from, *rg));
        }
    }
    moves.sort();
    moves
}
