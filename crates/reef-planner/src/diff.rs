//! Differences between two topologies, used to derive deploy tasks.

use std::collections::BTreeSet;

use reef_topology::Topology;
use reef_types::{ArbNodeId, PartitionId, RepGroupId, RepNodeId, StorageNodeId, ZoneId};

/// A replication node placement in the target topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RnPlacement {
    /// The node.
    pub rn: RepNodeId,
    /// Storage node it lives on.
    pub sn: StorageNodeId,
    /// Storage directory, if any.
    pub storage_dir: Option<String>,
}

/// A replication node that changes host or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RnRelocation {
    /// The node.
    pub rn: RepNodeId,
    /// Current host.
    pub from: StorageNodeId,
    /// New placement.
    pub to: RnPlacement,
}

/// What changes when `current` is replaced by `target`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyDiff {
    /// Zones only present in the target.
    pub new_zones: Vec<ZoneId>,
    /// Zones whose replication factor or type changed.
    pub changed_zones: Vec<ZoneId>,
    /// Storage nodes only present in the target.
    pub new_storage_nodes: Vec<StorageNodeId>,
    /// Storage nodes only present in the current topology.
    pub removed_storage_nodes: Vec<StorageNodeId>,
    /// Shards only present in the target.
    pub new_shards: Vec<RepGroupId>,
    /// Shards only present in the current topology.
    pub removed_shards: Vec<RepGroupId>,
    /// Replication nodes to create.
    pub added_rns: Vec<RnPlacement>,
    /// Replication nodes to remove, with their current host.
    pub removed_rns: Vec<(RepNodeId, StorageNodeId)>,
    /// Replication nodes to move.
    pub relocated_rns: Vec<RnRelocation>,
    /// Arbiters to create, with their host.
    pub added_ans: Vec<(ArbNodeId, StorageNodeId)>,
    /// Arbiters to remove, with their current host.
    pub removed_ans: Vec<(ArbNodeId, StorageNodeId)>,
    /// Arbiters to move: `(id, from, to)`.
    pub relocated_ans: Vec<(ArbNodeId, StorageNodeId, StorageNodeId)>,
    /// Partitions changing owner: `(partition, from, to)`.
    pub moved_partitions: Vec<(PartitionId, RepGroupId, RepGroupId)>,
}

impl TopologyDiff {
    /// Compare two topologies.
    pub fn between(current: &Topology, target: &Topology) -> Self {
        let mut diff = TopologyDiff::default();

        for (id, zone) in &target.zones {
            match current.zones.get(id) {
                None => diff.new_zones.push(*id),
                Some(old) if old != zone => diff.changed_zones.push(*id),
                Some(_) => {}
            }
        }

        diff.new_storage_nodes = added(current.storage_nodes.keys(), target.storage_nodes.keys());
        diff.removed_storage_nodes =
            added(target.storage_nodes.keys(), current.storage_nodes.keys());
        diff.new_shards = added(current.rep_groups.keys(), target.rep_groups.keys());
        diff.removed_shards = added(target.rep_groups.keys(), current.rep_groups.keys());

        for (id, rn) in &target.rep_nodes {
            let placement = RnPlacement {
                rn: *id,
                sn: rn.sn,
                storage_dir: rn.storage_dir.clone(),
            };
            match current.rep_nodes.get(id) {
                None => diff.added_rns.push(placement),
                Some(old) if old.sn != rn.sn || old.storage_dir != rn.storage_dir => {
                    diff.relocated_rns.push(RnRelocation {
                        rn: *id,
                        from: old.sn,
                        to: placement,
                    })
                }
                Some(_) => {}
            }
        }
        for (id, rn) in &current.rep_nodes {
            if !target.rep_nodes.contains_key(id) {
                diff.removed_rns.push((*id, rn.sn));
            }
        }

        for (id, an) in &target.arb_nodes {
            match current.arb_nodes.get(id) {
                None => diff.added_ans.push((*id, an.sn)),
                Some(old) if old.sn != an.sn => diff.relocated_ans.push((*id, old.sn, an.sn)),
                Some(_) => {}
            }
        }
        for (id, an) in &current.arb_nodes {
            if !target.arb_nodes.contains_key(id) {
                diff.removed_ans.push((*id, an.sn));
            }
        }

        for (p, to) in &target.partitions {
            if let Some(from) = current.partitions.get(p) {
                if from != to {
                    diff.moved_partitions.push((*p, *from, *to));
                }
            }
        }
        diff
    }

    /// Whether deploying the target changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == TopologyDiff::default()
    }

    /// Shards touched by the change, for lock sets.
    pub fn touched_shards(&self) -> BTreeSet<RepGroupId> {
        let mut out: BTreeSet<RepGroupId> = BTreeSet::new();
        out.extend(self.new_shards.iter().copied());
        out.extend(self.removed_shards.iter().copied());
        out.extend(self.added_rns.iter().map(|p| p.rn.group));
        out.extend(self.removed_rns.iter().map(|(rn, _)| rn.group));
        out.extend(self.relocated_rns.iter().map(|r| r.rn.group));
        out.extend(self.added_ans.iter().map(|(an, _)| an.group));
        out.extend(self.removed_ans.iter().map(|(an, _)| an.group));
        out.extend(self.relocated_ans.iter().map(|(an, _, _)| an.group));
        for (_, from, to) in &self.moved_partitions {
            out.insert(*from);
            out.insert(*to);
        }
        out
    }

    /// Storage nodes touched by the change, for lock sets.
    pub fn touched_storage_nodes(&self) -> BTreeSet<StorageNodeId> {
        let mut out: BTreeSet<StorageNodeId> = BTreeSet::new();
        out.extend(self.new_storage_nodes.iter().copied());
        out.extend(self.removed_storage_nodes.iter().copied());
        out.extend(self.added_rns.iter().map(|p| p.sn));
        out.extend(self.removed_rns.iter().map(|(_, sn)| *sn));
        for r in &self.relocated_rns {
            out.insert(r.from);
            out.insert(r.to.sn);
        }
        out.extend(self.added_ans.iter().map(|(_, sn)| *sn));
        out.extend(self.removed_ans.iter().map(|(_, sn)| *sn));
        for (_, from, to) in &self.relocated_ans {
            out.insert(*from);
            out.insert(*to);
        }
        out
    }
}

fn added<'a, K: Ord + Copy + 'a>(
    before: impl Iterator<Item = &'a K>,
    after: impl Iterator<Item = &'a K>,
) -> Vec<K> {
    let before: BTreeSet<K> = before.copied().collect();
    after.filter(|k| !before.contains(k)).copied().collect()
}
