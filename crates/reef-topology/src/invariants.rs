//! Structural checks every deployable topology must pass.
//!
//! Over-capacity storage nodes are not structural violations; the verifier
//! flags them separately.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use reef_types::{ArbNodeId, PartitionId, RepGroupId, RepNodeId, StorageNodeId, ZoneId};
use serde::{Deserialize, Serialize};

use crate::Topology;

/// A broken structural rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Violation {
    /// A partition points at a shard that does not exist.
    OrphanPartition {
        partition: PartitionId,
        shard: RepGroupId,
    },
    /// A shard owns no partitions although partitions exist.
    ShardWithoutPartitions { shard: RepGroupId },
    /// A shard's replica count in a zone differs from the zone's RF.
    ZoneRepFactor {
        shard: RepGroupId,
        zone: ZoneId,
        expected: u32,
        actual: u32,
    },
    /// Two members of a shard share a storage node.
    ReplicasShareNode {
        shard: RepGroupId,
        sn: StorageNodeId,
    },
    /// A replication node references a missing shard or storage node.
    DanglingRepNode { rn: RepNodeId },
    /// An arbiter references a missing shard or storage node.
    DanglingArbNode { an: ArbNodeId },
    /// The shard needs an arbiter but has none.
    MissingArbiter { shard: RepGroupId },
    /// The shard has an arbiter it does not need, or more than one.
    UnexpectedArbiter { an: ArbNodeId },
    /// An arbiter sits in a zone that does not allow arbiters.
    ArbiterZoneDisallowed { an: ArbNodeId, zone: ZoneId },
    /// Two replication nodes use the same storage directory.
    StorageDirShared { sn: StorageNodeId, path: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::OrphanPartition { partition, shard } => {
                write!(f, "{partition} is mapped to missing shard {shard}")
            }
            Violation::ShardWithoutPartitions { shard } => {
                write!(f, "{shard} owns no partitions")
            }
            Violation::ZoneRepFactor {
                shard,
                zone,
                expected,
                actual,
            } => write!(
                f,
                "{shard} has {actual} replica(s) in {zone}, expected {expected}"
            ),
            Violation::ReplicasShareNode { shard, sn } => {
                write!(f, "{shard} has more than one replica on {sn}")
            }
            Violation::DanglingRepNode { rn } => {
                write!(f, "{rn} references a missing shard or storage node")
            }
            Violation::DanglingArbNode { an } => {
                write!(f, "{an} references a missing shard or storage node")
            }
            Violation::MissingArbiter { shard } => write!(f, "{shard} has no arbiter"),
            Violation::UnexpectedArbiter { an } => write!(f, "{an} is not needed"),
            Violation::ArbiterZoneDisallowed { an, zone } => {
                write!(f, "{an} is hosted in {zone}, which does not allow arbiters")
            }
            Violation::StorageDirShared { sn, path } => {
                write!(f, "storage directory {path} on {sn} is used by several nodes")
            }
        }
    }
}

/// Run every structural check.
pub fn check(topo: &Topology) -> Vec<Violation> {
    let mut out = Vec::new();
    check_partitions(topo, &mut out);
    check_rep_nodes(topo, &mut out);
    check_arbiters(topo, &mut out);
    out
}

fn check_partitions(topo: &Topology, out: &mut Vec<Violation>) {
    for (partition, shard) in &topo.partitions {
        if !topo.rep_groups.contains_key(shard) {
            out.push(Violation::OrphanPartition {
                partition: *partition,
                shard: *shard,
            });
        }
    }
    if topo.partitions.is_empty() {
        return;
    }
    let owners: BTreeSet<RepGroupId> = topo.partitions.values().copied().collect();
    for shard in topo.rep_groups.keys() {
        if !owners.contains(shard) {
            out.push(Violation::ShardWithoutPartitions { shard: *shard });
        }
    }
}

fn check_rep_nodes(topo: &Topology, out: &mut Vec<Violation>) {
    let mut per_zone: BTreeMap<(RepGroupId, ZoneId), u32> = BTreeMap::new();
    let mut per_node: BTreeSet<(RepGroupId, StorageNodeId)> = BTreeSet::new();
    let mut dirs: BTreeSet<(StorageNodeId, &str)> = BTreeSet::new();

    for rn in topo.rep_nodes.values() {
        let Some(sn) = topo.storage_nodes.get(&rn.sn) else {
            out.push(Violation::DanglingRepNode { rn: rn.id });
            continue;
        };
        if !topo.rep_groups.contains_key(&rn.id.group) {
            out.push(Violation::DanglingRepNode { rn: rn.id });
            continue;
        }
        *per_zone.entry((rn.id.group, sn.zone)).or_default() += 1;
        if !per_node.insert((rn.id.group, rn.sn)) {
            out.push(Violation::ReplicasShareNode {
                shard: rn.id.group,
                sn: rn.sn,
            });
        }
        if let Some(path) = rn.storage_dir.as_deref() {
            if !dirs.insert((rn.sn, path)) {
                out.push(Violation::StorageDirShared {
                    sn: rn.sn,
                    path: path.to_string(),
                });
            }
        }
    }

    for shard in topo.rep_groups.keys() {
        for zone in topo.zones.values() {
            let actual = per_zone.get(&(*shard, zone.id)).copied().unwrap_or(0);
            if actual != zone.repfactor {
                out.push(Violation::ZoneRepFactor {
                    shard: *shard,
                    zone: zone.id,
                    expected: zone.repfactor,
                    actual,
                });
            }
        }
    }
}

fn check_arbiters(topo: &Topology, out: &mut Vec<Violation>) {
    let required = topo.arbiters_required();
    let mut seen: BTreeSet<RepGroupId> = BTreeSet::new();

    for an in topo.arb_nodes.values() {
        let Some(sn) = topo.storage_nodes.get(&an.sn) else {
            out.push(Violation::DanglingArbNode { an: an.id });
            continue;
        };
        if !topo.rep_groups.contains_key(&an.id.group) {
            out.push(Violation::DanglingArbNode { an: an.id });
            continue;
        }
        if !required || !seen.insert(an.id.group) {
            out.push(Violation::UnexpectedArbiter { an: an.id });
        }
        if topo.zones.get(&sn.zone).is_some_and(|z| !z.allow_arbiters) {
            out.push(Violation::ArbiterZoneDisallowed {
                an: an.id,
                zone: sn.zone,
            });
        }
    }

    if required {
        for shard in topo.rep_groups.keys() {
            if !seen.contains(shard) {
                out.push(Violation::MissingArbiter { shard: *shard });
            }
        }
    }
}
