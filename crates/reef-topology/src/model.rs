//! The topology graph: zones, storage nodes, shards, replicas and partitions.

use std::collections::{BTreeMap, BTreeSet};

use reef_types::{
    AdminId, ArbNodeId, PartitionId, RepGroupId, RepNodeId, StorageNodeId, ZoneId, ZoneType,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TopologyError;

type Result<T> = std::result::Result<T, TopologyError>;

/// A fault domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    /// Zone id.
    pub id: ZoneId,
    /// Unique, operator-chosen name.
    pub name: String,
    /// Replicas of each shard placed in this zone.
    pub repfactor: u32,
    /// Primary zones elect masters; secondary zones do not.
    pub zone_type: ZoneType,
    /// Whether arbiters may be hosted here.
    pub allow_arbiters: bool,
    /// Whether masters should prefer this zone.
    pub master_affinity: bool,
}

impl Zone {
    /// Whether the zone contributes to quorum.
    pub fn is_primary(&self) -> bool {
        self.zone_type == ZoneType::Primary
    }
}

/// A mount point on a storage node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDir {
    /// Absolute path.
    pub path: String,
    /// Declared size in bytes, if the operator supplied one.
    pub size: Option<u64>,
}

impl StorageDir {
    /// A directory with a declared size.
    pub fn sized(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size: Some(size),
        }
    }

    /// A directory without a declared size.
    pub fn without_size(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: None,
        }
    }
}

/// A host that runs replication nodes, arbiters and admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageNode {
    /// Storage node id.
    pub id: StorageNodeId,
    /// Owning zone.
    pub zone: ZoneId,
    /// Registry host name.
    pub host: String,
    /// Registry port.
    pub port: u16,
    /// Maximum number of RNs and arbiters hosted.
    pub capacity: u32,
    /// Declared storage directories.
    pub storage_dirs: Vec<StorageDir>,
    /// Directory for replication logs, if separate.
    pub log_dir: Option<String>,
    /// Whether the node agent is registered with the store.
    pub registered: bool,
}

impl StorageNode {
    /// Look up a declared storage directory.
    pub fn storage_dir(&self, path: &str) -> Option<&StorageDir> {
        self.storage_dirs.iter().find(|d| d.path == path)
    }
}

/// A shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepGroup {
    /// Shard id.
    pub id: RepGroupId,
    /// Highest replication node number ever allocated in this shard.
    pub last_rn: u32,
    /// Highest arbiter number ever allocated in this shard.
    pub last_an: u32,
}

/// A data replica of a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepNode {
    /// Replication node id.
    pub id: RepNodeId,
    /// Hosting storage node.
    pub sn: StorageNodeId,
    /// Storage directory; `None` means the node's root directory.
    pub storage_dir: Option<String>,
}

/// A quorum-only, dataless replica of a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbNode {
    /// Arbiter id.
    pub id: ArbNodeId,
    /// Hosting storage node.
    pub sn: StorageNodeId,
}

/// An admin service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admin {
    /// Admin id.
    pub id: AdminId,
    /// Hosting storage node.
    pub sn: StorageNodeId,
}

/// A snapshot of the cluster layout.
///
/// Every cross-reference is an id into one of the maps; the struct owns all
/// components. `sequence` increases each time the topology is committed as
/// the live topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Store name.
    pub store_name: String,
    /// Commit sequence number.
    pub sequence: u64,
    /// Zones by id.
    pub zones: BTreeMap<ZoneId, Zone>,
    /// Storage nodes by id.
    pub storage_nodes: BTreeMap<StorageNodeId, StorageNode>,
    /// Shards by id.
    pub rep_groups: BTreeMap<RepGroupId, RepGroup>,
    /// Replication nodes by id.
    pub rep_nodes: BTreeMap<RepNodeId, RepNode>,
    /// Arbiters by id.
    pub arb_nodes: BTreeMap<ArbNodeId, ArbNode>,
    /// Admins by id.
    pub admins: BTreeMap<AdminId, Admin>,
    /// Partition to owning shard.
    pub partitions: BTreeMap<PartitionId, RepGroupId>,
    next_zone: u32,
    next_sn: u32,
    next_rg: u32,
    next_admin: u32,
}

impl Topology {
    /// Create an empty topology.
    pub fn new(store_name: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
            sequence: 0,
            zones: BTreeMap::new(),
            storage_nodes: BTreeMap::new(),
            rep_groups: BTreeMap::new(),
            rep_nodes: BTreeMap::new(),
            arb_nodes: BTreeMap::new(),
            admins: BTreeMap::new(),
            partitions: BTreeMap::new(),
            next_zone: 1,
            next_sn: 1,
            next_rg: 1,
            next_admin: 1,
        }
    }

    // -- zones --------------------------------------------------------------

    /// Add a zone. Names are unique.
    pub fn add_zone(
        &mut self,
        name: &str,
        repfactor: u32,
        zone_type: ZoneType,
        allow_arbiters: bool,
        master_affinity: bool,
    ) -> Result<ZoneId> {
        if self.zone_by_name(name).is_some() {
            return Err(TopologyError::DuplicateZone(name.to_string()));
        }
        let id = ZoneId::new(self.next_zone);
        self.next_zone += 1;
        self.zones.insert(
            id,
            Zone {
                id,
                name: name.to_string(),
                repfactor,
                zone_type,
                allow_arbiters,
                master_affinity,
            },
        );
        debug!(zone = %id, name, repfactor, %zone_type, "added zone");
        Ok(id)
    }

    /// Look up a zone.
    pub fn zone(&self, id: ZoneId) -> Result<&Zone> {
        self.zones.get(&id).ok_or(TopologyError::UnknownZone(id))
    }

    /// Look up a zone for modification.
    pub fn zone_mut(&mut self, id: ZoneId) -> Result<&mut Zone> {
        self.zones.get_mut(&id).ok_or(TopologyError::UnknownZone(id))
    }

    /// Find a zone by name.
    pub fn zone_by_name(&self, name: &str) -> Option<&Zone> {
        self.zones.values().find(|z| z.name == name)
    }

    /// Sum of replication factors across primary zones.
    pub fn primary_repfactor(&self) -> u32 {
        self.zones
            .values()
            .filter(|z| z.is_primary())
            .map(|z| z.repfactor)
            .sum()
    }

    /// Sum of replication factors across all zones.
    pub fn total_repfactor(&self) -> u32 {
        self.zones.values().map(|z| z.repfactor).sum()
    }

    /// Whether shards need an arbiter: two electable replicas and a primary
    /// zone that allows arbiters.
    pub fn arbiters_required(&self) -> bool {
        self.primary_repfactor() == 2
            && self
                .zones
                .values()
                .any(|z| z.is_primary() && z.allow_arbiters)
    }

    // -- storage nodes ------------------------------------------------------

    /// Add a storage node to a zone.
    pub fn add_storage_node(
        &mut self,
        zone: ZoneId,
        host: &str,
        port: u16,
        capacity: u32,
        storage_dirs: Vec<StorageDir>,
    ) -> Result<StorageNodeId> {
        self.zone(zone)?;
        let id = StorageNodeId::new(self.next_sn);
        self.next_sn += 1;
        self.storage_nodes.insert(
            id,
            StorageNode {
                id,
                zone,
                host: host.to_string(),
                port,
                capacity,
                storage_dirs,
                log_dir: None,
                registered: true,
            },
        );
        debug!(sn = %id, %zone, host, port, capacity, "added storage node");
        Ok(id)
    }

    /// Look up a storage node.
    pub fn storage_node(&self, id: StorageNodeId) -> Result<&StorageNode> {
        self.storage_nodes
            .get(&id)
            .ok_or(TopologyError::UnknownStorageNode(id))
    }

    /// Look up a storage node for modification.
    pub fn storage_node_mut(&mut self, id: StorageNodeId) -> Result<&mut StorageNode> {
        self.storage_nodes
            .get_mut(&id)
            .ok_or(TopologyError::UnknownStorageNode(id))
    }

    /// Remove a storage node that hosts nothing.
    pub fn remove_storage_node(&mut self, id: StorageNodeId) -> Result<StorageNode> {
        self.storage_node(id)?;
        let count = self.hosted_count(id) + self.admins_on(id).len();
        if count > 0 {
            return Err(TopologyError::StorageNodeInUse { sn: id, count });
        }
        debug!(sn = %id, "removed storage node");
        self.storage_nodes
            .remove(&id)
            .ok_or(TopologyError::UnknownStorageNode(id))
    }

    /// Storage nodes in a zone, in id order.
    pub fn storage_nodes_in(&self, zone: ZoneId) -> Vec<StorageNodeId> {
        self.storage_nodes
            .values()
            .filter(|sn| sn.zone == zone)
            .map(|sn| sn.id)
            .collect()
    }

    /// Replication nodes hosted on a storage node.
    pub fn rep_nodes_on(&self, sn: StorageNodeId) -> Vec<RepNodeId> {
        self.rep_nodes
            .values()
            .filter(|rn| rn.sn == sn)
            .map(|rn| rn.id)
            .collect()
    }

    /// Arbiters hosted on a storage node.
    pub fn arb_nodes_on(&self, sn: StorageNodeId) -> Vec<ArbNodeId> {
        self.arb_nodes
            .values()
            .filter(|an| an.sn == sn)
            .map(|an| an.id)
            .collect()
    }

    /// Admins hosted on a storage node.
    pub fn admins_on(&self, sn: StorageNodeId) -> Vec<AdminId> {
        self.admins
            .values()
            .filter(|a| a.sn == sn)
            .map(|a| a.id)
            .collect()
    }

    /// Number of RNs and arbiters hosted on a storage node.
    pub fn hosted_count(&self, sn: StorageNodeId) -> usize {
        self.rep_nodes.values().filter(|rn| rn.sn == sn).count()
            + self.arb_nodes.values().filter(|an| an.sn == sn).count()
    }

    /// Number of RNs hosted on a storage node.
    pub fn rep_node_count(&self, sn: StorageNodeId) -> usize {
        self.rep_nodes.values().filter(|rn| rn.sn == sn).count()
    }

    /// Capacity slots still free on a storage node (0 when over capacity).
    pub fn free_slots(&self, sn: StorageNodeId) -> Result<usize> {
        let node = self.storage_node(sn)?;
        Ok((node.capacity as usize).saturating_sub(self.hosted_count(sn)))
    }

    /// Storage directories of a node not yet assigned to any RN.
    pub fn free_storage_dirs(&self, sn: StorageNodeId) -> Result<Vec<&StorageDir>> {
        let node = self.storage_node(sn)?;
        let used: BTreeSet<&str> = self
            .rep_nodes
            .values()
            .filter(|rn| rn.sn == sn)
            .filter_map(|rn| rn.storage_dir.as_deref())
            .collect();
        Ok(node
            .storage_dirs
            .iter()
            .filter(|d| !used.contains(d.path.as_str()))
            .collect())
    }

    // -- shards -------------------------------------------------------------

    /// Add an empty shard.
    pub fn add_rep_group(&mut self) -> RepGroupId {
        let id = RepGroupId::new(self.next_rg);
        self.next_rg += 1;
        self.rep_groups.insert(
            id,
            RepGroup {
                id,
                last_rn: 0,
                last_an: 0,
            },
        );
        debug!(shard = %id, "added shard");
        id
    }

    /// Remove a shard with no members and no partitions.
    pub fn remove_rep_group(&mut self, id: RepGroupId) -> Result<()> {
        self.rep_group(id)?;
        if !self.group_members(id).is_empty()
            || !self.group_arbiters(id).is_empty()
            || self.partitions.values().any(|g| *g == id)
        {
            return Err(TopologyError::ShardInUse(id));
        }
        self.rep_groups.remove(&id);
        debug!(shard = %id, "removed shard");
        Ok(())
    }

    /// Look up a shard.
    pub fn rep_group(&self, id: RepGroupId) -> Result<&RepGroup> {
        self.rep_groups
            .get(&id)
            .ok_or(TopologyError::UnknownShard(id))
    }

    /// Replication nodes of a shard, in id order.
    pub fn group_members(&self, group: RepGroupId) -> Vec<RepNodeId> {
        self.rep_nodes
            .keys()
            .filter(|id| id.group == group)
            .copied()
            .collect()
    }

    /// Arbiters of a shard.
    pub fn group_arbiters(&self, group: RepGroupId) -> Vec<ArbNodeId> {
        self.arb_nodes
            .keys()
            .filter(|id| id.group == group)
            .copied()
            .collect()
    }

    /// Replication nodes of a shard hosted in a zone.
    pub fn group_members_in_zone(&self, group: RepGroupId, zone: ZoneId) -> Vec<RepNodeId> {
        self.rep_nodes
            .values()
            .filter(|rn| rn.id.group == group)
            .filter(|rn| {
                self.storage_nodes
                    .get(&rn.sn)
                    .is_some_and(|sn| sn.zone == zone)
            })
            .map(|rn| rn.id)
            .collect()
    }

    /// Partitions owned by a shard.
    pub fn partitions_of(&self, group: RepGroupId) -> Vec<PartitionId> {
        self.partitions
            .iter()
            .filter(|(_, g)| **g == group)
            .map(|(p, _)| *p)
            .collect()
    }

    // -- replicas -----------------------------------------------------------

    /// Add a replication node to a shard on a storage node.
    pub fn add_rep_node(
        &mut self,
        group: RepGroupId,
        sn: StorageNodeId,
        storage_dir: Option<String>,
    ) -> Result<RepNodeId> {
        self.storage_node(sn)?;
        let rg = self
            .rep_groups
            .get_mut(&group)
            .ok_or(TopologyError::UnknownShard(group))?;
        rg.last_rn += 1;
        let id = RepNodeId::new(group, rg.last_rn);
        self.rep_nodes.insert(
            id,
            RepNode {
                id,
                sn,
                storage_dir,
            },
        );
        debug!(rn = %id, %sn, "added replication node");
        Ok(id)
    }

    /// Remove a replication node.
    pub fn remove_rep_node(&mut self, id: RepNodeId) -> Result<RepNode> {
        self.rep_nodes
            .remove(&id)
            .ok_or(TopologyError::UnknownRepNode(id))
    }

    /// Look up a replication node.
    pub fn rep_node(&self, id: RepNodeId) -> Result<&RepNode> {
        self.rep_nodes
            .get(&id)
            .ok_or(TopologyError::UnknownRepNode(id))
    }

    /// Look up a replication node for modification.
    pub fn rep_node_mut(&mut self, id: RepNodeId) -> Result<&mut RepNode> {
        self.rep_nodes
            .get_mut(&id)
            .ok_or(TopologyError::UnknownRepNode(id))
    }

    /// Add an arbiter to a shard on a storage node.
    pub fn add_arb_node(&mut self, group: RepGroupId, sn: StorageNodeId) -> Result<ArbNodeId> {
        self.storage_node(sn)?;
        let rg = self
            .rep_groups
            .get_mut(&group)
            .ok_or(TopologyError::UnknownShard(group))?;
        rg.last_an += 1;
        let id = ArbNodeId::new(group, rg.last_an);
        self.arb_nodes.insert(id, ArbNode { id, sn });
        debug!(an = %id, %sn, "added arbiter");
        Ok(id)
    }

    /// Remove an arbiter.
    pub fn remove_arb_node(&mut self, id: ArbNodeId) -> Result<ArbNode> {
        self.arb_nodes
            .remove(&id)
            .ok_or(TopologyError::UnknownArbNode(id))
    }

    /// Look up an arbiter for modification.
    pub fn arb_node_mut(&mut self, id: ArbNodeId) -> Result<&mut ArbNode> {
        self.arb_nodes
            .get_mut(&id)
            .ok_or(TopologyError::UnknownArbNode(id))
    }

    // -- admins -------------------------------------------------------------

    /// Add an admin on a storage node.
    pub fn add_admin(&mut self, sn: StorageNodeId) -> Result<AdminId> {
        self.storage_node(sn)?;
        let id = AdminId::new(self.next_admin);
        self.next_admin += 1;
        self.admins.insert(id, Admin { id, sn });
        debug!(admin = %id, %sn, "added admin");
        Ok(id)
    }

    /// Remove an admin.
    pub fn remove_admin(&mut self, id: AdminId) -> Result<Admin> {
        self.admins
            .remove(&id)
            .ok_or(TopologyError::UnknownAdmin(id))
    }

    /// Look up an admin.
    pub fn admin(&self, id: AdminId) -> Result<&Admin> {
        self.admins.get(&id).ok_or(TopologyError::UnknownAdmin(id))
    }

    // -- partitions ---------------------------------------------------------

    /// Number of partitions.
    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    /// Move a partition to a different shard.
    pub fn assign_partition(&mut self, partition: PartitionId, group: RepGroupId) -> Result<()> {
        self.rep_group(group)?;
        let owner = self
            .partitions
            .get_mut(&partition)
            .ok_or(TopologyError::UnknownPartition(partition))?;
        *owner = group;
        Ok(())
    }

    /// Create `count` partitions numbered `1..=count`, all initially owned by
    /// `group`. Only valid on a topology without partitions.
    pub fn create_partitions(&mut self, count: u32, group: RepGroupId) -> Result<()> {
        self.rep_group(group)?;
        for n in 1..=count {
            self.partitions.insert(PartitionId::new(n), group);
        }
        Ok(())
    }
}
