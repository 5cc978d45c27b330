//! Topology candidates and storage node pools.
//!
//! Candidates are named, stored drafts of a topology. Every planner
//! operation loads a candidate, applies the change to it and stores the
//! result; a failed operation leaves the stored candidate unchanged.

use reef_planner::{Pool, PlannerError, TopologyDiff};
use reef_topology::{DEFAULT_POOL, StorageNodePool, Topology, TopologyCandidate};
use reef_types::{PartitionId, RepGroupId, RepNodeId, StorageNodeId, ZoneId, ZoneType};
use tracing::info;

use crate::admin::Admin;
use crate::error::{AdminError, Result};

impl Admin {
    // ------------------------------------------------------------------
    // Candidates
    // ------------------------------------------------------------------

    /// Create a candidate from the live topology and lay out shards and
    /// `partitions` partitions over the pool.
    pub fn create_topology(
        &self,
        name: &str,
        pool: &str,
        partitions: u32,
    ) -> Result<TopologyCandidate> {
        let _guard = self.catalog.lock().expect("catalog lock poisoned");
        self.ensure_new_candidate(name)?;
        let mut cand = TopologyCandidate::new(name, self.state.topology());
        let members = self.resolve_pool(pool, &cand.topology)?;
        reef_planner::create(&mut cand, &members, partitions)?;
        self.meta.put_candidate(&cand)?;
        info!(candidate = name, shards = cand.topology.rep_groups.len(), "topology created");
        Ok(cand)
    }

    /// Store a copy of the live topology as a candidate.
    pub fn copy_current_topology(&self, name: &str) -> Result<TopologyCandidate> {
        let _guard = self.catalog.lock().expect("catalog lock poisoned");
        self.ensure_new_candidate(name)?;
        let mut cand = TopologyCandidate::new(name, self.state.topology());
        cand.note(format!(
            "copied live topology at sequence {}",
            cand.topology.sequence
        ));
        self.meta.put_candidate(&cand)?;
        Ok(cand)
    }

    /// Fill missing replicas and fix placement without adding shards.
    pub fn rebalance_topology(
        &self,
        name: &str,
        pool: &str,
        zone: Option<ZoneId>,
    ) -> Result<TopologyCandidate> {
        self.edit_candidate(name, pool, |cand, members| {
            reef_planner::rebalance(cand, members, zone)
        })
    }

    /// Rebalance, add shards while capacity allows and spread partitions.
    pub fn redistribute_topology(&self, name: &str, pool: &str) -> Result<TopologyCandidate> {
        self.edit_candidate(name, pool, reef_planner::redistribute)
    }

    /// Empty and drop storage nodes outside the pool.
    pub fn contract_topology(&self, name: &str, pool: &str) -> Result<TopologyCandidate> {
        self.edit_candidate(name, pool, reef_planner::contract)
    }

    /// Change a zone's replication factor.
    pub fn change_repfactor(
        &self,
        name: &str,
        pool: &str,
        zone: ZoneId,
        repfactor: u32,
    ) -> Result<TopologyCandidate> {
        self.edit_candidate(name, pool, |cand, members| {
            reef_planner::change_repfactor(cand, members, zone, repfactor)
        })
    }

    /// Convert a zone between primary and secondary.
    pub fn change_zone_type(
        &self,
        name: &str,
        pool: &str,
        zone: ZoneId,
        zone_type: ZoneType,
    ) -> Result<TopologyCandidate> {
        self.edit_candidate(name, pool, |cand, members| {
            reef_planner::change_zone_type(cand, members, zone, zone_type)
        })
    }

    /// Reassign one partition to another shard.
    pub fn move_partition(
        &self,
        name: &str,
        partition: PartitionId,
        shard: RepGroupId,
    ) -> Result<TopologyCandidate> {
        self.edit_candidate(name, DEFAULT_POOL, |cand, _| {
            reef_planner::move_partition(cand, partition, shard)
        })
    }

    /// Move a replication node to `target`, or to the least-loaded pool
    /// node in its zone.
    pub fn move_rn(
        &self,
        name: &str,
        pool: &str,
        rn: RepNodeId,
        target: Option<StorageNodeId>,
    ) -> Result<TopologyCandidate> {
        self.edit_candidate(name, pool, |cand, members| {
            reef_planner::move_rep_node(cand, members, rn, target)
        })
    }

    /// Look up a candidate.
    pub fn get_topology_candidate(&self, name: &str) -> Result<TopologyCandidate> {
        self.meta
            .get_candidate(name)?
            .ok_or_else(|| AdminError::CandidateNotFound(name.to_string()))
    }

    /// Names of all candidates, sorted.
    pub fn list_topologies(&self) -> Result<Vec<String>> {
        Ok(self.meta.list_candidates()?)
    }

    /// Delete a candidate.
    pub fn delete_topology_candidate(&self, name: &str) -> Result<()> {
        let _guard = self.catalog.lock().expect("catalog lock poisoned");
        if self.meta.get_candidate(name)?.is_none() {
            return Err(AdminError::CandidateNotFound(name.to_string()));
        }
        self.meta.delete_candidate(name)?;
        Ok(())
    }

    /// What deploying a candidate would change.
    pub fn preview_topology(&self, name: &str) -> Result<TopologyDiff> {
        let cand = self.get_topology_candidate(name)?;
        Ok(TopologyDiff::between(&self.state.topology(), &cand.topology))
    }

    // ------------------------------------------------------------------
    // Pools
    // ------------------------------------------------------------------

    /// Create an empty pool.
    pub fn create_pool(&self, name: &str) -> Result<()> {
        let _guard = self.catalog.lock().expect("catalog lock poisoned");
        if name == DEFAULT_POOL || self.meta.get_pool(name)?.is_some() {
            return Err(AdminError::PoolExists(name.to_string()));
        }
        if name.trim().is_empty() {
            return Err(AdminError::InvalidRequest("pool name is empty".into()));
        }
        self.meta.put_pool(&StorageNodePool::new(name))?;
        Ok(())
    }

    /// Add a registered storage node to a pool.
    pub fn add_to_pool(&self, name: &str, sn: StorageNodeId) -> Result<()> {
        self.state.topology().storage_node(sn)?;
        self.update_pool(name, |pool| {
            pool.add(sn);
        })
    }

    /// Remove a storage node from a pool.
    pub fn remove_from_pool(&self, name: &str, sn: StorageNodeId) -> Result<()> {
        self.update_pool(name, |pool| {
            pool.remove(sn);
        })
    }

    /// Delete a pool. The default pool cannot be deleted.
    pub fn delete_pool(&self, name: &str) -> Result<()> {
        let _guard = self.catalog.lock().expect("catalog lock poisoned");
        if name == DEFAULT_POOL {
            return Err(AdminError::InvalidRequest(format!(
                "{DEFAULT_POOL} cannot be deleted"
            )));
        }
        if self.meta.get_pool(name)?.is_none() {
            return Err(AdminError::PoolNotFound(name.to_string()));
        }
        self.meta.delete_pool(name)?;
        Ok(())
    }

    /// A pool's members. The default pool holds every storage node of the
    /// live topology.
    pub fn get_pool(&self, name: &str) -> Result<StorageNodePool> {
        let topo = self.state.topology();
        let mut pool = StorageNodePool::new(name);
        pool.members = self.resolve_pool(name, &topo)?;
        Ok(pool)
    }

    /// Names of all pools, the default pool first.
    pub fn list_pools(&self) -> Result<Vec<String>> {
        let mut names = vec![DEFAULT_POOL.to_string()];
        names.extend(self.meta.list_pools()?.into_iter().map(|p| p.name));
        Ok(names)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn ensure_new_candidate(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(AdminError::InvalidRequest("candidate name is empty".into()));
        }
        if self.meta.get_candidate(name)?.is_some() {
            return Err(AdminError::CandidateExists(name.to_string()));
        }
        Ok(())
    }

    fn edit_candidate(
        &self,
        name: &str,
        pool: &str,
        op: impl FnOnce(&mut TopologyCandidate, &Pool) -> std::result::Result<(), PlannerError>,
    ) -> Result<TopologyCandidate> {
        let _guard = self.catalog.lock().expect("catalog lock poisoned");
        let mut cand = self
            .meta
            .get_candidate(name)?
            .ok_or_else(|| AdminError::CandidateNotFound(name.to_string()))?;
        let members = self.resolve_pool(pool, &cand.topology)?;
        op(&mut cand, &members)?;
        self.meta.put_candidate(&cand)?;
        Ok(cand)
    }

    fn update_pool(&self, name: &str, f: impl FnOnce(&mut StorageNodePool)) -> Result<()> {
        let _guard = self.catalog.lock().expect("catalog lock poisoned");
        if name == DEFAULT_POOL {
            return Err(AdminError::InvalidRequest(format!(
                "{DEFAULT_POOL} always holds every storage node"
            )));
        }
        let mut pool = self
            .meta
            .get_pool(name)?
            .ok_or_else(|| AdminError::PoolNotFound(name.to_string()))?;
        f(&mut pool);
        self.meta.put_pool(&pool)?;
        Ok(())
    }

    /// Pool members that exist in `topo`.
    fn resolve_pool(&self, name: &str, topo: &Topology) -> Result<Pool> {
        if name == DEFAULT_POOL {
            return Ok(topo.storage_nodes.keys().copied().collect());
        }
        let pool = self
            .meta
            .get_pool(name)?
            .ok_or_else(|| AdminError::PoolNotFound(name.to_string()))?;
        Ok(pool
            .members
            .into_iter()
            .filter(|sn| topo.storage_nodes.contains_key(sn))
            .collect())
    }
}
