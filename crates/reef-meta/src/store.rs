//! [`MetaStore`] implementation wrapping Fjall keyspaces.

use std::path::Path;
use std::sync::Mutex;

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use reef_params::Parameters;
use reef_topology::{StorageNodePool, Topology, TopologyCandidate};
use reef_types::{Plan, PlanId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::MetaError;

type Result<T> = std::result::Result<T, MetaError>;

const KEY_TOPOLOGY: &[u8] = b"topology";
const KEY_PARAMETERS: &[u8] = b"parameters";
const KEY_NEXT_PLAN_ID: &[u8] = b"next_plan_id";

/// Admin metadata store backed by Fjall.
pub struct MetaStore {
    /// The underlying Fjall database handle.
    #[allow(dead_code)]
    db: Database,
    /// PlanId → Plan.
    plans: Keyspace,
    /// PlanId → target Topology.
    plan_targets: Keyspace,
    /// name → TopologyCandidate.
    candidates: Keyspace,
    /// name → StorageNodePool.
    pools: Keyspace,
    /// Singleton records.
    state: Keyspace,
    /// Serializes read-increment-write of the plan id counter.
    id_lock: Mutex<()>,
    /// Keeps a temporary directory alive for the store's lifetime.
    _tmp: Option<tempfile::TempDir>,
}

impl MetaStore {
    /// Open a persistent MetaStore at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open()?;
        Self::init_keyspaces(db, None)
    }

    /// Open a temporary MetaStore that is cleaned up on drop.
    ///
    /// Useful for tests.
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir().map_err(std::io::Error::other)?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        Self::init_keyspaces(db, Some(tmp))
    }

    fn init_keyspaces(db: Database, tmp: Option<tempfile::TempDir>) -> Result<Self> {
        let plans = db.keyspace("plans", KeyspaceCreateOptions::default)?;
        let plan_targets = db.keyspace("plan_targets", KeyspaceCreateOptions::default)?;
        let candidates = db.keyspace("candidates", KeyspaceCreateOptions::default)?;
        let pools = db.keyspace("pools", KeyspaceCreateOptions::default)?;
        let state = db.keyspace("state", KeyspaceCreateOptions::default)?;
        Ok(Self {
            db,
            plans,
            plan_targets,
            candidates,
            pools,
            state,
            id_lock: Mutex::new(()),
            _tmp: tmp,
        })
    }

    // ----- Plans -----

    /// Allocate the next plan id. Ids start at 1 and are never reused, even
    /// after the plan record is pruned.
    pub fn next_plan_id(&self) -> Result<PlanId> {
        let _guard = self.id_lock.lock().expect("plan id lock poisoned");
        let next = match self.state.get(KEY_NEXT_PLAN_ID)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes[..].try_into().map_err(|_| MetaError::Corrupt {
                    keyspace: "state",
                    detail: format!("plan id counter has {} bytes", bytes.len()),
                })?;
                u64::from_be_bytes(arr)
            }
            None => 1,
        };
        self.state
            .insert(KEY_NEXT_PLAN_ID, (next + 1).to_be_bytes().as_slice())?;
        Ok(PlanId::new(next))
    }

    /// Store or replace a plan record.
    pub fn put_plan(&self, plan: &Plan) -> Result<()> {
        let value = postcard::to_allocvec(plan)?;
        self.plans.insert(plan.id.to_key(), value.as_slice())?;
        debug!(plan_id = %plan.id, state = %plan.state, "stored plan");
        Ok(())
    }

    /// Retrieve a plan by id.
    pub fn get_plan(&self, id: PlanId) -> Result<Option<Plan>> {
        self.get_value(&self.plans, &id.to_key())
    }

    /// All plans in id order.
    pub fn list_plans(&self) -> Result<Vec<Plan>> {
        let mut plans = Vec::new();
        for guard in self.plans.iter() {
            let v = guard.value()?;
            plans.push(postcard::from_bytes(&v)?);
        }
        Ok(plans)
    }

    /// Plans with `start <= id <= end`, in id order.
    pub fn plan_range(&self, start: PlanId, end: PlanId) -> Result<Vec<Plan>> {
        Ok(self
            .list_plans()?
            .into_iter()
            .filter(|p| p.id >= start && p.id <= end)
            .collect())
    }

    /// Ids of all stored plans, in order.
    pub fn plan_ids(&self) -> Result<Vec<PlanId>> {
        let mut ids = Vec::new();
        for guard in self.plans.iter() {
            let k = guard.key()?;
            let id = PlanId::from_key(&k).ok_or_else(|| MetaError::Corrupt {
                keyspace: "plans",
                detail: format!("key of {} bytes", k.len()),
            })?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Delete a plan and its target topology.
    pub fn delete_plan(&self, id: PlanId) -> Result<()> {
        self.plans.remove(id.to_key())?;
        self.plan_targets.remove(id.to_key())?;
        debug!(plan_id = %id, "deleted plan");
        Ok(())
    }

    /// Store the topology a deploy plan will make live.
    pub fn put_plan_target(&self, id: PlanId, topology: &Topology) -> Result<()> {
        let value = postcard::to_allocvec(topology)?;
        self.plan_targets.insert(id.to_key(), value.as_slice())?;
        Ok(())
    }

    /// Retrieve a deploy plan's target topology.
    pub fn get_plan_target(&self, id: PlanId) -> Result<Option<Topology>> {
        self.get_value(&self.plan_targets, &id.to_key())
    }

    // ----- Candidates -----

    /// Store or replace a topology candidate.
    pub fn put_candidate(&self, candidate: &TopologyCandidate) -> Result<()> {
        let value = postcard::to_allocvec(candidate)?;
        self.candidates
            .insert(candidate.name.as_bytes(), value.as_slice())?;
        debug!(candidate = %candidate.name, "stored topology candidate");
        Ok(())
    }

    /// Retrieve a candidate by name.
    pub fn get_candidate(&self, name: &str) -> Result<Option<TopologyCandidate>> {
        self.get_value(&self.candidates, name.as_bytes())
    }

    /// Delete a candidate.
    pub fn delete_candidate(&self, name: &str) -> Result<()> {
        self.candidates.remove(name.as_bytes())?;
        debug!(candidate = name, "deleted topology candidate");
        Ok(())
    }

    /// Names of all candidates, sorted.
    pub fn list_candidates(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for guard in self.candidates.iter() {
            let k = guard.key()?;
            names.push(String::from_utf8_lossy(&k).into_owned());
        }
        Ok(names)
    }

    // ----- Storage node pools -----

    /// Store or replace a pool.
    pub fn put_pool(&self, pool: &StorageNodePool) -> Result<()> {
        let value = postcard::to_allocvec(pool)?;
        self.pools.insert(pool.name.as_bytes(), value.as_slice())?;
        Ok(())
    }

    /// Retrieve a pool by name.
    pub fn get_pool(&self, name: &str) -> Result<Option<StorageNodePool>> {
        self.get_value(&self.pools, name.as_bytes())
    }

    /// All pools, sorted by name.
    pub fn list_pools(&self) -> Result<Vec<StorageNodePool>> {
        let mut pools = Vec::new();
        for guard in self.pools.iter() {
            let v = guard.value()?;
            pools.push(postcard::from_bytes(&v)?);
        }
        Ok(pools)
    }

    /// Delete a pool.
    pub fn delete_pool(&self, name: &str) -> Result<()> {
        self.pools.remove(name.as_bytes())?;
        Ok(())
    }

    // ----- Singletons -----

    /// Store the live topology.
    pub fn put_topology(&self, topology: &Topology) -> Result<()> {
        let value = postcard::to_allocvec(topology)?;
        self.state.insert(KEY_TOPOLOGY, value.as_slice())?;
        debug!(sequence = topology.sequence, "stored live topology");
        Ok(())
    }

    /// Retrieve the live topology.
    pub fn get_topology(&self) -> Result<Option<Topology>> {
        self.get_value(&self.state, KEY_TOPOLOGY)
    }

    /// Store the parameter set.
    pub fn put_parameters(&self, params: &Parameters) -> Result<()> {
        self.put_value(&self.state, KEY_PARAMETERS, params)
    }

    /// Retrieve the parameter set.
    pub fn get_parameters(&self) -> Result<Option<Parameters>> {
        self.get_value(&self.state, KEY_PARAMETERS)
    }

    // ----- helpers -----

    fn put_value<T: Serialize>(&self, ks: &Keyspace, key: &[u8], value: &T) -> Result<()> {
        let bytes = postcard::to_allocvec(value)?;
        ks.insert(key, bytes.as_slice())?;
        Ok(())
    }

    fn get_value<T: DeserializeOwned>(&self, ks: &Keyspace, key: &[u8]) -> Result<Option<T>> {
        match ks.get(key)? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}
