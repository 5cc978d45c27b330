//! Resource lock manager: the single serialization point for execution.

use std::collections::BTreeMap;
use std::sync::Mutex;

use reef_types::{LockSet, PlanId};
use tracing::debug;

/// Tracks the lock sets of every running plan.
#[derive(Debug, Default)]
pub struct LockManager {
    held: Mutex<BTreeMap<PlanId, LockSet>>,
}

impl LockManager {
    /// Create an empty lock manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `locks` to `plan` unless they overlap another holder's.
    ///
    /// On conflict returns the lowest-numbered blocking plan. Re-acquiring
    /// for a plan that already holds locks replaces its set.
    pub fn try_acquire(&self, plan: PlanId, locks: &LockSet) -> Result<(), PlanId> {
        let mut held = self.held.lock().expect("lock manager poisoned");
        if let Some((blocking, _)) = held
            .iter()
            .find(|(id, other)| **id != plan && locks.conflicts_with(other))
        {
            debug!(%plan, %blocking, "lock conflict");
            return Err(*blocking);
        }
        held.insert(plan, locks.clone());
        debug!(%plan, "locks granted");
        Ok(())
    }

    /// Release everything `plan` holds.
    pub fn release(&self, plan: PlanId) -> bool {
        let released = self
            .held
            .lock()
            .expect("lock manager poisoned")
            .remove(&plan)
            .is_some();
        if released {
            debug!(%plan, "locks released");
        }
        released
    }

    /// Plans currently holding locks.
    pub fn holders(&self) -> Vec<PlanId> {
        self.held
            .lock()
            .expect("lock manager poisoned")
            .keys()
            .copied()
            .collect()
    }
}
