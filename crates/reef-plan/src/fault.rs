//! Fault injection threaded through the executor.

use std::collections::BTreeSet;
use std::sync::Mutex;

use reef_types::{PlanId, Task};

/// Consulted before every task attempt. Returning a message fails the task
/// fatally with [`reef_types::FailureKind::Injected`].
pub trait FaultHook: Send + Sync {
    /// Decide whether to fail `task` of `plan`.
    fn before_task(&self, plan: PlanId, task: &Task) -> Option<String>;
}

/// The production hook: never injects anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFaults;

impl FaultHook for NoFaults {
    fn before_task(&self, _plan: PlanId, _task: &Task) -> Option<String> {
        None
    }
}

/// Fails chosen tasks once each, then disarms.
#[derive(Debug, Default)]
pub struct OneShotFaults {
    armed: Mutex<BTreeSet<(PlanId, u32)>>,
}

impl OneShotFaults {
    /// Create a hook with nothing armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail task `index` of `plan` the next time it is attempted.
    pub fn arm(&self, plan: PlanId, index: u32) {
        self.armed
            .lock()
            .expect("fault lock poisoned")
            .insert((plan, index));
    }

    /// Number of faults not yet fired.
    pub fn pending(&self) -> usize {
        self.armed.lock().expect("fault lock poisoned").len()
    }
}

impl FaultHook for OneShotFaults {
    fn before_task(&self, plan: PlanId, task: &Task) -> Option<String> {
        let fired = self
            .armed
            .lock()
            .expect("fault lock poisoned")
            .remove(&(plan, task.index));
        fired.then(|| format!("injected fault before task {}", task.index))
    }
}
