//! Plan control: create, approve, execute, await, cancel, interrupt.
//!
//! Each plan has an in-memory [`PlanEntry`] holding the authoritative copy
//! of its record. Every change is applied to a clone, persisted, and only
//! then swapped in, so a failed write leaves the plan untouched. Control
//! operations on one plan are serialized by the entry's operation lock;
//! conflicts between plans are decided by the [`LockManager`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use reef_meta::MetaStore;
use reef_types::events::{EventBus, PlanStateChanged};
use reef_types::{
    FailureKind, FailureRecord, LockSet, Plan, PlanId, PlanKind, PlanState, Task, TaskKind,
    TaskState, now_millis,
};
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::error::PlanError;
use crate::executor::{Executor, RunOutcome};
use crate::lock::LockManager;

type Result<T> = std::result::Result<T, PlanError>;

/// Everything needed to create a plan.
#[derive(Debug, Clone)]
pub struct PlanDraft {
    /// Operator-chosen name.
    pub name: String,
    /// What the plan does.
    pub kind: PlanKind,
    /// Creating user; `None` for system plans.
    pub owner: Option<String>,
    /// Ordered work list.
    pub tasks: Vec<Task>,
    /// Components the plan mutates.
    pub locks: LockSet,
    /// Topology sequence the plan was computed against.
    pub base_topology_seq: Option<u64>,
}

impl PlanDraft {
    /// A system-owned draft.
    pub fn new(name: impl Into<String>, kind: PlanKind, tasks: Vec<Task>, locks: LockSet) -> Self {
        Self {
            name: name.into(),
            kind,
            owner: None,
            tasks,
            locks,
            base_topology_seq: None,
        }
    }

    /// Set the owning user.
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Pin the plan to a topology sequence.
    pub fn base_topology_seq(mut self, seq: u64) -> Self {
        self.base_topology_seq = Some(seq);
        self
    }
}

/// In-memory handle for one plan.
pub(crate) struct PlanEntry {
    pub(crate) id: PlanId,
    plan: Mutex<Plan>,
    /// Serializes cancel, execute and interrupt on this plan.
    op_lock: tokio::sync::Mutex<()>,
    /// Checked by the executor between tasks.
    pub(crate) interrupt: AtomicBool,
    state_tx: watch::Sender<PlanState>,
}

impl PlanEntry {
    fn new(plan: Plan) -> Arc<Self> {
        let (state_tx, _) = watch::channel(plan.state);
        Arc::new(Self {
            id: plan.id,
            plan: Mutex::new(plan),
            op_lock: tokio::sync::Mutex::new(()),
            interrupt: AtomicBool::new(false),
            state_tx,
        })
    }

    pub(crate) fn snapshot(&self) -> Plan {
        self.plan.lock().expect("plan lock poisoned").clone()
    }

    fn state(&self) -> PlanState {
        self.plan.lock().expect("plan lock poisoned").state
    }

    /// Apply `f` to a copy of the plan, persist it, then make it current.
    pub(crate) fn modify<R>(
        &self,
        meta: &MetaStore,
        f: impl FnOnce(&mut Plan) -> Result<R>,
    ) -> Result<R> {
        let mut current = self.plan.lock().expect("plan lock poisoned");
        let mut next = current.clone();
        let out = f(&mut next)?;
        meta.put_plan(&next)?;
        *current = next;
        Ok(out)
    }

    fn publish(&self, bus: &EventBus, from: PlanState, to: PlanState) {
        self.state_tx.send_replace(to);
        bus.emit(PlanStateChanged {
            plan_id: self.id,
            from,
            to,
        });
        info!(plan_id = %self.id, %from, %to, "plan state changed");
    }
}

/// Owns plan lifecycles: the state machine, locking and workers.
pub struct PlanManager {
    meta: Arc<MetaStore>,
    executor: Arc<Executor>,
    locks: LockManager,
    entries: Mutex<HashMap<PlanId, Arc<PlanEntry>>>,
    event_bus: EventBus,
}

impl PlanManager {
    /// Create a manager. Call [`PlanManager::recover`] before executing
    /// anything after a restart.
    pub fn new(meta: Arc<MetaStore>, executor: Executor) -> Arc<Self> {
        let event_bus = executor.event_bus().clone();
        Arc::new(Self {
            meta,
            executor: Arc::new(executor),
            locks: LockManager::new(),
            entries: Mutex::new(HashMap::new()),
            event_bus,
        })
    }

    /// The bus plan, task and topology events are emitted on.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// The backing store.
    pub fn meta(&self) -> &Arc<MetaStore> {
        &self.meta
    }

    /// Sequence number of the live topology.
    pub fn current_sequence(&self) -> u64 {
        self.executor.current_sequence()
    }

    /// Plans currently holding execution locks.
    pub fn running(&self) -> Vec<PlanId> {
        self.locks.holders()
    }

    // ----- lifecycle -----

    /// Create a pending plan and return its id.
    pub fn create(&self, draft: PlanDraft) -> Result<PlanId> {
        if draft.name.trim().is_empty() {
            return Err(PlanError::InvalidRequest("plan name is empty".into()));
        }
        let id = self.meta.next_plan_id()?;
        let mut plan = Plan::new(
            id,
            draft.name,
            draft.kind,
            draft.owner,
            draft.tasks,
            draft.locks,
        );
        plan.base_topology_seq = draft.base_topology_seq;
        self.meta.put_plan(&plan)?;
        info!(
            plan_id = %id,
            name = %plan.name,
            kind = %plan.kind,
            tasks = plan.tasks.len(),
            "plan created"
        );
        self.entries
            .lock()
            .expect("plan table poisoned")
            .insert(id, PlanEntry::new(plan));
        Ok(id)
    }

    /// PENDING -> APPROVED.
    pub async fn approve(&self, id: PlanId) -> Result<()> {
        let entry = self.entry(id)?;
        let _op = entry.op_lock.lock().await;
        self.transition(&entry, "approve", PlanState::Approved, |plan| {
            plan.approved_at = Some(now_millis());
        })?;
        Ok(())
    }

    /// Start executing an approved, interrupted or failed plan.
    ///
    /// Returns once the plan is RUNNING; a worker carries it to completion.
    /// Fails with a conflict if a running plan holds overlapping locks, and
    /// with a stale-topology error if the live topology moved since the
    /// plan was computed.
    pub async fn execute(self: &Arc<Self>, id: PlanId) -> Result<()> {
        let entry = self.entry(id)?;
        let _op = entry.op_lock.lock().await;

        let plan = entry.snapshot();
        if !plan.state.is_executable() {
            return Err(PlanError::InvalidState {
                plan: id,
                op: "execute",
                state: plan.state,
            });
        }

        if let Err(blocking) = self.locks.try_acquire(id, &plan.locks) {
            warn!(plan_id = %id, %blocking, "execution blocked by running plan");
            return Err(PlanError::Conflict { plan: id, blocking });
        }

        if let Some(expected) = plan.base_topology_seq {
            let current = self.executor.current_sequence();
            // Once the plan's own commit has run, the sequence moved because of it.
            let committed = plan.tasks.iter().any(|t| {
                matches!(t.kind, TaskKind::CommitTopology) && t.state == TaskState::Succeeded
            });
            if current != expected && !committed {
                self.locks.release(id);
                return Err(PlanError::StaleTopology {
                    plan: id,
                    expected,
                    current,
                });
            }
        }

        entry.interrupt.store(false, Ordering::SeqCst);
        let started = self.transition(&entry, "execute", PlanState::Running, |plan| {
            plan.executed_at = Some(now_millis());
            plan.ended_at = None;
            plan.attempts += 1;
            plan.failure = None;
            for task in &mut plan.tasks {
                if task.state != TaskState::Succeeded {
                    task.state = TaskState::Pending;
                }
            }
        });
        if let Err(e) = started {
            self.locks.release(id);
            return Err(e);
        }

        let manager = Arc::clone(self);
        let worker = Arc::clone(&entry);
        tokio::spawn(async move { manager.run(worker).await });
        Ok(())
    }

    async fn run(self: Arc<Self>, entry: Arc<PlanEntry>) {
        let id = entry.id;
        let outcome = self.executor.drive(&self.meta, &entry).await;
        let (next, failure) = match outcome {
            RunOutcome::Completed => (PlanState::Succeeded, None),
            RunOutcome::Interrupted => (PlanState::Interrupted, None),
            RunOutcome::Failed(record) => (PlanState::Error, Some(record)),
        };
        if let Some(record) = &failure {
            warn!(plan_id = %id, failure = %record, "plan failed");
        }

        // Recording the outcome, releasing locks and publishing form one step
        // with respect to execute, cancel and interrupt on this plan.
        let _op = entry.op_lock.lock().await;
        let recorded = entry.modify(&self.meta, |plan| {
            let from = plan
                .transition(next)
                .map_err(|e| PlanError::InvalidRequest(e.to_string()))?;
            plan.ended_at = Some(now_millis());
            plan.failure = failure;
            Ok(from)
        });
        self.locks.release(id);
        match recorded {
            Ok(from) => entry.publish(&self.event_bus, from, next),
            Err(e) => error!(plan_id = %id, error = %e, "failed to record plan outcome"),
        }
    }

    /// Wait until the plan settles or `timeout` passes, then return its
    /// state.
    pub async fn await_plan(&self, id: PlanId, timeout: Duration) -> Result<PlanState> {
        let entry = self.entry(id)?;
        let mut rx = entry.state_tx.subscribe();
        let settled = tokio::time::timeout(timeout, rx.wait_for(|s| s.is_settled())).await;
        match settled {
            Ok(Ok(state)) => Ok(*state),
            _ => Ok(entry.state()),
        }
    }

    /// Cancel a pending, interrupted or failed plan. Completed tasks are
    /// not rolled back.
    pub async fn cancel(&self, id: PlanId) -> Result<()> {
        let entry = self.entry(id)?;
        let _op = entry.op_lock.lock().await;
        self.transition(&entry, "cancel", PlanState::Canceled, |plan| {
            plan.ended_at = Some(now_millis());
        })?;
        Ok(())
    }

    /// Ask a running plan to stop at the next task boundary.
    pub async fn interrupt(&self, id: PlanId) -> Result<PlanState> {
        let entry = self.entry(id)?;
        let _op = entry.op_lock.lock().await;
        let state = entry.state();
        if state != PlanState::Running {
            return Err(PlanError::InvalidState {
                plan: id,
                op: "interrupt",
                state,
            });
        }
        self.transition(&entry, "interrupt", PlanState::InterruptRequested, |_| {})?;
        entry.interrupt.store(true, Ordering::SeqCst);
        Ok(PlanState::InterruptRequested)
    }

    // ----- queries -----

    /// Fetch a plan.
    pub fn get(&self, id: PlanId) -> Result<Plan> {
        Ok(self.entry(id)?.snapshot())
    }

    /// Plans with ids in `start..=end`.
    pub fn range(&self, start: PlanId, end: PlanId) -> Result<Vec<Plan>> {
        let ids: Vec<PlanId> = self
            .meta
            .plan_ids()?
            .into_iter()
            .filter(|id| *id >= start && *id <= end)
            .collect();
        ids.into_iter().map(|id| self.get(id)).collect()
    }

    /// Ids of all stored plans.
    pub fn ids(&self) -> Result<Vec<PlanId>> {
        Ok(self.meta.plan_ids()?)
    }

    // ----- failover and retention -----

    /// Settle plans a previous admin left running.
    ///
    /// Each RUNNING or INTERRUPT_REQUESTED plan becomes INTERRUPTED with an
    /// admin-failover failure record; its in-flight tasks go back to
    /// pending. Nothing is resumed automatically. Call once at startup,
    /// before any plan is executed.
    pub fn recover(&self) -> Result<Vec<PlanId>> {
        let mut recovered = Vec::new();
        for mut plan in self.meta.list_plans()? {
            if !plan.state.is_active() {
                continue;
            }
            let from = plan.state;
            plan.transition(PlanState::Interrupted)
                .map_err(|e| PlanError::InvalidRequest(e.to_string()))?;
            let in_flight = plan
                .tasks
                .iter()
                .find(|t| t.state == TaskState::Running)
                .cloned();
            for task in &mut plan.tasks {
                if task.state == TaskState::Running {
                    task.state = TaskState::Pending;
                }
            }
            plan.failure = Some(FailureRecord::message(
                FailureKind::AdminFailover,
                in_flight.as_ref(),
                format!("admin restarted while the plan was {from}; re-execute to resume"),
            ));
            plan.ended_at = Some(now_millis());
            self.meta.put_plan(&plan)?;
            self.locks.release(plan.id);
            warn!(plan_id = %plan.id, %from, "plan interrupted by admin failover");
            self.event_bus.emit(PlanStateChanged {
                plan_id: plan.id,
                from,
                to: PlanState::Interrupted,
            });
            self.entries
                .lock()
                .expect("plan table poisoned")
                .insert(plan.id, PlanEntry::new(plan.clone()));
            recovered.push(plan.id);
        }
        Ok(recovered)
    }

    /// Delete the oldest SUCCEEDED and CANCELED plans so that at most
    /// `max_terminal` remain. Returns the deleted ids.
    pub fn prune(&self, max_terminal: usize) -> Result<Vec<PlanId>> {
        let terminal: Vec<PlanId> = self
            .meta
            .list_plans()?
            .into_iter()
            .filter(|p| p.state.is_final())
            .map(|p| p.id)
            .collect();
        let excess = terminal.len().saturating_sub(max_terminal);
        let doomed = terminal[..excess].to_vec();
        for id in &doomed {
            self.meta.delete_plan(*id)?;
            self.entries.lock().expect("plan table poisoned").remove(id);
        }
        if !doomed.is_empty() {
            info!(pruned = doomed.len(), kept = max_terminal, "pruned terminal plans");
        }
        Ok(doomed)
    }

    // ----- helpers -----

    fn entry(&self, id: PlanId) -> Result<Arc<PlanEntry>> {
        let mut entries = self.entries.lock().expect("plan table poisoned");
        if let Some(entry) = entries.get(&id) {
            return Ok(Arc::clone(entry));
        }
        let plan = self.meta.get_plan(id)?.ok_or(PlanError::NotFound(id))?;
        let entry = PlanEntry::new(plan);
        entries.insert(id, Arc::clone(&entry));
        Ok(entry)
    }

    fn transition(
        &self,
        entry: &PlanEntry,
        op: &'static str,
        next: PlanState,
        update: impl FnOnce(&mut Plan),
    ) -> Result<PlanState> {
        let from = entry.modify(&self.meta, |plan| {
            let from = plan.transition(next).map_err(|e| PlanError::InvalidState {
                plan: plan.id,
                op,
                state: e.from,
            })?;
            update(plan);
            Ok(from)
        })?;
        entry.publish(&self.event_bus, from, next);
        Ok(from)
    }
}
