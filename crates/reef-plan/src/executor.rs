//! Plan executor: runs a plan's tasks against the node collaborators.
//!
//! Tasks run in list order. A run of adjacent tasks sharing a `group`
//! value is dispatched together on a `JoinSet`, bounded by a semaphore.
//! Completed tasks are skipped, so re-executing an interrupted or failed
//! plan resumes from the first incomplete task. The interrupt flag is
//! checked between batches; a task already running is allowed to finish.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use reef_meta::MetaStore;
use reef_types::events::{EventBus, ParametersChanged, TaskFinished, TopologyCommitted};
use reef_types::{
    FailureKind, FailureRecord, PlanId, ServiceId, StorageNodeId, Task, TaskKind, TaskState,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::fault::{FaultHook, NoFaults};
use crate::manager::PlanEntry;
use crate::node::{NodeControl, ParameterSink, ServiceStatus, TopologyCommitter};
use crate::retry::ExecutorConfig;

/// How a single execution of a plan ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    /// Every task succeeded.
    Completed,
    /// The interrupt flag was observed between tasks.
    Interrupted,
    /// A task failed; the plan goes to ERROR.
    Failed(FailureRecord),
}

/// Runs tasks against the collaborators chosen at composition time.
pub struct Executor {
    nodes: Arc<dyn NodeControl>,
    committer: Arc<dyn TopologyCommitter>,
    params: Arc<dyn ParameterSink>,
    faults: Arc<dyn FaultHook>,
    config: ExecutorConfig,
    concurrency: Arc<Semaphore>,
    event_bus: EventBus,
}

impl Executor {
    /// Create an executor with no fault injection.
    pub fn new(
        nodes: Arc<dyn NodeControl>,
        committer: Arc<dyn TopologyCommitter>,
        params: Arc<dyn ParameterSink>,
        config: ExecutorConfig,
    ) -> Self {
        let permits = config.max_parallel_tasks.max(1);
        Self {
            nodes,
            committer,
            params,
            faults: Arc::new(NoFaults),
            config,
            concurrency: Arc::new(Semaphore::new(permits)),
            event_bus: EventBus::new(),
        }
    }

    /// Install a fault hook consulted before every task.
    pub fn with_faults(mut self, faults: Arc<dyn FaultHook>) -> Self {
        self.faults = faults;
        self
    }

    /// Set a shared event bus.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = bus;
        self
    }

    /// The event bus task and topology events are emitted on.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Executor tuning.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Sequence number of the live topology.
    pub fn current_sequence(&self) -> u64 {
        self.committer.current_sequence()
    }

    /// Drive the plan in `entry` until it completes, fails or observes an
    /// interrupt. Task progress is persisted after every change; the plan
    /// state itself is left to the caller.
    pub(crate) async fn drive(self: &Arc<Self>, meta: &MetaStore, entry: &PlanEntry) -> RunOutcome {
        let plan_id = entry.id;
        loop {
            let batch = next_batch(&entry.snapshot().tasks);
            if batch.is_empty() {
                return RunOutcome::Completed;
            }
            if entry.interrupt.load(Ordering::SeqCst) {
                info!(plan_id = %plan_id, "interrupt observed between tasks");
                return RunOutcome::Interrupted;
            }

            let indexes: Vec<u32> = batch.iter().map(|t| t.index).collect();
            if let Err(e) = entry.modify(meta, |plan| {
                for i in &indexes {
                    if let Some(task) = plan.tasks.get_mut(*i as usize) {
                        task.state = TaskState::Running;
                        task.error = None;
                    }
                }
                Ok(())
            }) {
                return RunOutcome::Failed(FailureRecord::from_error(
                    FailureKind::Internal,
                    batch.first(),
                    &e,
                ));
            }

            let results = if batch.len() == 1 {
                let task = &batch[0];
                let (result, attempts) = self.run_task(plan_id, task).await;
                vec![(task.clone(), result, attempts)]
            } else {
                self.run_parallel(plan_id, batch).await
            };

            let mut failure = None;
            for (task, result, attempts) in results {
                let state = if result.is_ok() {
                    TaskState::Succeeded
                } else {
                    TaskState::Failed
                };
                let error = result.as_ref().err().map(|f| f.message.clone());
                if let Err(e) = entry.modify(meta, |plan| {
                    if let Some(t) = plan.tasks.get_mut(task.index as usize) {
                        t.state = state;
                        t.attempts += attempts;
                        t.error = error;
                    }
                    Ok(())
                }) {
                    return RunOutcome::Failed(FailureRecord::from_error(
                        FailureKind::Internal,
                        Some(&task),
                        &e,
                    ));
                }
                self.event_bus.emit(TaskFinished {
                    plan_id,
                    task: task.index,
                    state,
                });
                if let Err(record) = result {
                    failure.get_or_insert(record);
                }
            }
            if let Some(record) = failure {
                return RunOutcome::Failed(record);
            }
        }
    }

    async fn run_parallel(
        self: &Arc<Self>,
        plan: PlanId,
        batch: Vec<Task>,
    ) -> Vec<(Task, Result<(), FailureRecord>, u32)> {
        debug!(plan_id = %plan, tasks = batch.len(), "running parallel task group");
        let mut set = JoinSet::new();
        for task in batch.iter().cloned() {
            let this = Arc::clone(self);
            let sem = Arc::clone(&self.concurrency);
            set.spawn(async move {
                let _permit = sem.acquire_owned().await;
                let (result, attempts) = this.run_task(plan, &task).await;
                (task, result, attempts)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(r) => results.push(r),
                Err(e) => warn!(plan_id = %plan, error = %e, "parallel task panicked"),
            }
        }
        // A panicked task has no result; record it as an internal failure.
        for task in batch {
            if !results.iter().any(|(t, _, _)| t.index == task.index) {
                let record =
                    FailureRecord::message(FailureKind::Internal, Some(&task), "task panicked");
                results.push((task, Err(record), 1));
            }
        }
        results.sort_by_key(|(task, _, _)| task.index);
        results
    }

    /// Run one task with the retry policy. Returns the outcome and the
    /// number of attempts made.
    #[tracing::instrument(skip(self, task), fields(plan = %plan, task = task.index))]
    pub async fn run_task(&self, plan: PlanId, task: &Task) -> (Result<(), FailureRecord>, u32) {
        if let Some(message) = self.faults.before_task(plan, task) {
            warn!(%message, "fault injected");
            return (
                Err(FailureRecord::message(
                    FailureKind::Injected,
                    Some(task),
                    message,
                )),
                1,
            );
        }

        let policy = &self.config.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.perform(plan, &task.kind).await {
                Ok(()) => {
                    debug!(attempt, "task succeeded: {}", task.kind);
                    return (Ok(()), attempt);
                }
                Err(e) if e.is_retryable() && policy.should_retry(attempt) => {
                    let delay = policy.backoff(attempt);
                    debug!(
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "task failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let kind = if e.is_retryable() {
                        FailureKind::RetriesExhausted
                    } else {
                        FailureKind::TaskFailed
                    };
                    warn!(attempt, error = %e, "task failed: {}", task.kind);
                    return (Err(FailureRecord::from_error(kind, Some(task), &e)), attempt);
                }
            }
        }
    }

    async fn perform(&self, plan: PlanId, kind: &TaskKind) -> Result<(), NodeError> {
        let nodes = &self.nodes;
        match kind {
            TaskKind::RegisterStorageNode { sn, host, port } => {
                nodes.register_storage_node(*sn, host, *port).await
            }
            TaskKind::UnregisterStorageNode { sn } => nodes.unregister_storage_node(*sn).await,
            TaskKind::DeployAdmin { admin, sn } => {
                let service = ServiceId::Admin(*admin);
                nodes.deploy_service(service, *sn, None).await?;
                nodes.start_service(service, *sn).await
            }
            TaskKind::RemoveAdmin { admin, sn } => {
                let service = ServiceId::Admin(*admin);
                nodes.stop_service(service, *sn).await?;
                nodes.remove_service(service, *sn).await
            }
            TaskKind::WriteParams {
                service,
                sn,
                params,
            } => {
                let keys = self.params.record(plan, *service, params).await?;
                nodes.push_params(*service, *sn, params).await?;
                if !keys.is_empty() {
                    self.event_bus.emit(ParametersChanged {
                        plan_id: plan,
                        service: service.to_string(),
                        keys,
                    });
                }
                Ok(())
            }
            TaskKind::DeployRepNode {
                rn,
                sn,
                storage_dir,
            } => {
                nodes
                    .deploy_service(ServiceId::RepNode(*rn), *sn, storage_dir.as_deref())
                    .await
            }
            TaskKind::RemoveRepNode { rn, sn } => {
                nodes.remove_service(ServiceId::RepNode(*rn), *sn).await
            }
            TaskKind::DeployArbNode { an, sn } => {
                nodes.deploy_service(ServiceId::ArbNode(*an), *sn, None).await
            }
            TaskKind::RemoveArbNode { an, sn } => {
                nodes.remove_service(ServiceId::ArbNode(*an), *sn).await
            }
            TaskKind::StartService { service, sn } => nodes.start_service(*service, *sn).await,
            TaskKind::StopService { service, sn } => nodes.stop_service(*service, *sn).await,
            TaskKind::WaitForService { service, sn } => self.wait_for(*service, *sn).await,
            TaskKind::MigratePartition {
                partition,
                source,
                target,
            } => nodes.migrate_partition(*partition, *source, *target).await,
            TaskKind::CommitTopology => {
                let sequence = self.committer.commit(plan).await?;
                info!(plan_id = %plan, sequence, "topology committed");
                self.event_bus.emit(TopologyCommitted {
                    plan_id: plan,
                    sequence,
                });
                Ok(())
            }
        }
    }

    /// Poll until `service` reports running or the wait timeout passes.
    async fn wait_for(&self, service: ServiceId, sn: StorageNodeId) -> Result<(), NodeError> {
        let started = Instant::now();
        let deadline = started + self.config.wait_timeout;
        loop {
            match self.nodes.ping(service, sn).await {
                Ok(ServiceStatus::Running) => {
                    debug!(
                        %service,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "service reachable"
                    );
                    return Ok(());
                }
                Ok(status) => debug!(%service, ?status, "service not running yet"),
                Err(e) if e.is_retryable() => debug!(%service, error = %e, "ping failed"),
                Err(e) => return Err(e),
            }
            if Instant::now() + self.config.poll_interval > deadline {
                return Err(NodeError::Fatal(format!(
                    "{service} on {sn} did not become reachable within {}ms",
                    self.config.wait_timeout.as_millis()
                )));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

/// The next tasks to run: the first incomplete task, extended with the
/// adjacent incomplete tasks of the same parallel group.
fn next_batch(tasks: &[Task]) -> Vec<Task> {
    let Some(start) = tasks.iter().position(|t| t.state != TaskState::Succeeded) else {
        return Vec::new();
    };
    let first = &tasks[start];
    let Some(group) = first.group else {
        return vec![first.clone()];
    };
    tasks[start..]
        .iter()
        .take_while(|t| t.group == Some(group))
        .filter(|t| t.state != TaskState::Succeeded)
        .cloned()
        .collect()
}
