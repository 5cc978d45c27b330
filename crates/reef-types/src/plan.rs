//! Persisted plan model: states, legal transitions, tasks and lock sets.
//!
//! A [`Plan`] is a durable description of a cluster-mutating operation. Its
//! work is an ordered list of [`Task`]s, each a [`TaskKind`] variant executed
//! by a single generic runner. Adjacent tasks that share a `group` value are
//! independent of one another and may run concurrently.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    AdminId, ArbNodeId, ParameterMap, PartitionId, PlanId, RepGroupId, RepNodeId, ServiceId,
    StorageNodeId, ZoneId, now_millis,
};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Lifecycle state of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanState {
    /// Created, awaiting approval.
    Pending,
    /// Approved, may be executed.
    Approved,
    /// A worker is executing tasks.
    Running,
    /// Interrupt requested; the worker stops at the next task boundary.
    InterruptRequested,
    /// Stopped before completion; may be re-executed or canceled.
    Interrupted,
    /// Abandoned by the operator. Final.
    Canceled,
    /// A task failed; may be re-executed or canceled.
    Error,
    /// All tasks completed. Final.
    Succeeded,
}

impl PlanState {
    /// Whether moving from `self` to `next` is legal.
    pub fn can_transition_to(self, next: PlanState) -> bool {
        use PlanState::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Canceled)
                | (Approved, Running)
                | (Running, Succeeded)
                | (Running, Error)
                | (Running, InterruptRequested)
                | (Running, Interrupted)
                | (InterruptRequested, Interrupted)
                | (InterruptRequested, Error)
                | (InterruptRequested, Succeeded)
                | (Interrupted, Running)
                | (Interrupted, Canceled)
                | (Error, Running)
                | (Error, Canceled)
        )
    }

    /// States from which no further transition exists.
    pub fn is_final(self) -> bool {
        matches!(self, PlanState::Succeeded | PlanState::Canceled)
    }

    /// States where a worker may be executing tasks.
    pub fn is_active(self) -> bool {
        matches!(self, PlanState::Running | PlanState::InterruptRequested)
    }

    /// States in which an awaiting client stops waiting.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            PlanState::Succeeded | PlanState::Error | PlanState::Interrupted | PlanState::Canceled
        )
    }

    /// States from which `execute` is accepted.
    pub fn is_executable(self) -> bool {
        matches!(
            self,
            PlanState::Approved | PlanState::Interrupted | PlanState::Error
        )
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanState::Pending => "PENDING",
            PlanState::Approved => "APPROVED",
            PlanState::Running => "RUNNING",
            PlanState::InterruptRequested => "INTERRUPT_REQUESTED",
            PlanState::Interrupted => "INTERRUPTED",
            PlanState::Canceled => "CANCELED",
            PlanState::Error => "ERROR",
            PlanState::Succeeded => "SUCCEEDED",
        };
        f.write_str(s)
    }
}

/// Stable status codes observed at the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    /// The call succeeded.
    Success,
    /// The operation is not legal in the plan's current state.
    InvalidState,
    /// A resource the plan needs is locked by another running plan.
    OperationConflict,
    /// The call succeeded but the plan ended in ERROR.
    PlanFailed,
}

impl ResultCode {
    /// Numeric wire value.
    pub fn code(self) -> u32 {
        match self {
            ResultCode::Success => 5000,
            ResultCode::InvalidState => 5100,
            ResultCode::OperationConflict => 5200,
            ResultCode::PlanFailed => 5500,
        }
    }

    /// Code reported to a client that awaited a plan into `state`.
    pub fn for_state(state: PlanState) -> Self {
        if state == PlanState::Error {
            ResultCode::PlanFailed
        } else {
            ResultCode::Success
        }
    }
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

/// The operation a plan performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanKind {
    /// Add a zone to the topology.
    DeployZone,
    /// Register a storage node.
    DeployStorageNode,
    /// Add an admin service on a storage node.
    DeployAdmin,
    /// Make a topology candidate the live topology.
    DeployTopology,
    /// Move every service from one storage node to another.
    MigrateStorageNode,
    /// Remove an empty, stopped storage node.
    RemoveStorageNode,
    /// Remove an admin service.
    RemoveAdmin,
    /// Change parameters of one or more resources.
    ChangeParams,
    /// Drop a shard whose nodes were lost.
    RemoveFailedShard,
    /// Start services.
    StartServices,
    /// Stop services.
    StopServices,
    /// Redeploy or restart services that drifted from the topology.
    Repair,
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanKind::DeployZone => "deploy-zone",
            PlanKind::DeployStorageNode => "deploy-sn",
            PlanKind::DeployAdmin => "deploy-admin",
            PlanKind::DeployTopology => "deploy-topology",
            PlanKind::MigrateStorageNode => "migrate-sn",
            PlanKind::RemoveStorageNode => "remove-sn",
            PlanKind::RemoveAdmin => "remove-admin",
            PlanKind::ChangeParams => "change-params",
            PlanKind::RemoveFailedShard => "remove-failed-shard",
            PlanKind::StartServices => "start-services",
            PlanKind::StopServices => "stop-services",
            PlanKind::Repair => "repair",
        };
        f.write_str(s)
    }
}

/// Attempt to move a plan into a state not reachable from its current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal plan state transition {from} -> {to}")]
pub struct InvalidTransition {
    /// State the plan was in.
    pub from: PlanState,
    /// State that was requested.
    pub to: PlanState,
}

/// Classification of a recorded plan failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// A task failed with a non-retryable error.
    TaskFailed,
    /// A task kept failing with retryable errors until the budget ran out.
    RetriesExhausted,
    /// A fault was injected by the executor's fault hook.
    Injected,
    /// The admin running the plan went away mid-execution.
    AdminFailover,
    /// Unexpected fault inside the control plane itself.
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::TaskFailed => "task failed",
            FailureKind::RetriesExhausted => "retries exhausted",
            FailureKind::Injected => "injected fault",
            FailureKind::AdminFailover => "admin failover",
            FailureKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// Transferable record of why a plan stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// What kind of failure occurred.
    pub kind: FailureKind,
    /// Human-readable cause.
    pub message: String,
    /// Index of the failing task, if one was running.
    pub task: Option<u32>,
    /// Description of the failing task.
    pub task_description: Option<String>,
    /// Error source chain, outermost first.
    pub stack: Vec<String>,
    /// When the failure was recorded (Unix millis).
    pub at: u64,
}

impl FailureRecord {
    /// Build a failure record, capturing the source chain of `err`.
    pub fn from_error(
        kind: FailureKind,
        task: Option<&Task>,
        err: &(dyn std::error::Error + 'static),
    ) -> Self {
        let mut stack = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            stack.push(cause.to_string());
            source = cause.source();
        }
        Self {
            kind,
            message: err.to_string(),
            task: task.map(|t| t.index),
            task_description: task.map(|t| t.kind.to_string()),
            stack,
            at: now_millis(),
        }
    }

    /// Build a failure record from a plain message.
    pub fn message(kind: FailureKind, task: Option<&Task>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            task: task.map(|t| t.index),
            task_description: task.map(|t| t.kind.to_string()),
            stack: Vec::new(),
            at: now_millis(),
        }
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.task_description {
            Some(task) => write!(f, "{}: {} (task: {task})", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// A durable plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Monotonic identifier.
    pub id: PlanId,
    /// Operator-chosen name.
    pub name: String,
    /// What the plan does.
    pub kind: PlanKind,
    /// Creating user; `None` for system-initiated plans.
    pub owner: Option<String>,
    /// Current lifecycle state.
    pub state: PlanState,
    /// Ordered work list.
    pub tasks: Vec<Task>,
    /// Resources the plan mutates.
    pub locks: LockSet,
    /// Latest failure, cleared when the plan is re-executed.
    pub failure: Option<FailureRecord>,
    /// Creation time (Unix millis).
    pub created_at: u64,
    /// Approval time (Unix millis).
    pub approved_at: Option<u64>,
    /// Start of the most recent execution (Unix millis).
    pub executed_at: Option<u64>,
    /// End of the most recent execution (Unix millis).
    pub ended_at: Option<u64>,
    /// Number of times the plan has been executed.
    pub attempts: u32,
    /// Topology sequence number the plan was computed against.
    pub base_topology_seq: Option<u64>,
}

impl Plan {
    /// Create a new pending plan. Task indexes are assigned in list order.
    pub fn new(
        id: PlanId,
        name: impl Into<String>,
        kind: PlanKind,
        owner: Option<String>,
        tasks: Vec<Task>,
        locks: LockSet,
    ) -> Self {
        let tasks = tasks
            .into_iter()
            .enumerate()
            .map(|(i, mut t)| {
                t.index = i as u32;
                t
            })
            .collect();
        Self {
            id,
            name: name.into(),
            kind,
            owner,
            state: PlanState::Pending,
            tasks,
            locks,
            failure: None,
            created_at: now_millis(),
            approved_at: None,
            executed_at: None,
            ended_at: None,
            attempts: 0,
            base_topology_seq: None,
        }
    }

    /// Attach the topology sequence the plan was computed against.
    pub fn with_base_topology_seq(mut self, seq: u64) -> Self {
        self.base_topology_seq = Some(seq);
        self
    }

    /// Move to `next`, or report an illegal transition without changing state.
    pub fn transition(&mut self, next: PlanState) -> Result<PlanState, InvalidTransition> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        self.state = next;
        Ok(from)
    }

    /// Index of the first task that has not succeeded.
    pub fn first_incomplete(&self) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| t.state != TaskState::Succeeded)
    }

    /// Number of succeeded tasks.
    pub fn completed_tasks(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Succeeded)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Progress of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Not yet attempted in the current execution.
    Pending,
    /// Attempt in flight.
    Running,
    /// Completed; skipped on re-execution.
    Succeeded,
    /// Failed; re-attempted on re-execution.
    Failed,
    /// Stopped by an interrupt or failover before completing.
    Interrupted,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Succeeded => "SUCCEEDED",
            TaskState::Failed => "FAILED",
            TaskState::Interrupted => "INTERRUPTED",
        };
        f.write_str(s)
    }
}

/// The work a task performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Register a storage node agent with the store.
    RegisterStorageNode {
        sn: StorageNodeId,
        host: String,
        port: u16,
    },
    /// Drop a storage node agent's registration.
    UnregisterStorageNode { sn: StorageNodeId },
    /// Create and start an admin service.
    DeployAdmin { admin: AdminId, sn: StorageNodeId },
    /// Stop and remove an admin service.
    RemoveAdmin { admin: AdminId, sn: StorageNodeId },
    /// Record and push new parameters for a service.
    WriteParams {
        service: ServiceId,
        sn: StorageNodeId,
        params: ParameterMap,
    },
    /// Create a replication node's configuration on a storage node.
    DeployRepNode {
        rn: RepNodeId,
        sn: StorageNodeId,
        storage_dir: Option<String>,
    },
    /// Remove a replication node's configuration from a storage node.
    RemoveRepNode { rn: RepNodeId, sn: StorageNodeId },
    /// Create an arbiter's configuration on a storage node.
    DeployArbNode { an: ArbNodeId, sn: StorageNodeId },
    /// Remove an arbiter's configuration from a storage node.
    RemoveArbNode { an: ArbNodeId, sn: StorageNodeId },
    /// Start a service (no-op if already running).
    StartService { service: ServiceId, sn: StorageNodeId },
    /// Stop a service (no-op if already stopped).
    StopService { service: ServiceId, sn: StorageNodeId },
    /// Poll until a service answers, bounded by the wait timeout.
    WaitForService { service: ServiceId, sn: StorageNodeId },
    /// Copy a partition to another shard and switch ownership.
    MigratePartition {
        partition: PartitionId,
        source: RepGroupId,
        target: RepGroupId,
    },
    /// Promote the plan's target topology to be the live topology.
    CommitTopology,
}

impl TaskKind {
    /// The storage node the task talks to, if any.
    pub fn storage_node(&self) -> Option<StorageNodeId> {
        match self {
            TaskKind::RegisterStorageNode { sn, .. }
            | TaskKind::UnregisterStorageNode { sn }
            | TaskKind::DeployAdmin { sn, .. }
            | TaskKind::RemoveAdmin { sn, .. }
            | TaskKind::WriteParams { sn, .. }
            | TaskKind::DeployRepNode { sn, .. }
            | TaskKind::RemoveRepNode { sn, .. }
            | TaskKind::DeployArbNode { sn, .. }
            | TaskKind::RemoveArbNode { sn, .. }
            | TaskKind::StartService { sn, .. }
            | TaskKind::StopService { sn, .. }
            | TaskKind::WaitForService { sn, .. } => Some(*sn),
            TaskKind::MigratePartition { .. } | TaskKind::CommitTopology => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::RegisterStorageNode { sn, host, port } => {
                write!(f, "register {sn} at {host}:{port}")
            }
            TaskKind::UnregisterStorageNode { sn } => write!(f, "unregister {sn}"),
            TaskKind::DeployAdmin { admin, sn } => write!(f, "deploy {admin} on {sn}"),
            TaskKind::RemoveAdmin { admin, sn } => write!(f, "remove {admin} from {sn}"),
            TaskKind::WriteParams { service, .. } => write!(f, "write params for {service}"),
            TaskKind::DeployRepNode { rn, sn, storage_dir } => match storage_dir {
                Some(dir) => write!(f, "deploy {rn} on {sn} in {dir}"),
                None => write!(f, "deploy {rn} on {sn}"),
            },
            TaskKind::RemoveRepNode { rn, sn } => write!(f, "remove {rn} from {sn}"),
            TaskKind::DeployArbNode { an, sn } => write!(f, "deploy {an} on {sn}"),
            TaskKind::RemoveArbNode { an, sn } => write!(f, "remove {an} from {sn}"),
            TaskKind::StartService { service, .. } => write!(f, "start {service}"),
            TaskKind::StopService { service, .. } => write!(f, "stop {service}"),
            TaskKind::WaitForService { service, .. } => {
                write!(f, "wait for {service} to become reachable")
            }
            TaskKind::MigratePartition {
                partition,
                source,
                target,
            } => write!(f, "migrate {partition} from {source} to {target}"),
            TaskKind::CommitTopology => f.write_str("commit topology"),
        }
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Position in the plan's task list.
    pub index: u32,
    /// The work to perform.
    pub kind: TaskKind,
    /// Progress.
    pub state: TaskState,
    /// Attempts made across all executions.
    pub attempts: u32,
    /// Concurrency group; adjacent tasks with equal groups run together.
    pub group: Option<u32>,
    /// Last error observed, if any.
    pub error: Option<String>,
}

impl Task {
    /// A task that runs alone.
    pub fn new(kind: TaskKind) -> Self {
        Self {
            index: 0,
            kind,
            state: TaskState::Pending,
            attempts: 0,
            group: None,
            error: None,
        }
    }

    /// A task that may run concurrently with its neighbours in `group`.
    pub fn parallel(kind: TaskKind, group: u32) -> Self {
        Self {
            group: Some(group),
            ..Self::new(kind)
        }
    }
}

// ---------------------------------------------------------------------------
// Lock sets
// ---------------------------------------------------------------------------

/// The topology components a plan intends to mutate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSet {
    /// Conflicts with every other running plan.
    pub everything: bool,
    /// Replaces the live topology; at most one such plan runs at a time.
    pub topology_writer: bool,
    /// Zones touched.
    pub zones: BTreeSet<ZoneId>,
    /// Storage nodes touched.
    pub storage_nodes: BTreeSet<StorageNodeId>,
    /// Shards touched.
    pub shards: BTreeSet<RepGroupId>,
    /// Admin services touched.
    pub admins: BTreeSet<AdminId>,
}

impl LockSet {
    /// An empty lock set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A lock set that excludes every other plan.
    pub fn everything() -> Self {
        Self {
            everything: true,
            topology_writer: true,
            ..Self::default()
        }
    }

    /// Mark the plan as a writer of the live topology.
    pub fn topology_writer(mut self) -> Self {
        self.topology_writer = true;
        self
    }

    /// Add a zone.
    pub fn zone(mut self, id: ZoneId) -> Self {
        self.zones.insert(id);
        self
    }

    /// Add a storage node.
    pub fn storage_node(mut self, id: StorageNodeId) -> Self {
        self.storage_nodes.insert(id);
        self
    }

    /// Add a shard.
    pub fn shard(mut self, id: RepGroupId) -> Self {
        self.shards.insert(id);
        self
    }

    /// Add an admin.
    pub fn admin(mut self, id: AdminId) -> Self {
        self.admins.insert(id);
        self
    }

    /// Add a service: its shard (if any) and hosting storage node.
    pub fn service(mut self, service: ServiceId, sn: StorageNodeId) -> Self {
        if let Some(shard) = service.shard() {
            self.shards.insert(shard);
        }
        if let ServiceId::Admin(admin) = service {
            self.admins.insert(admin);
        }
        self.storage_nodes.insert(sn);
        self
    }

    /// Whether two plans holding these sets may not run at the same time.
    pub fn conflicts_with(&self, other: &LockSet) -> bool {
        if self.everything || other.everything {
            return true;
        }
        if self.topology_writer && other.topology_writer {
            return true;
        }
        !self.zones.is_disjoint(&other.zones)
            || !self.storage_nodes.is_disjoint(&other.storage_nodes)
            || !self.shards.is_disjoint(&other.shards)
            || !self.admins.is_disjoint(&other.admins)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
