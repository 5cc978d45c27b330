//! Error types for plan control and execution.

use reef_types::{PlanId, PlanState, ResultCode, ServiceId};

/// Errors returned by plan control operations.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// No plan with this id exists.
    #[error("plan {0} does not exist")]
    NotFound(PlanId),

    /// The operation is not legal in the plan's current state.
    #[error("cannot {op} plan {plan} in state {state}")]
    InvalidState {
        /// The plan.
        plan: PlanId,
        /// The rejected operation.
        op: &'static str,
        /// State the plan is in.
        state: PlanState,
    },

    /// Another running plan holds an overlapping lock set.
    #[error("plan {plan} conflicts with running plan {blocking}")]
    Conflict {
        /// The plan that was asked to run.
        plan: PlanId,
        /// The running plan holding the overlapping locks.
        blocking: PlanId,
    },

    /// The live topology changed since the plan was computed.
    #[error(
        "plan {plan} was computed against topology sequence {expected}, but the current sequence is {current}"
    )]
    StaleTopology {
        /// The plan.
        plan: PlanId,
        /// Sequence recorded in the plan.
        expected: u64,
        /// Sequence of the live topology.
        current: u64,
    },

    /// Malformed request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Failed to access the metadata store.
    #[error("metadata error: {0}")]
    Meta(#[from] reef_meta::MetaError),
}

impl PlanError {
    /// The boundary status code for this error, if it has one.
    pub fn code(&self) -> Option<u32> {
        match self {
            PlanError::InvalidState { .. } => Some(ResultCode::InvalidState.code()),
            PlanError::Conflict { .. } => Some(ResultCode::OperationConflict.code()),
            _ => None,
        }
    }
}

/// Errors reported by node collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    /// The service did not answer; worth retrying.
    #[error("{0} is unreachable")]
    Unreachable(ServiceId),

    /// A temporary failure; worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A failure that retrying will not fix.
    #[error("{0}")]
    Fatal(String),
}

impl NodeError {
    /// Whether the executor should retry the task.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NodeError::Unreachable(_) | NodeError::Transient(_))
    }
}
