//! Error types for the admin service.

use reef_types::{PlanId, ServiceId};
use reef_verify::Problem;

/// Errors returned by admin operations.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// Plan control failed.
    #[error(transparent)]
    Plan(#[from] reef_plan::PlanError),

    /// A topology planner operation failed.
    #[error("planner error: {0}")]
    Planner(#[from] reef_planner::PlannerError),

    /// The topology references an unknown resource.
    #[error("topology error: {0}")]
    Topology(#[from] reef_topology::TopologyError),

    /// Parameters are invalid or cannot be sized.
    #[error("parameter error: {0}")]
    Params(#[from] reef_params::ParamsError),

    /// Failed to access the metadata store.
    #[error("metadata error: {0}")]
    Meta(#[from] reef_meta::MetaError),

    /// No candidate with this name exists.
    #[error("topology candidate {0} does not exist")]
    CandidateNotFound(String),

    /// A candidate with this name already exists.
    #[error("topology candidate {0} already exists")]
    CandidateExists(String),

    /// No storage node pool with this name exists.
    #[error("storage node pool {0} does not exist")]
    PoolNotFound(String),

    /// A pool with this name already exists.
    #[error("storage node pool {0} already exists")]
    PoolExists(String),

    /// The service is not part of the live topology.
    #[error("{0} is not in the topology")]
    UnknownService(ServiceId),

    /// Deploy checks found blocking problems; execute with force to override.
    #[error(
        "plan {plan} fails deploy checks with {} problem(s), first: {}",
        .problems.len(),
        .problems.first().map(|p| p.to_string()).unwrap_or_default()
    )]
    DeployBlocked {
        /// The plan.
        plan: PlanId,
        /// Blocking problems in the plan's target topology.
        problems: Vec<Problem>,
    },

    /// Malformed or pointless request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl AdminError {
    /// The boundary status code for this error, if it has one.
    pub fn code(&self) -> Option<u32> {
        match self {
            AdminError::Plan(e) => e.code(),
            _ => None,
        }
    }
}

/// Convenience alias for admin results.
pub type Result<T> = std::result::Result<T, AdminError>;
