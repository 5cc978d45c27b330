//! Error types for parameter handling.

use reef_topology::TopologyError;

/// Errors returned by parameter validation and sizing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamsError {
    /// A parameter value is outside its legal range.
    #[error("invalid value {value} for {key}: {reason}")]
    InvalidValue {
        /// Parameter name.
        key: String,
        /// Offending value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The referenced resource is not in the topology.
    #[error(transparent)]
    Topology(#[from] TopologyError),
}
