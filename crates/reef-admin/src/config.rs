//! Admin service configuration.

use reef_plan::ExecutorConfig;
use reef_verify::VerifyConfig;

/// Configuration for creating an [`Admin`](crate::Admin).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminConfig {
    /// Name of the store, used for the initial empty topology.
    pub store_name: String,
    /// Recorded as the owner of plans created through this admin.
    pub owner: Option<String>,
    /// Executor tuning.
    pub executor: ExecutorConfig,
    /// Finished plans kept by [`Admin::prune_plans`](crate::Admin::prune_plans).
    pub plan_retention: usize,
    /// Verification thresholds.
    pub verify: VerifyConfig,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            store_name: "reef".to_string(),
            owner: None,
            executor: ExecutorConfig::default(),
            plan_retention: 1000,
            verify: VerifyConfig::default(),
        }
    }
}
