//! Configuration verifier for Reef.
//!
//! Verification is a stateless audit. [`check_static`] inspects only the
//! topology and parameters; [`verify`] adds status and storage probes of
//! every storage node through a [`Prober`]. Results come back as a
//! [`VerifyReport`] split into violations and warnings and are never stored.
//!
//! [`deploy_check`] is the subset consulted before a deploy plan runs.

mod checks;
mod probe;
mod problem;

pub use checks::{check_static, deploy_check};
pub use probe::{Prober, StorageUsage, hosted_services, verify};
pub use problem::{Problem, Severity, VerifyReport};

use serde::{Deserialize, Serialize};

/// Thresholds used by verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    /// Free bytes on a storage directory's volume below which a warning is
    /// raised.
    pub available_storage_low_bytes: u64,
    /// How much larger, in percent, a shard's biggest storage directory may
    /// be than its smallest before a warning is raised.
    pub dir_size_imbalance_percent: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            available_storage_low_bytes: 5 * 1024 * 1024 * 1024,
            dir_size_imbalance_percent: 10,
        }
    }
}
