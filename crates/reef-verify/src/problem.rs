//! Typed diagnostics produced by verification.

use std::fmt;

use reef_topology::invariants::Violation;
use reef_types::{RepGroupId, RepNodeId, ServiceId, StorageNodeId, ZoneId};
use serde::{Deserialize, Serialize};

/// Whether a problem blocks correct operation or only deserves attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Must be fixed.
    Violation,
    /// Advisory.
    Warning,
}

/// A single diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Problem {
    /// A storage node hosts fewer services than its capacity allows.
    UnderCapacity {
        sn: StorageNodeId,
        capacity: u32,
        hosted: usize,
    },
    /// A storage node hosts more services than its capacity allows.
    OverCapacity {
        sn: StorageNodeId,
        capacity: u32,
        hosted: usize,
    },
    /// A storage directory has no declared size.
    MissingStorageDirectorySize { sn: StorageNodeId, path: String },
    /// A primary zone hosts fewer admins than its replication factor.
    InsufficientAdmins {
        zone: ZoneId,
        required: u32,
        actual: usize,
    },
    /// Several replication nodes share a storage node's root directory.
    MultipleRNsInRoot {
        sn: StorageNodeId,
        rns: Vec<RepNodeId>,
    },
    /// A status probe failed.
    RpcFailed {
        service: ServiceId,
        sn: StorageNodeId,
        error: String,
    },
    /// A service that should be running is not.
    ServiceStopped {
        service: ServiceId,
        sn: StorageNodeId,
        deployed: bool,
    },
    /// Free space on a storage directory's volume is below the threshold.
    AvailableStorageLow {
        sn: StorageNodeId,
        path: String,
        available: u64,
        threshold: u64,
    },
    /// A storage directory holds more data than its declared size.
    AvailableStorageExceeded {
        sn: StorageNodeId,
        path: String,
        used: u64,
        size: u64,
    },
    /// The replicas of one shard sit on directories of very different sizes.
    StorageDirectorySizeImbalance {
        shard: RepGroupId,
        smallest: u64,
        largest: u64,
    },
    /// A stored parameter differs from the value sizing would compute.
    ParamMismatch {
        service: ServiceId,
        key: String,
        expected: Option<String>,
        actual: Option<String>,
    },
    /// The topology breaks a structural rule.
    TopologyInvariant(Violation),
}

impl Problem {
    /// How serious the problem is.
    pub fn severity(&self) -> Severity {
        match self {
            Problem::UnderCapacity { .. }
            | Problem::InsufficientAdmins { .. }
            | Problem::AvailableStorageLow { .. }
            | Problem::StorageDirectorySizeImbalance { .. }
            | Problem::ParamMismatch { .. } => Severity::Warning,
            _ => Severity::Violation,
        }
    }

    /// Whether the problem is a violation.
    pub fn is_violation(&self) -> bool {
        self.severity() == Severity::Violation
    }

    /// Short stable name of the problem kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Problem::UnderCapacity { .. } => "UnderCapacity",
            Problem::OverCapacity { .. } => "OverCapacity",
            Problem::MissingStorageDirectorySize { .. } => "MissingStorageDirectorySize",
            Problem::InsufficientAdmins { .. } => "InsufficientAdmins",
            Problem::MultipleRNsInRoot { .. } => "MultipleRNsInRoot",
            Problem::RpcFailed { .. } => "RpcFailed",
            Problem::ServiceStopped { .. } => "ServiceStopped",
            Problem::AvailableStorageLow { .. } => "AvailableStorageLow",
            Problem::AvailableStorageExceeded { .. } => "AvailableStorageExceeded",
            Problem::StorageDirectorySizeImbalance { .. } => "StorageDirectorySizeImbalance",
            Problem::ParamMismatch { .. } => "ParamMismatch",
            Problem::TopologyInvariant(_) => "TopologyInvariant",
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Problem::UnderCapacity {
                sn,
                capacity,
                hosted,
            } => write!(f, "{sn} hosts {hosted} service(s) but has capacity {capacity}"),
            Problem::OverCapacity {
                sn,
                capacity,
                hosted,
            } => write!(
                f,
                "{sn} hosts {hosted} service(s), exceeding its capacity of {capacity}"
            ),
            Problem::MissingStorageDirectorySize { sn, path } => {
                write!(f, "storage directory {path} on {sn} has no declared size")
            }
            Problem::InsufficientAdmins {
                zone,
                required,
                actual,
            } => write!(f, "{zone} has {actual} admin(s), needs {required}"),
            Problem::MultipleRNsInRoot { sn, rns } => {
                let names: Vec<String> = rns.iter().map(|rn| rn.to_string()).collect();
                write!(
                    f,
                    "{} share the root directory of {sn}",
                    names.join(", ")
                )
            }
            Problem::RpcFailed { service, sn, error } => {
                write!(f, "could not reach {service} on {sn}: {error}")
            }
            Problem::ServiceStopped {
                service,
                sn,
                deployed,
            } => {
                if *deployed {
                    write!(f, "{service} on {sn} is stopped")
                } else {
                    write!(f, "{service} is not deployed on {sn}")
                }
            }
            Problem::AvailableStorageLow {
                sn,
                path,
                available,
                threshold,
            } => write!(
                f,
                "{path} on {sn} has {available} bytes available, below {threshold}"
            ),
            Problem::AvailableStorageExceeded {
                sn,
                path,
                used,
                size,
            } => write!(
                f,
                "{path} on {sn} holds {used} bytes, more than its size of {size}"
            ),
            Problem::StorageDirectorySizeImbalance {
                shard,
                smallest,
                largest,
            } => write!(
                f,
                "{shard} uses storage directories from {smallest} to {largest} bytes"
            ),
            Problem::ParamMismatch {
                service,
                key,
                expected,
                actual,
            } => write!(
                f,
                "{service} has {key}={} but sizing computes {}",
                actual.as_deref().unwrap_or("<unset>"),
                expected.as_deref().unwrap_or("<unset>")
            ),
            Problem::TopologyInvariant(v) => write!(f, "{v}"),
        }
    }
}

/// Result of a verification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Problems that must be fixed.
    pub violations: Vec<Problem>,
    /// Advisory problems.
    pub warnings: Vec<Problem>,
}

impl VerifyReport {
    /// Sort a problem into the right list.
    pub fn push(&mut self, problem: Problem) {
        match problem.severity() {
            Severity::Violation => self.violations.push(problem),
            Severity::Warning => self.warnings.push(problem),
        }
    }

    /// No violations (warnings are allowed).
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// All problems of a given kind, violations first.
    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Problem> + 'a {
        self.violations
            .iter()
            .chain(self.warnings.iter())
            .filter(move |p| p.kind() == kind)
    }
}

impl Extend<Problem> for VerifyReport {
    fn extend<I: IntoIterator<Item = Problem>>(&mut self, iter: I) {
        for problem in iter {
            self.push(problem);
        }
    }
}
