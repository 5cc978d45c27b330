//! Checks that need only the topology and parameters.

use std::collections::BTreeMap;

use reef_params::Parameters;
use reef_topology::{Topology, invariants};
use reef_types::params::keys;
use reef_types::{RepGroupId, ServiceId};
use tracing::warn;

use crate::VerifyConfig;
use crate::problem::{Problem, VerifyReport};

/// Parameters that RN sizing derives from the hosting storage node.
const SIZED_KEYS: [&str; 4] = [
    keys::JVM_HEAP_MB,
    keys::CACHE_SIZE,
    keys::PARALLEL_GC_THREADS,
    keys::ENDPOINT_GROUP_THREADS,
];

/// Run every check that needs no contact with storage nodes.
pub fn check_static(topo: &Topology, params: &Parameters, config: &VerifyConfig) -> VerifyReport {
    let mut report = VerifyReport::default();
    report.extend(capacity(topo));
    report.extend(storage_directories(topo));
    report.extend(admins(topo));
    report.extend(directory_balance(topo, config));
    report.extend(parameter_drift(topo, params));
    report.extend(
        invariants::check(topo)
            .into_iter()
            .map(Problem::TopologyInvariant),
    );
    report
}

/// Checks a deploy plan must pass before it may run.
///
/// Warnings are dropped; only blocking problems are returned.
pub fn deploy_check(topo: &Topology) -> Vec<Problem> {
    let mut problems: Vec<Problem> = capacity(topo)
        .into_iter()
        .chain(storage_directories(topo))
        .filter(Problem::is_violation)
        .collect();
    problems.extend(
        invariants::check(topo)
            .into_iter()
            .map(Problem::TopologyInvariant),
    );
    problems
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

fn capacity(topo: &Topology) -> Vec<Problem> {
    let mut problems = Vec::new();
    for (id, sn) in &topo.storage_nodes {
        let hosted = topo.hosted_count(*id);
        let capacity = sn.capacity;
        if hosted > capacity as usize {
            problems.push(Problem::OverCapacity {
                sn: *id,
                capacity,
                hosted,
            });
        } else if hosted < capacity as usize {
            problems.push(Problem::UnderCapacity {
                sn: *id,
                capacity,
                hosted,
            });
        }
    }
    problems
}

fn storage_directories(topo: &Topology) -> Vec<Problem> {
    let mut problems = Vec::new();
    for (id, sn) in &topo.storage_nodes {
        for dir in &sn.storage_dirs {
            if dir.size.is_none() {
                problems.push(Problem::MissingStorageDirectorySize {
                    sn: *id,
                    path: dir.path.clone(),
                });
            }
        }
        let in_root: Vec<_> = topo
            .rep_nodes_on(*id)
            .into_iter()
            .filter(|rn| {
                topo.rep_nodes
                    .get(rn)
                    .is_some_and(|node| node.storage_dir.is_none())
            })
            .collect();
        if in_root.len() > 1 {
            problems.push(Problem::MultipleRNsInRoot {
                sn: *id,
                rns: in_root,
            });
        }
    }
    problems
}

fn admins(topo: &Topology) -> Vec<Problem> {
    let mut problems = Vec::new();
    for (id, zone) in &topo.zones {
        if !zone.is_primary() || zone.repfactor == 0 {
            continue;
        }
        let actual = topo
            .admins
            .values()
            .filter(|admin| {
                topo.storage_nodes
                    .get(&admin.sn)
                    .is_some_and(|sn| sn.zone == *id)
            })
            .count();
        if actual < zone.repfactor as usize {
            problems.push(Problem::InsufficientAdmins {
                zone: *id,
                required: zone.repfactor,
                actual,
            });
        }
    }
    problems
}

fn directory_balance(topo: &Topology, config: &VerifyConfig) -> Vec<Problem> {
    let mut sizes: BTreeMap<RepGroupId, Vec<u64>> = BTreeMap::new();
    for rn in topo.rep_nodes.values() {
        let size = rn.storage_dir.as_deref().and_then(|path| {
            topo.storage_nodes
                .get(&rn.sn)
                .and_then(|sn| sn.storage_dir(path))
                .and_then(|dir| dir.size)
        });
        if let Some(size) = size {
            sizes.entry(rn.id.group).or_default().push(size);
        }
    }

    let mut problems = Vec::new();
    for (shard, list) in sizes {
        let (Some(&smallest), Some(&largest)) = (list.iter().min(), list.iter().max()) else {
            continue;
        };
        let allowed = smallest.saturating_mul(100 + config.dir_size_imbalance_percent) / 100;
        if largest > allowed {
            problems.push(Problem::StorageDirectorySizeImbalance {
                shard,
                smallest,
                largest,
            });
        }
    }
    problems
}

fn parameter_drift(topo: &Topology, params: &Parameters) -> Vec<Problem> {
    let mut problems = Vec::new();
    for sn in topo.storage_nodes.keys() {
        let sized = match params.size_rep_nodes(topo, *sn) {
            Ok(sized) => sized,
            Err(e) => {
                warn!(%sn, error = %e, "cannot size replication nodes");
                continue;
            }
        };
        for (rn, expected) in sized {
            let stored = params.overrides(ServiceId::RepNode(rn));
            for key in SIZED_KEYS {
                let want = expected.get(key);
                let have = stored.get(key);
                if want != have {
                    problems.push(Problem::ParamMismatch {
                        service: ServiceId::RepNode(rn),
                        key: key.to_string(),
                        expected: want.map(|v| v.to_string()),
                        actual: have.map(|v| v.to_string()),
                    });
                }
            }
        }
    }
    problems
}
