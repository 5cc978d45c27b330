//! Live verification against storage node agents.

use reef_params::Parameters;
use reef_plan::{NodeError, ServiceStatus};
use reef_topology::Topology;
use reef_types::{ServiceId, StorageNodeId};
use tracing::{debug, info};

use crate::VerifyConfig;
use crate::checks::check_static;
use crate::problem::{Problem, VerifyReport};

/// Space accounting for one storage directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageUsage {
    /// Bytes held by the store in the directory.
    pub used: u64,
    /// Bytes still free on the directory's volume.
    pub available: u64,
}

/// Read-only view of storage node agents used by verification.
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    /// Status of a service as reported by its storage node.
    async fn status(&self, service: ServiceId, sn: StorageNodeId)
    -> Result<ServiceStatus, NodeError>;

    /// Usage of a storage directory, `None` if the agent cannot tell.
    async fn storage_usage(
        &self,
        sn: StorageNodeId,
        path: &str,
    ) -> Result<Option<StorageUsage>, NodeError>;
}

/// Audit the topology, parameters and every reachable service.
///
/// Each storage node agent is probed first; when it cannot be reached its
/// hosted services are reported through the agent's failure alone.
pub async fn verify(
    topo: &Topology,
    params: &Parameters,
    prober: &dyn Prober,
    config: &VerifyConfig,
) -> VerifyReport {
    let mut report = check_static(topo, params, config);

    for (id, node) in &topo.storage_nodes {
        let agent = ServiceId::StorageNode(*id);
        match prober.status(agent, *id).await {
            Ok(ServiceStatus::Running) => {}
            Ok(_) => {
                report.push(Problem::ServiceStopped {
                    service: agent,
                    sn: *id,
                    deployed: true,
                });
                continue;
            }
            Err(e) => {
                report.push(rpc_failed(agent, *id, &e));
                continue;
            }
        }

        for service in hosted_services(topo, *id) {
            match prober.status(service, *id).await {
                Ok(ServiceStatus::Running) => {}
                Ok(status) => report.push(Problem::ServiceStopped {
                    service,
                    sn: *id,
                    deployed: status == ServiceStatus::Stopped,
                }),
                Err(e) => report.push(rpc_failed(service, *id, &e)),
            }
        }

        for dir in &node.storage_dirs {
            let usage = match prober.storage_usage(*id, &dir.path).await {
                Ok(Some(usage)) => usage,
                Ok(None) => continue,
                Err(e) => {
                    report.push(rpc_failed(agent, *id, &e));
                    continue;
                }
            };
            if let Some(size) = dir.size {
                if usage.used > size {
                    report.push(Problem::AvailableStorageExceeded {
                        sn: *id,
                        path: dir.path.clone(),
                        used: usage.used,
                        size,
                    });
                }
            }
            if usage.available < config.available_storage_low_bytes {
                report.push(Problem::AvailableStorageLow {
                    sn: *id,
                    path: dir.path.clone(),
                    available: usage.available,
                    threshold: config.available_storage_low_bytes,
                });
            }
        }
    }

    info!(
        violations = report.violations.len(),
        warnings = report.warnings.len(),
        "verification finished"
    );
    report
}

/// Services the topology places on a storage node, admins first.
pub fn hosted_services(topo: &Topology, sn: StorageNodeId) -> Vec<ServiceId> {
    let mut services: Vec<ServiceId> = topo
        .admins_on(sn)
        .into_iter()
        .map(ServiceId::Admin)
        .collect();
    services.extend(topo.rep_nodes_on(sn).into_iter().map(ServiceId::RepNode));
    services.extend(topo.arb_nodes_on(sn).into_iter().map(ServiceId::ArbNode));
    services
}

fn rpc_failed(service: ServiceId, sn: StorageNodeId, error: &NodeError) -> Problem {
    debug!(%service, %sn, %error, "probe failed");
    Problem::RpcFailed {
        service,
        sn,
        error: error.to_string(),
    }
}
