//! Collaborators for an admin opened without any storage node agents.
//!
//! Offline commands need an [`Admin`](reef_admin::Admin) for recovery and
//! pruning but never execute a plan. Every node operation and probe reports
//! the node unreachable.

use reef_plan::{NodeControl, NodeError, ServiceStatus};
use reef_types::{ParameterMap, PartitionId, RepGroupId, ServiceId, StorageNodeId};
use reef_verify::{Prober, StorageUsage};

/// A node collaborator with no nodes behind it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Detached;

fn unreachable(sn: StorageNodeId) -> NodeError {
    NodeError::Unreachable(ServiceId::StorageNode(sn))
}

#[async_trait::async_trait]
impl NodeControl for Detached {
    async fn register_storage_node(
        &self,
        sn: StorageNodeId,
        _host: &str,
        _port: u16,
    ) -> Result<(), NodeError> {
        Err(unreachable(sn))
    }

    async fn unregister_storage_node(&self, sn: StorageNodeId) -> Result<(), NodeError> {
        Err(unreachable(sn))
    }

    async fn deploy_service(
        &self,
        _service: ServiceId,
        sn: StorageNodeId,
        _storage_dir: Option<&str>,
    ) -> Result<(), NodeError> {
        Err(unreachable(sn))
    }

    async fn remove_service(&self, _service: ServiceId, sn: StorageNodeId) -> Result<(), NodeError> {
        Err(unreachable(sn))
    }

    async fn start_service(&self, _service: ServiceId, sn: StorageNodeId) -> Result<(), NodeError> {
        Err(unreachable(sn))
    }

    async fn stop_service(&self, _service: ServiceId, sn: StorageNodeId) -> Result<(), NodeError> {
        Err(unreachable(sn))
    }

    async fn ping(&self, _service: ServiceId, sn: StorageNodeId) -> Result<ServiceStatus, NodeError> {
        Err(unreachable(sn))
    }

    async fn migrate_partition(
        &self,
        partition: PartitionId,
        _source: RepGroupId,
        _target: RepGroupId,
    ) -> Result<(), NodeError> {
        Err(NodeError::Fatal(format!(
            "cannot migrate {partition} without storage node agents"
        )))
    }

    async fn push_params(
        &self,
        _service: ServiceId,
        sn: StorageNodeId,
        _params: &ParameterMap,
    ) -> Result<(), NodeError> {
        Err(unreachable(sn))
    }
}

#[async_trait::async_trait]
impl Prober for Detached {
    async fn status(&self, _service: ServiceId, sn: StorageNodeId) -> Result<ServiceStatus, NodeError> {
        Err(unreachable(sn))
    }

    async fn storage_usage(
        &self,
        sn: StorageNodeId,
        _path: &str,
    ) -> Result<Option<StorageUsage>, NodeError> {
        Err(unreachable(sn))
    }
}
