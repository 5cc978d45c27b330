//! Collaborator interfaces the executor drives.
//!
//! Concrete implementations are chosen when the admin is assembled: a real
//! deployment talks to storage node agents, tests use an in-memory mock.

use reef_types::{ParameterMap, PartitionId, PlanId, RepGroupId, ServiceId, StorageNodeId};

use crate::error::NodeError;

/// What a ping reports about a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Up and answering.
    Running,
    /// Configured but not running.
    Stopped,
    /// Not configured on the storage node.
    Absent,
}

/// Control of storage node agents and the services they host.
///
/// Every operation must be idempotent: starting a running service,
/// deploying an already-deployed one or removing an absent one succeeds.
#[async_trait::async_trait]
pub trait NodeControl: Send + Sync {
    /// Register a storage node agent with the store.
    async fn register_storage_node(
        &self,
        sn: StorageNodeId,
        host: &str,
        port: u16,
    ) -> Result<(), NodeError>;

    /// Drop a storage node agent's registration.
    async fn unregister_storage_node(&self, sn: StorageNodeId) -> Result<(), NodeError>;

    /// Create a service's configuration on a storage node.
    async fn deploy_service(
        &self,
        service: ServiceId,
        sn: StorageNodeId,
        storage_dir: Option<&str>,
    ) -> Result<(), NodeError>;

    /// Remove a service's configuration from a storage node.
    async fn remove_service(&self, service: ServiceId, sn: StorageNodeId)
    -> Result<(), NodeError>;

    /// Start a service.
    async fn start_service(&self, service: ServiceId, sn: StorageNodeId) -> Result<(), NodeError>;

    /// Stop a service.
    async fn stop_service(&self, service: ServiceId, sn: StorageNodeId) -> Result<(), NodeError>;

    /// Query a service's status.
    async fn ping(&self, service: ServiceId, sn: StorageNodeId)
    -> Result<ServiceStatus, NodeError>;

    /// Copy a partition to another shard and switch ownership.
    async fn migrate_partition(
        &self,
        partition: PartitionId,
        source: RepGroupId,
        target: RepGroupId,
    ) -> Result<(), NodeError>;

    /// Push a service's parameters to the node hosting it.
    async fn push_params(
        &self,
        service: ServiceId,
        sn: StorageNodeId,
        params: &ParameterMap,
    ) -> Result<(), NodeError>;
}

/// Owner of the live topology pointer.
#[async_trait::async_trait]
pub trait TopologyCommitter: Send + Sync {
    /// Make the target topology stored for `plan` the live topology and
    /// return its new sequence number. Committing an already-committed
    /// target returns the current sequence.
    async fn commit(&self, plan: PlanId) -> Result<u64, NodeError>;

    /// Sequence number of the live topology.
    fn current_sequence(&self) -> u64;
}

/// Owner of the parameter store.
#[async_trait::async_trait]
pub trait ParameterSink: Send + Sync {
    /// Merge `params` into the stored parameters of `service`, returning
    /// the keys whose values changed.
    async fn record(
        &self,
        plan: PlanId,
        service: ServiceId,
        params: &ParameterMap,
    ) -> Result<Vec<String>, NodeError>;
}
