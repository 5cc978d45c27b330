//! Plan execution engine for Reef.
//!
//! This crate provides:
//!
//! - [`PlanManager`]: plan lifecycle operations over the durable plan store
//!   (create, approve, execute, await, cancel, interrupt), admin failover
//!   recovery and retention.
//! - [`LockManager`]: grants execution only to plans whose lock sets do not
//!   overlap a running plan's.
//! - [`Executor`]: runs a plan's tasks sequentially or in bounded parallel
//!   groups against the [`NodeControl`], [`TopologyCommitter`] and
//!   [`ParameterSink`] collaborators, retrying with [`RetryPolicy`].
//! - [`FaultHook`]: fault injection passed into the executor.

pub mod error;
pub mod executor;
pub mod fault;
pub mod lock;
pub mod manager;
pub mod node;
pub mod retry;

pub use error::{NodeError, PlanError};
pub use executor::Executor;
pub use fault::{FaultHook, NoFaults, OneShotFaults};
pub use lock::LockManager;
pub use manager::{PlanDraft, PlanManager};
pub use node::{NodeControl, ParameterSink, ServiceStatus, TopologyCommitter};
pub use retry::{ExecutorConfig, RetryPolicy};
