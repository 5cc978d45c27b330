//! Admin service for Reef.
//!
//! The [`Admin`] owns the live topology and parameter store
//! ([`AdminState`]) and the plan engine, and exposes:
//!
//! - plan builders, one `create_*_plan` per [`PlanKind`](reef_types::PlanKind),
//!   which turn a requested change into tasks, locks and a pinned target
//!   topology;
//! - plan control (approve, execute, await, cancel, interrupt, prune);
//! - topology candidates and storage node pools, driving the planner;
//! - configuration verification and repair.
//!
//! Opening an admin over an existing store recovers from a previous
//! admin's failure: plans it left running end up INTERRUPTED.

pub mod admin;
pub mod config;
pub mod error;
pub mod plans;
pub mod state;
mod tasks;
pub mod topology;

pub use admin::{Admin, Collaborators};
pub use config::AdminConfig;
pub use error::AdminError;
pub use plans::{StorageNodeSpec, ZoneSpec};
pub use state::AdminState;

#[cfg(test)]
mod tests;
