//! Shared types and identifiers for Reef.
//!
//! This crate defines the core vocabulary used across the Reef workspace:
//! resource identifiers ([`ZoneId`], [`StorageNodeId`], [`RepGroupId`],
//! [`RepNodeId`], [`ArbNodeId`], [`AdminId`], [`PartitionId`], [`PlanId`]),
//! the per-resource [`ParameterMap`], the persisted plan model
//! ([`plan::Plan`], [`plan::PlanState`], [`plan::TaskKind`]) and the
//! intra-process [`events::EventBus`].
//!
//! Every cross-reference between topology, plans and parameters is an
//! integer id into a map owned by one of the stores, never a pointer.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub mod events;
pub mod params;
pub mod plan;

pub use params::{ParamValue, ParameterMap};
pub use plan::{
    FailureKind, FailureRecord, InvalidTransition, LockSet, Plan, PlanKind, PlanState, ResultCode,
    Task, TaskKind, TaskState,
};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(u32);

        impl $name {
            /// Create an id from its numeric value.
            pub const fn new(n: u32) -> Self {
                Self(n)
            }

            /// Return the numeric value.
            pub const fn get(&self) -> u32 {
                self.0
            }
        }

        impl From<u32> for $name {
            fn from(n: u32) -> Self {
                Self(n)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

define_id!(
    /// Identifier for a zone (datacenter).
    ZoneId,
    "zn"
);

define_id!(
    /// Identifier for a storage node.
    StorageNodeId,
    "sn"
);

define_id!(
    /// Identifier for a replication group (shard).
    RepGroupId,
    "rg"
);

define_id!(
    /// Identifier for an admin service instance.
    AdminId,
    "admin"
);

define_id!(
    /// Identifier for a partition of the key space.
    PartitionId,
    "p"
);

/// Identifier for a replication node: `(shard, node number within shard)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RepNodeId {
    /// The shard this replica belongs to.
    pub group: RepGroupId,
    /// 1-based position within the shard.
    pub node_num: u32,
}

impl RepNodeId {
    /// Create a replication node id.
    pub const fn new(group: RepGroupId, node_num: u32) -> Self {
        Self { group, node_num }
    }
}

impl fmt::Display for RepNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-rn{}", self.group, self.node_num)
    }
}

impl fmt::Debug for RepNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RepNodeId({self})")
    }
}

/// Identifier for an arbiter node: `(shard, node number within shard)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ArbNodeId {
    /// The shard this arbiter votes for.
    pub group: RepGroupId,
    /// 1-based position among the shard's arbiters.
    pub node_num: u32,
}

impl ArbNodeId {
    /// Create an arbiter node id.
    pub const fn new(group: RepGroupId, node_num: u32) -> Self {
        Self { group, node_num }
    }
}

impl fmt::Display for ArbNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-an{}", self.group, self.node_num)
    }
}

impl fmt::Debug for ArbNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArbNodeId({self})")
    }
}

/// Monotonic identifier for a plan.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PlanId(u64);

impl PlanId {
    /// Create a plan id from its numeric value.
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// Return the numeric value.
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Key bytes for ordered storage (big-endian so byte order equals id order).
    pub fn to_key(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Inverse of [`PlanId::to_key`].
    pub fn from_key(key: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = key.get(..8)?.try_into().ok()?;
        Some(Self(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlanId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// Any service the admin can address on a storage node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum ServiceId {
    /// The storage node agent itself.
    StorageNode(StorageNodeId),
    /// A replication node.
    RepNode(RepNodeId),
    /// An arbiter node.
    ArbNode(ArbNodeId),
    /// An admin service.
    Admin(AdminId),
}

impl ServiceId {
    /// The shard this service belongs to, if any.
    pub fn shard(&self) -> Option<RepGroupId> {
        match self {
            ServiceId::RepNode(rn) => Some(rn.group),
            ServiceId::ArbNode(an) => Some(an.group),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceId::StorageNode(id) => write!(f, "{id}"),
            ServiceId::RepNode(id) => write!(f, "{id}"),
            ServiceId::ArbNode(id) => write!(f, "{id}"),
            ServiceId::Admin(id) => write!(f, "{id}"),
        }
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceId({self})")
    }
}

/// Whether a zone participates in master election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneType {
    /// Electable replicas; counts toward quorum.
    Primary,
    /// Read-only replicas; never elect a master.
    Secondary,
}

impl fmt::Display for ZoneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneType::Primary => f.write_str("PRIMARY"),
            ZoneType::Secondary => f.write_str("SECONDARY"),
        }
    }
}

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
