//! Named draft topologies.

use serde::{Deserialize, Serialize};

use reef_types::now_millis;

use crate::Topology;

/// A named, not-yet-deployed topology plus a log of how it was built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyCandidate {
    /// Unique candidate name.
    pub name: String,
    /// The draft.
    pub topology: Topology,
    /// Sequence of the live topology the draft was built from.
    pub base_sequence: u64,
    /// Human-readable change log, oldest first.
    pub log: Vec<String>,
    /// Creation time (Unix millis).
    pub created_at: u64,
}

impl TopologyCandidate {
    /// Wrap a topology as a candidate.
    pub fn new(name: impl Into<String>, topology: Topology) -> Self {
        Self {
            name: name.into(),
            base_sequence: topology.sequence,
            topology,
            log: Vec::new(),
            created_at: now_millis(),
        }
    }

    /// Whether the draft was built from the topology at `sequence`.
    pub fn is_based_on(&self, sequence: u64) -> bool {
        self.base_sequence == sequence
    }

    /// Append a change-log line.
    pub fn note(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }
}
