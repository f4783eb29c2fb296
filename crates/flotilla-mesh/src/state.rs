//! Per-(identity, env) reconciliation lifecycle
//!
//! Tracks how far each reconciliation key has progressed. Transitions are
//! monotone within one pass; a later event can move a Published key back
//! through Resolved, and a Drained key is revived by the next workload Add.

use serde::{Deserialize, Serialize};

/// Lifecycle of a reconciliation key
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum WorkloadState {
    /// Never seen
    #[default]
    Unknown,
    /// Seen, but not reconciled (warmup or read-only mode)
    Observed,
    /// ServiceEntry drafts were computed this pass
    Resolved,
    /// Mesh objects are written in the target clusters
    Published,
    /// All endpoints gone; SE and DR deleted everywhere
    Drained,
}

impl WorkloadState {
    /// A recognized workload event arrived but writes were suppressed
    pub fn observe(self) -> Self {
        match self {
            WorkloadState::Unknown | WorkloadState::Drained => WorkloadState::Observed,
            other => other,
        }
    }

    /// ServiceEntry drafts exist for this key
    pub fn resolve(self) -> Self {
        WorkloadState::Resolved
    }

    /// Mesh objects were committed
    pub fn publish(self) -> Self {
        WorkloadState::Published
    }

    /// The last endpoint disappeared and objects were deleted
    pub fn drain(self) -> Self {
        WorkloadState::Drained
    }

    /// Label value for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadState::Unknown => "unknown",
            WorkloadState::Observed => "observed",
            WorkloadState::Resolved => "resolved",
            WorkloadState::Published => "published",
            WorkloadState::Drained => "drained",
        }
    }
}
