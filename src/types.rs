//! Core types for the seqloom sequence engine.
//!
//! This module defines the fundamental types shared across the crate:
//! node identifiers, the variable environment, and the runner lifecycle
//! status. Domain-specific types live with their modules (nodes, results,
//! registry entries).

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a node within a sequence graph.
///
/// Identifiers come straight from the `id` field of the sequence file and
/// are validated for uniqueness when the [`Sequence`](crate::sequence::Sequence)
/// is built.
pub type NodeId = u64;

/// The variable environment of a running sequence.
///
/// A flat mapping from variable name to [`serde_json::Value`]. The same
/// shape is used for the live, scheduler-owned environment and for the
/// snapshots handed to function workers.
pub type VarMap = FxHashMap<String, serde_json::Value>;

/// Evaluated keyword arguments passed to node functions and wrapper
/// constructors.
pub type Kwargs = FxHashMap<String, serde_json::Value>;

/// Name of the built-in read-only variable holding per-node results.
pub const RESULTS_VAR: &str = "results";

/// Name of the per-invocation sub-mapping exposing wrapper `pre` returns.
pub const WRAPPERS_VAR: &str = "wrappers";

/// Lifecycle status of a [`SequenceRunner`](crate::runner::SequenceRunner).
///
/// The runner starts `Initialized`, is `Running` for the duration of
/// [`run`](crate::runner::SequenceRunner::run), and ends `Stopped` once the
/// frontier and the set of in-flight function nodes are both empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Initialized,
    Running,
    Stopped,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
