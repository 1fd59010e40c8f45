//! Serde document model of the sequence description file.
//!
//! The file is YAML with a single `sequence` section. Shape checks happen
//! here through serde; graph invariants are enforced afterwards by
//! [`Sequence`](super::Sequence) construction.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;

use crate::types::NodeId;

#[derive(Debug, Deserialize)]
pub(crate) struct SequenceDoc {
    pub sequence: SequenceSection,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SequenceSection {
    #[serde(default)]
    pub info: Option<InfoSection>,
    #[serde(default)]
    pub constants: FxHashMap<String, Value>,
    pub nodes: Vec<NodeSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct InfoSection {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TransitionSpec {
    pub target: NodeId,
    #[serde(default)]
    pub condition: Option<String>,
}

/// A wrapper list entry: either a bare class name or a mapping from class
/// name(s) to constructor arguments. Declaration order is preserved.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum WrapperEntry {
    Name(String),
    WithArgs(IndexMap<String, FxHashMap<String, Value>>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum NodeSpec {
    Start {
        id: NodeId,
        #[serde(default)]
        name: Option<String>,
        transitions: Vec<TransitionSpec>,
    },
    Stop {
        id: NodeId,
        #[serde(default)]
        name: Option<String>,
        // Stop nodes are terminal; a transitions key is rejected during
        // invariant checks rather than silently dropped.
        #[serde(default)]
        transitions: Vec<TransitionSpec>,
    },
    Function {
        id: NodeId,
        #[serde(default)]
        name: Option<String>,
        transitions: Vec<TransitionSpec>,
        function: String,
        #[serde(default)]
        arguments: FxHashMap<String, Value>,
        #[serde(default)]
        timeout: Option<u64>,
        #[serde(default, rename = "return")]
        return_var: Option<String>,
        #[serde(default)]
        wrappers: Vec<WrapperEntry>,
        #[serde(default)]
        is_test: bool,
    },
    Variable {
        id: NodeId,
        #[serde(default)]
        name: Option<String>,
        transitions: Vec<TransitionSpec>,
        variables: IndexMap<String, Value>,
    },
    ParallelSplit {
        id: NodeId,
        #[serde(default)]
        name: Option<String>,
        transitions: Vec<TransitionSpec>,
    },
    ParallelSync {
        id: NodeId,
        #[serde(default)]
        name: Option<String>,
        transitions: Vec<TransitionSpec>,
    },
}

impl NodeSpec {
    pub(crate) fn id(&self) -> NodeId {
        match self {
            NodeSpec::Start { id, .. }
            | NodeSpec::Stop { id, .. }
            | NodeSpec::Function { id, .. }
            | NodeSpec::Variable { id, .. }
            | NodeSpec::ParallelSplit { id, .. }
            | NodeSpec::ParallelSync { id, .. } => *id,
        }
    }
}
