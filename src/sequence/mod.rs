//! Sequence loading and graph validation.
//!
//! A [`Sequence`] is the validated, in-memory form of a sequence file:
//! an arena of typed nodes keyed by id, the named constants, the set of
//! start nodes, and the graph-level inbound map used to arm parallel-sync
//! barriers. Construction enforces the graph invariants, so a `Sequence`
//! handed to the runner is structurally sound:
//!
//! 1. node ids are unique;
//! 2. every transition target exists;
//! 3. no transition targets a start node;
//! 4. stop nodes have no outgoing transitions;
//! 5. every non-stop node has at least one outgoing transition;
//! 6. there is at least one start node;
//! 7. every parallel-sync barrier is armed with its inbound neighbor set.

mod schema;

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

use crate::nodes::{FunctionBody, NodeBody, SeqNode, SyncState, Transition};
use crate::types::NodeId;
use crate::wrappers::WrapperSpec;
use schema::{NodeSpec, SequenceDoc, TransitionSpec, WrapperEntry};

/// Violations of the sequence file schema or graph invariants.
#[derive(Debug, Error, Diagnostic)]
pub enum SequenceFileError {
    #[error("cannot read sequence file `{path}`")]
    #[diagnostic(code(seqloom::sequence::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sequence file is not valid: {0}")]
    #[diagnostic(
        code(seqloom::sequence::schema),
        help("Check the structure of the sequence file against the documented shape.")
    )]
    Schema(#[from] serde_yaml::Error),

    #[error("node id {nid} is used more than once")]
    #[diagnostic(code(seqloom::sequence::duplicate_id))]
    DuplicateNodeId { nid: NodeId },

    #[error("node {nid} has a transition to nonexistent node {target}")]
    #[diagnostic(code(seqloom::sequence::unknown_target))]
    UnknownTarget { nid: NodeId, target: NodeId },

    #[error("node {nid} has a transition leading to start node {target}")]
    #[diagnostic(
        code(seqloom::sequence::transition_to_start),
        help("Start nodes seed the run and cannot be re-entered.")
    )]
    TransitionToStart { nid: NodeId, target: NodeId },

    #[error("stop node {nid} must not have outgoing transitions")]
    #[diagnostic(code(seqloom::sequence::stop_with_transitions))]
    StopWithTransitions { nid: NodeId },

    #[error("node {nid} must have at least one outgoing transition")]
    #[diagnostic(code(seqloom::sequence::missing_transitions))]
    MissingTransitions { nid: NodeId },

    #[error("the sequence does not contain any start node")]
    #[diagnostic(code(seqloom::sequence::no_start_node))]
    NoStartNode,
}

/// A validated sequence graph.
#[derive(Debug)]
pub struct Sequence {
    name: Option<String>,
    nodes: FxHashMap<NodeId, SeqNode>,
    constants: FxHashMap<String, Value>,
    start_ids: Vec<NodeId>,
    inbound: FxHashMap<NodeId, FxHashSet<NodeId>>,
}

impl Sequence {
    /// Load and validate a sequence from a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SequenceFileError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| SequenceFileError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&contents)
    }

    /// Load and validate a sequence from YAML text.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(yaml: &str) -> Result<Self, SequenceFileError> {
        let doc: SequenceDoc = serde_yaml::from_str(yaml)?;
        Self::from_doc(doc)
    }

    /// Validate a sequence file without keeping the graph.
    pub fn check_file(path: impl AsRef<Path>) -> Result<(), SequenceFileError> {
        Self::from_path(path).map(|_| ())
    }

    /// Validate sequence YAML text without keeping the graph.
    pub fn check_str(yaml: &str) -> Result<(), SequenceFileError> {
        Self::from_str(yaml).map(|_| ())
    }

    fn from_doc(doc: SequenceDoc) -> Result<Self, SequenceFileError> {
        let name = doc.sequence.info.and_then(|info| info.name);
        let constants = doc.sequence.constants;

        let mut nodes: FxHashMap<NodeId, SeqNode> = FxHashMap::default();
        for spec in doc.sequence.nodes {
            let nid = spec.id();
            if nodes.insert(nid, build_node(spec)).is_some() {
                return Err(SequenceFileError::DuplicateNodeId { nid });
            }
        }

        let mut start_ids: Vec<NodeId> = nodes
            .values()
            .filter(|n| matches!(n.body, NodeBody::Start))
            .map(|n| n.nid)
            .collect();
        start_ids.sort_unstable();
        if start_ids.is_empty() {
            return Err(SequenceFileError::NoStartNode);
        }

        for node in nodes.values() {
            match node.body {
                NodeBody::Stop => {
                    if !node.transitions.is_empty() {
                        return Err(SequenceFileError::StopWithTransitions { nid: node.nid });
                    }
                }
                _ => {
                    if node.transitions.is_empty() {
                        return Err(SequenceFileError::MissingTransitions { nid: node.nid });
                    }
                }
            }
            for transition in &node.transitions {
                let Some(target) = nodes.get(&transition.target) else {
                    return Err(SequenceFileError::UnknownTarget {
                        nid: node.nid,
                        target: transition.target,
                    });
                };
                if matches!(target.body, NodeBody::Start) {
                    return Err(SequenceFileError::TransitionToStart {
                        nid: node.nid,
                        target: transition.target,
                    });
                }
            }
        }

        let mut inbound: FxHashMap<NodeId, FxHashSet<NodeId>> = FxHashMap::default();
        for node in nodes.values() {
            for target in node.all_target_ids() {
                inbound.entry(target).or_default().insert(node.nid);
            }
        }

        // Arm every barrier with its graph-level inbound set.
        let sync_ids: Vec<NodeId> = nodes
            .values()
            .filter(|n| matches!(n.body, NodeBody::ParallelSync(_)))
            .map(|n| n.nid)
            .collect();
        for nid in sync_ids {
            let sources = inbound.get(&nid).cloned().unwrap_or_default();
            if let Some(node) = nodes.get_mut(&nid) {
                if let NodeBody::ParallelSync(state) = &mut node.body {
                    state.nodes_to_sync = sources;
                }
            }
        }

        Ok(Self {
            name,
            nodes,
            constants,
            start_ids,
            inbound,
        })
    }

    /// Display name from the `info` section, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Named read-only constants declared in the file.
    #[must_use]
    pub fn constants(&self) -> &FxHashMap<String, Value> {
        &self.constants
    }

    /// Ids of all start nodes.
    #[must_use]
    pub fn start_ids(&self) -> &[NodeId] {
        &self.start_ids
    }

    /// Ids of all nodes that can transition into the given node.
    #[must_use]
    pub fn prev_node_ids(&self, nid: NodeId) -> FxHashSet<NodeId> {
        self.inbound.get(&nid).cloned().unwrap_or_default()
    }

    /// Names of every function referenced by function nodes.
    #[must_use]
    pub fn function_names(&self) -> FxHashSet<String> {
        self.nodes
            .values()
            .filter_map(|n| match &n.body {
                NodeBody::Function(body) => Some(body.function.clone()),
                _ => None,
            })
            .collect()
    }

    /// Names of every wrapper referenced by function nodes.
    #[must_use]
    pub fn wrapper_names(&self) -> FxHashSet<String> {
        let mut names = FxHashSet::default();
        for node in self.nodes.values() {
            if let NodeBody::Function(body) = &node.body {
                names.extend(body.wrappers.iter().map(|w| w.name.clone()));
            }
        }
        names
    }

    #[must_use]
    pub fn node(&self, nid: NodeId) -> Option<&SeqNode> {
        self.nodes.get(&nid)
    }

    pub(crate) fn node_mut(&mut self, nid: NodeId) -> Option<&mut SeqNode> {
        self.nodes.get_mut(&nid)
    }

    /// Number of nodes in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn build_transitions(specs: Vec<TransitionSpec>) -> Vec<Transition> {
    specs
        .into_iter()
        .map(|t| Transition {
            target: t.target,
            condition: t.condition,
        })
        .collect()
}

fn build_wrappers(entries: Vec<WrapperEntry>) -> Vec<WrapperSpec> {
    let mut specs = Vec::new();
    for entry in entries {
        match entry {
            WrapperEntry::Name(name) => specs.push(WrapperSpec {
                name,
                kwargs: Default::default(),
            }),
            WrapperEntry::WithArgs(map) => {
                for (name, kwargs) in map {
                    specs.push(WrapperSpec { name, kwargs });
                }
            }
        }
    }
    specs
}

fn build_node(spec: NodeSpec) -> SeqNode {
    match spec {
        NodeSpec::Start {
            id,
            name,
            transitions,
        } => SeqNode {
            nid: id,
            name,
            transitions: build_transitions(transitions),
            body: NodeBody::Start,
        },
        NodeSpec::Stop {
            id,
            name,
            transitions,
        } => SeqNode {
            nid: id,
            name,
            transitions: build_transitions(transitions),
            body: NodeBody::Stop,
        },
        NodeSpec::ParallelSplit {
            id,
            name,
            transitions,
        } => SeqNode {
            nid: id,
            name,
            transitions: build_transitions(transitions),
            body: NodeBody::ParallelSplit,
        },
        NodeSpec::ParallelSync {
            id,
            name,
            transitions,
        } => SeqNode {
            nid: id,
            name,
            transitions: build_transitions(transitions),
            body: NodeBody::ParallelSync(SyncState::default()),
        },
        NodeSpec::Variable {
            id,
            name,
            transitions,
            variables,
        } => SeqNode {
            nid: id,
            name,
            transitions: build_transitions(transitions),
            body: NodeBody::Variable {
                assignments: variables,
            },
        },
        NodeSpec::Function {
            id,
            name,
            transitions,
            function,
            arguments,
            timeout,
            return_var,
            wrappers,
            is_test,
        } => SeqNode {
            nid: id,
            name,
            transitions: build_transitions(transitions),
            body: NodeBody::Function(FunctionBody {
                function,
                kwargs: arguments,
                timeout,
                return_var,
                wrappers: build_wrappers(wrappers),
                is_test,
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
sequence:
  info:
    name: minimal
  nodes:
    - id: 0
      type: start
      transitions:
        - target: 1
    - id: 1
      type: stop
"#;

    #[test]
    fn loads_a_minimal_sequence() {
        let seq = Sequence::from_str(MINIMAL).unwrap();
        assert_eq!(seq.name(), Some("minimal"));
        assert_eq!(seq.start_ids(), &[0]);
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.node(1).unwrap().kind(), crate::nodes::NodeKind::Stop);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let yaml = r#"
sequence:
  nodes:
    - id: 0
      type: start
      transitions: [{target: 0}]
    - id: 0
      type: stop
"#;
        assert!(matches!(
            Sequence::from_str(yaml),
            Err(SequenceFileError::DuplicateNodeId { nid: 0 })
        ));
    }

    #[test]
    fn rejects_unknown_transition_targets() {
        let yaml = r#"
sequence:
  nodes:
    - id: 0
      type: start
      transitions: [{target: 99}]
    - id: 1
      type: stop
"#;
        assert!(matches!(
            Sequence::from_str(yaml),
            Err(SequenceFileError::UnknownTarget { nid: 0, target: 99 })
        ));
    }

    #[test]
    fn rejects_transitions_into_start_nodes() {
        let yaml = r#"
sequence:
  nodes:
    - id: 0
      type: start
      transitions: [{target: 1}]
    - id: 1
      type: variable
      variables: {x: "1"}
      transitions: [{target: 0}]
"#;
        assert!(matches!(
            Sequence::from_str(yaml),
            Err(SequenceFileError::TransitionToStart { nid: 1, target: 0 })
        ));
    }

    #[test]
    fn rejects_stop_nodes_with_transitions() {
        let yaml = r#"
sequence:
  nodes:
    - id: 0
      type: start
      transitions: [{target: 1}]
    - id: 1
      type: stop
      transitions: [{target: 0}]
"#;
        assert!(matches!(
            Sequence::from_str(yaml),
            Err(SequenceFileError::StopWithTransitions { nid: 1 })
        ));
    }

    #[test]
    fn rejects_transitional_nodes_without_transitions() {
        // The transitions key is required by the schema for non-stop nodes.
        let yaml = r#"
sequence:
  nodes:
    - id: 0
      type: start
    - id: 1
      type: stop
"#;
        assert!(matches!(
            Sequence::from_str(yaml),
            Err(SequenceFileError::Schema(_))
        ));
    }

    #[test]
    fn rejects_sequences_without_start_nodes() {
        let yaml = r#"
sequence:
  nodes:
    - id: 1
      type: stop
"#;
        assert!(matches!(
            Sequence::from_str(yaml),
            Err(SequenceFileError::NoStartNode)
        ));
    }

    #[test]
    fn arms_barriers_with_inbound_sets() {
        let yaml = r#"
sequence:
  nodes:
    - id: 0
      type: start
      transitions: [{target: 1}]
    - id: 1
      type: parallel_split
      transitions:
        - target: 2
        - target: 3
    - id: 2
      type: variable
      variables: {a: "1"}
      transitions: [{target: 4}]
    - id: 3
      type: variable
      variables: {b: "2"}
      transitions: [{target: 4}]
    - id: 4
      type: parallel_sync
      transitions: [{target: 5}]
    - id: 5
      type: stop
"#;
        let seq = Sequence::from_str(yaml).unwrap();
        let expected: FxHashSet<NodeId> = [2, 3].into_iter().collect();
        assert_eq!(seq.prev_node_ids(4), expected);
        match &seq.node(4).unwrap().body {
            NodeBody::ParallelSync(state) => assert_eq!(state.nodes_to_sync, expected),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn collects_function_and_wrapper_names() {
        let yaml = r#"
sequence:
  nodes:
    - id: 0
      type: start
      transitions: [{target: 1}]
    - id: 1
      type: function
      function: fetch
      wrappers:
        - Timer
        - Authenticate: {token: "'secret'"}
      transitions: [{target: 2}]
    - id: 2
      type: stop
"#;
        let seq = Sequence::from_str(yaml).unwrap();
        assert!(seq.function_names().contains("fetch"));
        let wrappers = seq.wrapper_names();
        assert!(wrappers.contains("Timer"));
        assert!(wrappers.contains("Authenticate"));
        // Order of the wrapper stack is preserved from the file.
        match &seq.node(1).unwrap().body {
            NodeBody::Function(body) => {
                let order: Vec<&str> = body.wrappers.iter().map(|w| w.name.as_str()).collect();
                assert_eq!(order, ["Timer", "Authenticate"]);
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }
}
