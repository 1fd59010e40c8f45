//! Typed sequence nodes and transition resolution.
//!
//! Nodes are stored in an arena keyed by [`NodeId`]; transitions are id
//! edges, never object references, so sequences may contain loops. Each
//! node variant carries only the state its kind needs: Function nodes
//! hold the invocation description, Variable nodes their assignment map,
//! ParallelSync nodes the barrier bookkeeping.

use indexmap::IndexMap;
use miette::Diagnostic;
use rustc_hash::FxHashSet;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::expr::{self, ExprError};
use crate::types::{Kwargs, NodeId, VarMap};
use crate::wrappers::WrapperSpec;

/// Discriminant of a node variant, used for routing and logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Start,
    Stop,
    ParallelSplit,
    ParallelSync,
    Variable,
    Function,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::ParallelSplit => write!(f, "parallel_split"),
            Self::ParallelSync => write!(f, "parallel_sync"),
            Self::Variable => write!(f, "variable"),
            Self::Function => write!(f, "function"),
        }
    }
}

/// A directed edge to another node, optionally guarded by a boolean
/// condition expression.
#[derive(Clone, Debug)]
pub struct Transition {
    pub target: NodeId,
    pub condition: Option<String>,
}

impl Transition {
    /// An absent condition counts as fulfilled.
    fn is_fulfilled(&self, variables: &VarMap) -> Result<bool, ExprError> {
        match &self.condition {
            None => Ok(true),
            Some(condition) => expr::evaluate_condition(condition, variables),
        }
    }
}

/// Failures of transition resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum TransitionError {
    /// Every non-Stop node must have at least one winning transition.
    #[error("node {nid} does not have any successful transition")]
    #[diagnostic(
        code(seqloom::nodes::no_transition),
        help("Check the transition conditions of the node; at least one must hold.")
    )]
    NoTransition { nid: NodeId },

    /// Only ParallelSplit nodes may fire more than one transition.
    #[error("node {nid} has several winning transition targets {targets:?} but only one may fire")]
    #[diagnostic(code(seqloom::nodes::multiple_transition))]
    MultipleTransition { nid: NodeId, targets: Vec<NodeId> },

    /// Condition evaluation failed or produced a non-boolean.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Condition(#[from] ExprError),
}

/// Barrier bookkeeping of a ParallelSync node.
///
/// `nodes_to_sync` is fixed from the graph-level inbound set when the
/// sequence is built; `history` accumulates the ids of the previous nodes
/// that already arrived in the current barrier instance and is cleared
/// on completion, so loops re-arm the barrier.
#[derive(Clone, Debug, Default)]
pub struct SyncState {
    pub nodes_to_sync: FxHashSet<NodeId>,
    pub history: FxHashSet<NodeId>,
}

impl SyncState {
    pub fn is_initialized(&self) -> bool {
        !self.nodes_to_sync.is_empty()
    }

    pub fn record_arrival(&mut self, previous: NodeId) {
        self.history.insert(previous);
    }

    pub fn is_complete(&self) -> bool {
        self.nodes_to_sync == self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

/// Invocation description carried by a Function node.
#[derive(Clone, Debug)]
pub struct FunctionBody {
    /// Name of the function, resolved through the registry.
    pub function: String,
    /// Keyword arguments as raw expression-or-literal values.
    pub kwargs: Kwargs,
    /// Timeout in seconds for the isolated execution.
    pub timeout: Option<u64>,
    /// Variable receiving the returned value, if any.
    pub return_var: Option<String>,
    /// Ordered wrapper stack instantiated around each invocation.
    pub wrappers: Vec<WrapperSpec>,
    /// Whether a non-success result fails the whole run at its end.
    pub is_test: bool,
}

/// The variant-specific payload of a node.
#[derive(Clone, Debug)]
pub enum NodeBody {
    Start,
    Stop,
    ParallelSplit,
    ParallelSync(SyncState),
    Variable {
        /// Ordered `name -> expression` assignments.
        assignments: IndexMap<String, Value>,
    },
    Function(FunctionBody),
}

/// A typed vertex of the sequence graph.
#[derive(Clone, Debug)]
pub struct SeqNode {
    pub nid: NodeId,
    pub name: Option<String>,
    pub transitions: Vec<Transition>,
    pub body: NodeBody,
}

impl SeqNode {
    /// The variant discriminant, used for routing and logging.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self.body {
            NodeBody::Start => NodeKind::Start,
            NodeBody::Stop => NodeKind::Stop,
            NodeBody::ParallelSplit => NodeKind::ParallelSplit,
            NodeBody::ParallelSync(_) => NodeKind::ParallelSync,
            NodeBody::Variable { .. } => NodeKind::Variable,
            NodeBody::Function(_) => NodeKind::Function,
        }
    }

    /// All ids reachable from this node, regardless of conditions.
    #[must_use]
    pub fn all_target_ids(&self) -> FxHashSet<NodeId> {
        self.transitions.iter().map(|t| t.target).collect()
    }

    /// Resolve the winning transitions against a variables snapshot.
    ///
    /// Returns the deduplicated targets of every transition whose
    /// condition is absent or holds. An empty winning set is a
    /// [`TransitionError::NoTransition`].
    pub fn winning_targets(&self, variables: &VarMap) -> Result<Vec<NodeId>, TransitionError> {
        let mut seen = FxHashSet::default();
        let mut targets = Vec::new();
        for transition in &self.transitions {
            if transition.is_fulfilled(variables)? && seen.insert(transition.target) {
                targets.push(transition.target);
            }
        }
        if targets.is_empty() {
            return Err(TransitionError::NoTransition { nid: self.nid });
        }
        Ok(targets)
    }

    /// Resolve transitions for a simple transitional node.
    ///
    /// Exactly one transition may win; more than one is a
    /// [`TransitionError::MultipleTransition`].
    pub fn next_single(&self, variables: &VarMap) -> Result<NodeId, TransitionError> {
        let targets = self.winning_targets(variables)?;
        match targets.as_slice() {
            [single] => Ok(*single),
            _ => Err(TransitionError::MultipleTransition {
                nid: self.nid,
                targets,
            }),
        }
    }
}
