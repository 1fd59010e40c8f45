//! The sequence scheduler.
//!
//! [`SequenceRunner`] owns the frontier of nodes to process next, the map
//! of in-flight function workers, and the live variable environment. The
//! main loop alternates between draining the frontier (non-function nodes
//! are handled synchronously, function nodes start an isolated worker)
//! and blocking on the single result channel all workers share. Only the
//! scheduler mutates shared state; workers receive snapshots and report
//! back exclusively through the channel, so no locking is needed around
//! the variables.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::instrument;
use uuid::Uuid;

use crate::execution::{self, FunctionInvocation, FunctionNodeResult};
use crate::expr::{self, ExprError};
use crate::nodes::{NodeBody, NodeKind, TransitionError};
use crate::registry::{FunctionLibrary, FunctionRegistry, RegistryError};
use crate::sequence::{Sequence, SequenceFileError};
use crate::types::{NodeId, RunStatus, VarMap, RESULTS_VAR};

/// Run-fatal errors surfaced to the caller of [`SequenceRunner::run`].
///
/// Function exceptions, timeouts and wrapper failures are *not* here:
/// they are captured in the per-node results and the run continues.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Sequence(#[from] SequenceFileError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Expr(#[from] ExprError),

    /// A Variable node assigned to a read-only name.
    #[error("node {nid} tries to modify variables {names:?} but they are read-only")]
    #[diagnostic(
        code(seqloom::runner::read_only),
        help("`results` and all constants are fixed for the whole run.")
    )]
    ReadOnly { nid: NodeId, names: Vec<String> },

    /// A barrier was entered without a recorded previous node.
    #[error("node {nid} entered a parallel sync barrier without a previous node")]
    #[diagnostic(code(seqloom::runner::previous_node_undefined))]
    PreviousNodeUndefined { nid: NodeId },

    /// A barrier was queried before its sync set was armed.
    #[error("cannot check synchronization for node {nid}: the set of nodes to synchronize is empty")]
    #[diagnostic(
        code(seqloom::runner::parallel_sync),
        help("A parallel_sync node needs at least one inbound transition.")
    )]
    ParallelSyncFailure { nid: NodeId },

    /// Internal arena lookup failure.
    #[error("sequence refers to unknown node {nid}")]
    #[diagnostic(code(seqloom::runner::unknown_node))]
    UnknownNode { nid: NodeId },

    #[error("failed to record the result of node {nid}: {message}")]
    #[diagnostic(code(seqloom::runner::result_encoding))]
    ResultEncoding { nid: NodeId, message: String },

    #[error("the result channel closed while function nodes were still running")]
    #[diagnostic(code(seqloom::runner::channel_closed))]
    ResultChannelClosed,

    /// At least one node flagged `is_test` produced a non-success result.
    #[error("test nodes {nids:?} did not succeed")]
    #[diagnostic(
        code(seqloom::runner::test_sequence_failed),
        help("Inspect `results[<nid>].exception` of the listed nodes.")
    )]
    TestSequenceFailed { nids: Vec<NodeId> },
}

/// A frontier entry: the node to process and the id of the node whose
/// transition activated it.
#[derive(Clone, Copy, Debug)]
struct NewNode {
    nid: NodeId,
    previous: Option<NodeId>,
}

/// Drives a [`Sequence`] to completion.
///
/// # Examples
///
/// ```no_run
/// use seqloom::registry::{FunctionLibrary, LibraryModule};
/// use seqloom::runner::SequenceRunner;
/// use seqloom::types::VarMap;
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let library = FunctionLibrary::new().with_module(
///     LibraryModule::new("demo").function("hello", |_| async move {
///         Ok(json!("Hello world!"))
///     }),
/// );
///
/// let mut runner =
///     SequenceRunner::from_path("demo.yaml", &library, VarMap::default())?;
/// runner.run().await?;
///
/// println!("{:?}", runner.variables());
/// # Ok(())
/// # }
/// ```
pub struct SequenceRunner {
    run_id: Uuid,
    sequence: Sequence,
    registry: FunctionRegistry,
    variables: VarMap,
    read_only: FxHashSet<String>,
    results: FxHashMap<NodeId, FunctionNodeResult>,
    new_nodes: Vec<NewNode>,
    running_nodes: FxHashMap<NodeId, JoinHandle<()>>,
    result_tx: flume::Sender<FunctionNodeResult>,
    result_rx: flume::Receiver<FunctionNodeResult>,
    failed_tests: Vec<NodeId>,
    status: RunStatus,
}

impl std::fmt::Debug for SequenceRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceRunner")
            .field("run_id", &self.run_id)
            .field("sequence", &self.sequence)
            .field("variables", &self.variables)
            .field("read_only", &self.read_only)
            .field("results", &self.results)
            .field("new_nodes", &self.new_nodes)
            .field("failed_tests", &self.failed_tests)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl SequenceRunner {
    /// Build a runner for an already loaded sequence.
    ///
    /// Resolves every function and wrapper name the sequence references
    /// against `library`, fixes the read-only name set
    /// (`results` ∪ sequence constants ∪ `constants`), and seeds the
    /// frontier with the start nodes.
    pub fn new(
        sequence: Sequence,
        library: &FunctionLibrary,
        constants: VarMap,
    ) -> Result<Self, RunnerError> {
        let mut read_only: FxHashSet<String> = FxHashSet::default();
        read_only.insert(RESULTS_VAR.to_string());
        read_only.extend(sequence.constants().keys().cloned());
        read_only.extend(constants.keys().cloned());

        let mut variables = VarMap::default();
        variables.extend(constants);
        variables.extend(
            sequence
                .constants()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        variables.insert(RESULTS_VAR.to_string(), Value::Object(Default::default()));

        let mut registry = FunctionRegistry::default();
        registry.register_functions(library, &sequence.function_names())?;
        registry.register_wrappers(library, &sequence.wrapper_names())?;

        let new_nodes = sequence
            .start_ids()
            .iter()
            .map(|&nid| NewNode {
                nid,
                previous: None,
            })
            .collect();

        let (result_tx, result_rx) = flume::unbounded();

        let runner = Self {
            run_id: Uuid::new_v4(),
            sequence,
            registry,
            variables,
            read_only,
            results: FxHashMap::default(),
            new_nodes,
            running_nodes: FxHashMap::default(),
            result_tx,
            result_rx,
            failed_tests: Vec::new(),
            status: RunStatus::Initialized,
        };
        tracing::info!(
            run_id = %runner.run_id,
            sequence = runner.sequence.name().unwrap_or("unnamed"),
            "sequence runner initialized"
        );
        Ok(runner)
    }

    /// Load a sequence file and build a runner for it.
    pub fn from_path(
        path: impl AsRef<Path>,
        library: &FunctionLibrary,
        constants: VarMap,
    ) -> Result<Self, RunnerError> {
        let sequence = Sequence::from_path(path)?;
        Self::new(sequence, library, constants)
    }

    /// Run the sequence to completion.
    ///
    /// Returns once the frontier and the set of running function nodes
    /// are both empty. Graph-level failures abort immediately; function
    /// and wrapper failures are recorded in `results` and the run
    /// continues. If any `is_test` node produced a non-success result,
    /// the run finishes normally and then reports
    /// [`RunnerError::TestSequenceFailed`].
    #[instrument(skip(self), fields(run_id = %self.run_id), err)]
    pub async fn run(&mut self) -> Result<(), RunnerError> {
        self.status = RunStatus::Running;
        tracing::info!("run started");

        while !self.new_nodes.is_empty() || !self.running_nodes.is_empty() {
            while let Some(entry) = self.new_nodes.pop() {
                self.dispatch(entry)?;
            }

            if !self.running_nodes.is_empty() {
                tracing::debug!(
                    running = self.running_nodes.len(),
                    "waiting for a function node result"
                );
                let result = self
                    .result_rx
                    .recv_async()
                    .await
                    .map_err(|_| RunnerError::ResultChannelClosed)?;
                self.handle_result(result)?;
            }
        }

        self.status = RunStatus::Stopped;
        if !self.failed_tests.is_empty() {
            let mut nids = std::mem::take(&mut self.failed_tests);
            nids.sort_unstable();
            return Err(RunnerError::TestSequenceFailed { nids });
        }
        tracing::info!("run finished");
        Ok(())
    }

    /// The live variable environment.
    #[must_use]
    pub fn variables(&self) -> &VarMap {
        &self.variables
    }

    /// Result of a completed function node, if any.
    #[must_use]
    pub fn result(&self, nid: NodeId) -> Option<&FunctionNodeResult> {
        self.results.get(&nid)
    }

    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    #[must_use]
    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    fn node(&self, nid: NodeId) -> Result<&crate::nodes::SeqNode, RunnerError> {
        self.sequence
            .node(nid)
            .ok_or(RunnerError::UnknownNode { nid })
    }

    fn push_new(&mut self, nid: NodeId, previous: Option<NodeId>) {
        self.new_nodes.push(NewNode { nid, previous });
    }

    fn dispatch(&mut self, entry: NewNode) -> Result<(), RunnerError> {
        let NewNode { nid, previous } = entry;
        match self.node(nid)?.kind() {
            NodeKind::Start => self.dispatch_start(nid),
            NodeKind::Stop => {
                tracing::info!(nid, kind = "stop", "node engaged, branch terminated");
                Ok(())
            }
            NodeKind::ParallelSplit => self.dispatch_split(nid),
            NodeKind::ParallelSync => self.dispatch_sync(nid, previous),
            NodeKind::Variable => self.dispatch_variable(nid),
            NodeKind::Function => self.dispatch_function(nid),
        }
    }

    fn dispatch_start(&mut self, nid: NodeId) -> Result<(), RunnerError> {
        let next = self.node(nid)?.next_single(&self.variables)?;
        tracing::info!(nid, kind = "start", next, "node engaged");
        self.push_new(next, None);
        Ok(())
    }

    fn dispatch_split(&mut self, nid: NodeId) -> Result<(), RunnerError> {
        let targets = self.node(nid)?.winning_targets(&self.variables)?;
        tracing::info!(nid, kind = "parallel_split", ?targets, "node engaged");
        for target in targets {
            self.push_new(target, Some(nid));
        }
        Ok(())
    }

    fn dispatch_sync(&mut self, nid: NodeId, previous: Option<NodeId>) -> Result<(), RunnerError> {
        let previous = previous.ok_or(RunnerError::PreviousNodeUndefined { nid })?;
        let complete = {
            let node = self
                .sequence
                .node_mut(nid)
                .ok_or(RunnerError::UnknownNode { nid })?;
            let NodeBody::ParallelSync(state) = &mut node.body else {
                unreachable!("dispatch_sync is only routed parallel_sync nodes");
            };
            if !state.is_initialized() {
                return Err(RunnerError::ParallelSyncFailure { nid });
            }
            state.record_arrival(previous);
            state.is_complete()
        };

        if !complete {
            tracing::info!(nid, kind = "parallel_sync", "synchronization not complete yet");
            return Ok(());
        }

        if let Some(node) = self.sequence.node_mut(nid) {
            if let NodeBody::ParallelSync(state) = &mut node.body {
                state.clear_history();
            }
        }
        let next = self.node(nid)?.next_single(&self.variables)?;
        tracing::info!(
            nid,
            kind = "parallel_sync",
            next,
            "synchronization complete"
        );
        self.push_new(next, Some(nid));
        Ok(())
    }

    fn dispatch_variable(&mut self, nid: NodeId) -> Result<(), RunnerError> {
        let assignments = {
            let NodeBody::Variable { assignments } = &self.node(nid)?.body else {
                unreachable!("dispatch_variable is only routed variable nodes");
            };
            assignments.clone()
        };

        let mut illegal: Vec<String> = assignments
            .keys()
            .filter(|name| self.read_only.contains(*name))
            .cloned()
            .collect();
        if !illegal.is_empty() {
            illegal.sort_unstable();
            return Err(RunnerError::ReadOnly {
                nid,
                names: illegal,
            });
        }

        for (name, raw) in &assignments {
            let value = expr::evaluate(raw, &self.variables)?;
            self.variables.insert(name.clone(), value);
        }

        let next = self.node(nid)?.next_single(&self.variables)?;
        tracing::info!(nid, kind = "variable", next, "node engaged");
        self.push_new(next, Some(nid));
        Ok(())
    }

    fn dispatch_function(&mut self, nid: NodeId) -> Result<(), RunnerError> {
        let body = {
            let NodeBody::Function(body) = &self.node(nid)?.body else {
                unreachable!("dispatch_function is only routed function nodes");
            };
            body.clone()
        };

        let callable = self.registry.function(&body.function)?;
        let factories = self
            .registry
            .wrappers(body.wrappers.iter().map(|w| w.name.as_str()))?;
        let wrappers = body
            .wrappers
            .into_iter()
            .map(|spec| {
                let factory = factories[&spec.name].clone();
                (spec, factory)
            })
            .collect();

        let invocation = FunctionInvocation {
            nid,
            function_name: body.function.clone(),
            callable,
            kwargs: body.kwargs,
            timeout: body.timeout.map(Duration::from_secs),
            wrappers,
        };

        // Workers get a point-in-time snapshot; the live environment stays
        // scheduler-owned.
        let snapshot = self.variables.clone();
        let result_tx = self.result_tx.clone();
        let handle = tokio::spawn(async move {
            let result = execution::invoke(invocation, snapshot).await;
            let _ = result_tx.send_async(result).await;
        });
        self.running_nodes.insert(nid, handle);
        tracing::info!(
            nid,
            kind = "function",
            function = %body.function,
            "node engaged, worker started"
        );
        Ok(())
    }

    fn handle_result(&mut self, result: FunctionNodeResult) -> Result<(), RunnerError> {
        let nid = result.nid;
        self.running_nodes.remove(&nid);

        let (is_test, return_var) = {
            let NodeBody::Function(body) = &self.node(nid)?.body else {
                unreachable!("results only come from function nodes");
            };
            (body.is_test, body.return_var.clone())
        };

        if is_test && !result.is_success() {
            self.failed_tests.push(nid);
        }

        let encoded =
            serde_json::to_value(&result).map_err(|err| RunnerError::ResultEncoding {
                nid,
                message: err.to_string(),
            })?;
        if let Some(Value::Object(map)) = self.variables.get_mut(RESULTS_VAR) {
            map.insert(nid.to_string(), encoded);
        }
        if let Some(name) = return_var {
            self.variables.insert(name, result.returned.clone());
        }
        tracing::info!(nid, success = result.is_success(), "function node terminated");
        self.results.insert(nid, result);

        let next = self.node(nid)?.next_single(&self.variables)?;
        self.push_new(next, Some(nid));
        Ok(())
    }
}
