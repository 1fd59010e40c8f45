//! # Seqloom: Concurrent Sequence Execution Engine
//!
//! Seqloom executes user-defined sequences: directed graphs of typed
//! nodes describing function invocations, parallel splits and
//! synchronizations, variable assignments, and start/stop markers. A
//! sequence is declared in a YAML file; the runtime resolves node
//! functions and wrappers by name from a library linked into the host
//! binary and drives the graph to completion, honoring per-node
//! timeouts, transition conditions, parallel barriers, and read-only
//! variable rules.
//!
//! ## Core Concepts
//!
//! - **Nodes**: Typed vertices: `start`, `stop`, `function`, `variable`,
//!   `parallel_split`, `parallel_sync`
//! - **Transitions**: Directed edges with optional boolean condition
//!   expressions evaluated against the sequence variables
//! - **Variables**: A flat, scheduler-owned environment; function workers
//!   receive point-in-time snapshots
//! - **Wrappers**: Per-invocation `pre`/`post` hooks composed around
//!   function nodes in declaration order
//! - **Runner**: A single-threaded scheduler that dispatches nodes and
//!   joins concurrent function results over one channel
//!
//! ## Quick Start
//!
//! A sequence file:
//!
//! ```yaml
//! sequence:
//!   nodes:
//!     - id: 0
//!       type: start
//!       transitions:
//!         - target: 1
//!     - id: 1
//!       type: function
//!       function: hello
//!       return: greeting
//!       transitions:
//!         - target: 2
//!     - id: 2
//!       type: stop
//! ```
//!
//! Running it:
//!
//! ```no_run
//! use seqloom::registry::{FunctionLibrary, LibraryModule};
//! use seqloom::runner::SequenceRunner;
//! use seqloom::types::VarMap;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let library = FunctionLibrary::new().with_module(
//!     LibraryModule::new("demo").function("hello", |_kwargs| async move {
//!         Ok(json!("Hello world!"))
//!     }),
//! );
//!
//! let mut runner =
//!     SequenceRunner::from_path("hello.yaml", &library, VarMap::default())?;
//! runner.run().await?;
//!
//! assert_eq!(runner.variables()["greeting"], json!("Hello world!"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure Semantics
//!
//! Graph-level problems (unknown transition targets, writes to
//! read-only variables, no or too many winning transitions, unresolvable
//! function names) abort the run and surface from
//! [`runner::SequenceRunner::run`]. Failures *inside* user code, such as
//! function errors, panics, timeouts, and wrapper `pre`/`post` errors, are
//! captured in the per-node [`execution::FunctionNodeResult`] under
//! `variables["results"]` and the sequence keeps going; nodes flagged
//! `is_test` additionally fail the run at its end.
//!
//! ## Module Guide
//!
//! - [`sequence`] - Sequence file loading and graph validation
//! - [`nodes`] - Typed nodes and transition resolution
//! - [`expr`] - The expression grammar and evaluator
//! - [`registry`] - Function/wrapper libraries and name resolution
//! - [`wrappers`] - The per-invocation wrapper protocol
//! - [`execution`] - Isolated function execution and result records
//! - [`runner`] - The concurrent scheduler
//! - [`cli`] - Embeddable `check`/`run` command-line surface

pub mod cli;
pub mod execution;
pub mod expr;
pub mod nodes;
pub mod registry;
pub mod runner;
pub mod sequence;
pub mod telemetry;
pub mod types;
pub mod wrappers;
