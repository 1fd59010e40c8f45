//! Isolated execution of function nodes.
//!
//! Each Function activation runs in its own tokio task with a snapshot of
//! the sequence variables. User failures never cross into the engine:
//! returned errors, panics and timeouts are all folded into the
//! [`FunctionNodeResult`] delivered on the shared result channel, and the
//! scheduler keeps advancing the sequence.

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use crate::expr;
use crate::registry::{NodeFunction, WrapperFactory};
use crate::types::{Kwargs, NodeId, VarMap};
use crate::wrappers::{self, panic_message, WrapperFault, WrapperSpec};

/// Classification of a captured function failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionFaultKind {
    /// The user function returned an error or panicked.
    Error,
    /// Keyword-argument evaluation failed; the function was skipped.
    Arguments,
    /// Execution exceeded the node's timeout.
    Timeout,
}

/// A captured function failure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionFault {
    pub kind: FunctionFaultKind,
    pub message: String,
}

impl fmt::Display for FunctionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl FunctionFault {
    fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FunctionFaultKind::Error,
            message: message.into(),
        }
    }
}

/// The two failure slots of a node activation.
///
/// `function` holds failures of the user function itself (including
/// timeouts), `wrappers` the first failure of the wrapper protocol, with
/// pre-phase failures taking precedence over post-phase ones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExceptInfo {
    pub function: Option<FunctionFault>,
    pub wrappers: Option<WrapperFault>,
}

/// Outcome of one Function node activation.
///
/// Recorded by the scheduler under `variables["results"][<nid>]`, where
/// expressions can reach it: `results[3].returned`,
/// `results[3].exception == null`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionNodeResult {
    pub nid: NodeId,
    pub exception: Option<ExceptInfo>,
    pub returned: Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl FunctionNodeResult {
    /// A result with neither a function nor a wrapper failure.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exception.is_none()
    }
}

/// Everything a worker task needs to run one Function activation.
pub(crate) struct FunctionInvocation {
    pub nid: NodeId,
    pub function_name: String,
    pub callable: Arc<dyn NodeFunction>,
    pub kwargs: Kwargs,
    pub timeout: Option<Duration>,
    pub wrappers: Vec<(WrapperSpec, Arc<dyn WrapperFactory>)>,
}

/// Run one Function activation to completion.
///
/// `variables` is the worker's private snapshot; mutating it here never
/// touches the scheduler's environment.
pub(crate) async fn invoke(
    invocation: FunctionInvocation,
    mut variables: VarMap,
) -> FunctionNodeResult {
    let started_at = Utc::now();

    let (mut stack, pre_fault) =
        wrappers::run_pre_phase(&invocation.wrappers, &mut variables).await;

    // The function body only runs when the whole pre-phase succeeded.
    let (returned, function_fault) = if pre_fault.is_none() {
        match expr::evaluate_kwargs(&invocation.kwargs, &variables) {
            Err(err) => (
                Value::Null,
                Some(FunctionFault {
                    kind: FunctionFaultKind::Arguments,
                    message: err.to_string(),
                }),
            ),
            Ok(kwargs) => run_function(&invocation, kwargs).await,
        }
    } else {
        (Value::Null, None)
    };

    let post_fault = wrappers::run_post_phase(&mut stack).await;

    let wrapper_fault = pre_fault.or(post_fault);
    let exception = if function_fault.is_some() || wrapper_fault.is_some() {
        Some(ExceptInfo {
            function: function_fault,
            wrappers: wrapper_fault,
        })
    } else {
        None
    };

    FunctionNodeResult {
        nid: invocation.nid,
        exception,
        returned,
        started_at,
        finished_at: Utc::now(),
    }
}

async fn run_function(
    invocation: &FunctionInvocation,
    kwargs: Kwargs,
) -> (Value, Option<FunctionFault>) {
    let call = call_contained(invocation.callable.clone(), kwargs);
    match invocation.timeout {
        None => match call.await {
            Ok(value) => (value, None),
            Err(fault) => (Value::Null, Some(fault)),
        },
        Some(timeout) => match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => (value, None),
            Ok(Err(fault)) => (Value::Null, Some(fault)),
            Err(_) => (
                Value::Null,
                Some(FunctionFault {
                    kind: FunctionFaultKind::Timeout,
                    message: format!(
                        "function `{}` of node {} timed out after {}s",
                        invocation.function_name,
                        invocation.nid,
                        timeout.as_secs()
                    ),
                }),
            ),
        },
    }
}

async fn call_contained(
    callable: Arc<dyn NodeFunction>,
    kwargs: Kwargs,
) -> Result<Value, FunctionFault> {
    match AssertUnwindSafe(callable.call(kwargs)).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(FunctionFault::error(err.to_string())),
        Err(panic) => Err(FunctionFault::error(format!(
            "function panicked: {}",
            panic_message(&*panic)
        ))),
    }
}
