//! Per-invocation wrapper stacks around function nodes.
//!
//! A wrapper is a user object conforming to the [`NodeWrapper`] capability:
//! a `pre` hook that runs before the node function and a `post` hook that
//! runs after it, both no-ops by default. Wrappers provide cross-cutting
//! behavior scoped to a single node activation (timing, temp files, auth
//! setup and teardown) and compose in declaration order: the return value
//! of each `pre` is published under `variables["wrappers"][<name>]` so
//! later wrappers and the function itself can read it.
//!
//! Wrapper failures never abort the run. They are captured as
//! [`WrapperFault`] records inside the node result; a failure during
//! construction or `pre` skips the user function, and `post` only runs
//! for wrappers whose `pre` succeeded.

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::expr;
use crate::registry::WrapperFactory;
use crate::types::{Kwargs, VarMap, WRAPPERS_VAR};

/// Error type produced by user wrapper code.
pub type WrapperError = Box<dyn std::error::Error + Send + Sync>;

/// Capability implemented by node wrappers.
///
/// Both hooks default to no-ops, so a wrapper may implement only the side
/// it cares about.
///
/// # Examples
///
/// ```
/// use seqloom::wrappers::{NodeWrapper, WrapperError};
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
///
/// struct Timer {
///     label: String,
/// }
///
/// #[async_trait]
/// impl NodeWrapper for Timer {
///     async fn pre(&mut self) -> Result<Value, WrapperError> {
///         Ok(json!(format!("{} started", self.label)))
///     }
/// }
/// ```
#[async_trait]
pub trait NodeWrapper: Send + Sync {
    /// Runs before the node function; the returned value is exposed to
    /// subsequent wrappers and the function under
    /// `variables["wrappers"][<wrapper name>]`.
    async fn pre(&mut self) -> Result<Value, WrapperError> {
        Ok(Value::Null)
    }

    /// Runs after the node function (or after it was skipped).
    async fn post(&mut self) -> Result<(), WrapperError> {
        Ok(())
    }
}

/// One entry of a function node's wrapper stack: the wrapper name and the
/// raw constructor arguments (expression-or-literal values).
#[derive(Clone, Debug)]
pub struct WrapperSpec {
    pub name: String,
    pub kwargs: Kwargs,
}

/// The stage of the wrapper protocol in which a failure occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapperStage {
    /// Constructor-argument evaluation or wrapper construction.
    Init,
    Pre,
    Post,
}

impl fmt::Display for WrapperStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "initialization"),
            Self::Pre => write!(f, "pre"),
            Self::Post => write!(f, "post"),
        }
    }
}

/// A captured wrapper failure, recorded in the node result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WrapperFault {
    pub stage: WrapperStage,
    pub wrapper: String,
    pub message: String,
}

impl fmt::Display for WrapperFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wrapper `{}` failed during {}: {}",
            self.wrapper, self.stage, self.message
        )
    }
}

impl WrapperFault {
    fn new(stage: WrapperStage, wrapper: &str, message: impl Into<String>) -> Self {
        Self {
            stage,
            wrapper: wrapper.to_string(),
            message: message.into(),
        }
    }
}

/// Render a panic payload into a readable message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked without message".to_string()
    }
}

/// Wrappers constructed for one activation whose `pre` already ran
/// successfully, in declaration order.
pub(crate) type ActiveStack = Vec<(String, Box<dyn NodeWrapper>)>;

/// Run the pre-phase of a wrapper stack.
///
/// For each spec in order: evaluate its kwargs against `variables`
/// (including the accumulating `wrappers` sub-mapping), construct the
/// wrapper, run `pre`, and publish the return value. The first failure
/// stops the phase; the returned stack only contains wrappers whose `pre`
/// succeeded.
pub(crate) async fn run_pre_phase(
    specs: &[(WrapperSpec, Arc<dyn WrapperFactory>)],
    variables: &mut VarMap,
) -> (ActiveStack, Option<WrapperFault>) {
    variables.insert(WRAPPERS_VAR.to_string(), Value::Object(Default::default()));
    let mut stack: ActiveStack = Vec::with_capacity(specs.len());

    for (spec, factory) in specs {
        let kwargs = match expr::evaluate_kwargs(&spec.kwargs, variables) {
            Ok(kwargs) => kwargs,
            Err(err) => {
                return (
                    stack,
                    Some(WrapperFault::new(WrapperStage::Init, &spec.name, err.to_string())),
                );
            }
        };
        let mut wrapper = match factory.construct(kwargs) {
            Ok(wrapper) => wrapper,
            Err(err) => {
                return (
                    stack,
                    Some(WrapperFault::new(WrapperStage::Init, &spec.name, err.to_string())),
                );
            }
        };
        let pre_result = AssertUnwindSafe(wrapper.pre()).catch_unwind().await;
        let returned = match pre_result {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                return (
                    stack,
                    Some(WrapperFault::new(WrapperStage::Pre, &spec.name, err.to_string())),
                );
            }
            Err(panic) => {
                return (
                    stack,
                    Some(WrapperFault::new(
                        WrapperStage::Pre,
                        &spec.name,
                        panic_message(&*panic),
                    )),
                );
            }
        };
        if let Some(Value::Object(map)) = variables.get_mut(WRAPPERS_VAR) {
            map.insert(spec.name.clone(), returned);
        }
        stack.push((spec.name.clone(), wrapper));
    }

    (stack, None)
}

/// Run the post-phase over the wrappers whose `pre` succeeded.
///
/// Every wrapper gets its `post` attempted in declaration order; the
/// first failure is captured and returned.
pub(crate) async fn run_post_phase(stack: &mut ActiveStack) -> Option<WrapperFault> {
    let mut fault = None;
    for (name, wrapper) in stack.iter_mut() {
        let result = AssertUnwindSafe(wrapper.post()).catch_unwind().await;
        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(WrapperFault::new(WrapperStage::Post, name, err.to_string())),
            Err(panic) => Some(WrapperFault::new(
                WrapperStage::Post,
                name,
                panic_message(&*panic),
            )),
        };
        if fault.is_none() {
            fault = failure;
        }
    }
    fault
}
