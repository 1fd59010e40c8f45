//! Expression evaluation for the seqloom sequence engine.
//!
//! A single primitive powers every dynamic value in a sequence: transition
//! conditions, function keyword arguments, wrapper constructor arguments,
//! and the right-hand sides of Variable nodes. An expression is an
//! ordinary string evaluated against the current variable environment:
//!
//! ```
//! use seqloom::expr::evaluate_str;
//! use rustc_hash::FxHashMap;
//! use serde_json::json;
//!
//! let mut vars = FxHashMap::default();
//! vars.insert("counter".to_string(), json!(4));
//!
//! assert_eq!(evaluate_str("counter + 1", &vars).unwrap(), json!(5));
//! assert_eq!(evaluate_str("counter < 10", &vars).unwrap(), json!(true));
//! assert_eq!(evaluate_str("'item ' + 'one'", &vars).unwrap(), json!("item one"));
//! ```
//!
//! The grammar covers literals (`null`, booleans, integers, floats,
//! quoted strings, lists), variable lookup, field access (`a.b`),
//! indexing (`a[0]`, `results[3]`), unary `-`/`!`, arithmetic,
//! comparisons, and short-circuiting `&&`/`||`.
//!
//! Evaluation never mutates the environment; callers hand in a reference
//! to a snapshot and receive an owned [`serde_json::Value`].

mod eval;
mod parser;

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::types::{Kwargs, VarMap};

pub use parser::{BinaryOp, Expr, UnaryOp};

/// Errors surfaced by expression parsing and evaluation.
///
/// Every variant carries the offending expression text so failures deep
/// inside a sequence stay attributable.
#[derive(Debug, Error, Diagnostic)]
pub enum ExprError {
    #[error("failed to parse expression `{expr}`: {message}")]
    #[diagnostic(
        code(seqloom::expr::parse),
        help("Expressions support literals, variables, `a.b` / `a[i]` access, arithmetic, comparisons and `&&`/`||`.")
    )]
    Parse { expr: String, message: String },

    #[error("failed to evaluate expression `{expr}`: {message}")]
    #[diagnostic(code(seqloom::expr::eval))]
    Eval { expr: String, message: String },

    #[error("condition `{expr}` did not evaluate to a boolean (got `{value}`)")]
    #[diagnostic(
        code(seqloom::expr::condition),
        help("Transition conditions must produce `true` or `false`.")
    )]
    NonBooleanCondition { expr: String, value: Value },
}

/// Evaluate an expression-or-literal against a variable environment.
///
/// Strings are parsed and evaluated as expressions; any other value is a
/// plain literal and is returned unchanged. To obtain an actual string
/// value, quote it inside the expression (`"'hello'"`).
pub fn evaluate(expr: &Value, variables: &VarMap) -> Result<Value, ExprError> {
    match expr {
        Value::String(s) => evaluate_str(s, variables),
        other => Ok(other.clone()),
    }
}

/// Parse and evaluate an expression string against a variable environment.
pub fn evaluate_str(expr: &str, variables: &VarMap) -> Result<Value, ExprError> {
    let parsed = parser::parse(expr).map_err(|message| ExprError::Parse {
        expr: expr.to_string(),
        message,
    })?;
    eval::eval(&parsed, variables).map_err(|fault| ExprError::Eval {
        expr: expr.to_string(),
        message: fault.to_string(),
    })
}

/// Evaluate every value of a keyword-argument mapping.
///
/// String values are evaluated as expressions, everything else passes
/// through, mirroring [`evaluate`].
pub fn evaluate_kwargs(kwargs: &Kwargs, variables: &VarMap) -> Result<Kwargs, ExprError> {
    let mut evaluated = Kwargs::default();
    for (name, value) in kwargs {
        evaluated.insert(name.clone(), evaluate(value, variables)?);
    }
    Ok(evaluated)
}

/// Evaluate a transition condition.
///
/// On top of [`evaluate_str`], requires the result to be a boolean;
/// anything else is a [`ExprError::NonBooleanCondition`].
pub fn evaluate_condition(expr: &str, variables: &VarMap) -> Result<bool, ExprError> {
    match evaluate_str(expr, variables)? {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::NonBooleanCondition {
            expr: expr.to_string(),
            value: other,
        }),
    }
}
