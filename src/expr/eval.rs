//! Evaluation of parsed expressions against a variable environment.

use serde_json::Value;
use std::fmt;

use super::parser::{BinaryOp, Expr, UnaryOp};
use crate::types::VarMap;

/// An evaluation failure, reported without the expression text.
///
/// The public API wraps this into [`ExprError::Eval`](super::ExprError)
/// together with the offending expression.
#[derive(Debug)]
pub(crate) enum EvalFault {
    UnknownVariable(String),
    UnknownField(String),
    OutOfBounds(usize),
    DivisionByZero,
    Overflow,
    Type(String),
}

impl fmt::Display for EvalFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownVariable(name) => write!(f, "unknown variable `{name}`"),
            Self::UnknownField(name) => write!(f, "no field `{name}`"),
            Self::OutOfBounds(idx) => write!(f, "index {idx} out of bounds"),
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::Overflow => write!(f, "integer overflow"),
            Self::Type(msg) => write!(f, "{msg}"),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

pub(crate) fn eval(expr: &Expr, vars: &VarMap) -> Result<Value, EvalFault> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(name) => vars
            .get(name)
            .cloned()
            .ok_or_else(|| EvalFault::UnknownVariable(name.clone())),
        Expr::List(items) => {
            let values = items
                .iter()
                .map(|item| eval(item, vars))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(values))
        }
        Expr::Field(base, field) => match eval(base, vars)? {
            Value::Object(map) => map
                .get(field)
                .cloned()
                .ok_or_else(|| EvalFault::UnknownField(field.clone())),
            other => Err(EvalFault::Type(format!(
                "cannot access field `{field}` of {}",
                type_name(&other)
            ))),
        },
        Expr::Index(base, index) => {
            let base = eval(base, vars)?;
            let index = eval(index, vars)?;
            index_value(base, index)
        }
        Expr::Unary(op, inner) => {
            let value = eval(inner, vars)?;
            unary(*op, value)
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => match eval(lhs, vars)? {
            Value::Bool(false) => Ok(Value::Bool(false)),
            Value::Bool(true) => expect_bool(eval(rhs, vars)?, "&&"),
            other => Err(non_bool_operand("&&", &other)),
        },
        Expr::Binary(BinaryOp::Or, lhs, rhs) => match eval(lhs, vars)? {
            Value::Bool(true) => Ok(Value::Bool(true)),
            Value::Bool(false) => expect_bool(eval(rhs, vars)?, "||"),
            other => Err(non_bool_operand("||", &other)),
        },
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, vars)?;
            let rhs = eval(rhs, vars)?;
            binary(*op, lhs, rhs)
        }
    }
}

fn expect_bool(value: Value, op: &str) -> Result<Value, EvalFault> {
    match value {
        Value::Bool(_) => Ok(value),
        other => Err(non_bool_operand(op, &other)),
    }
}

fn non_bool_operand(op: &str, value: &Value) -> EvalFault {
    EvalFault::Type(format!("`{op}` requires booleans, got {}", type_name(value)))
}

fn index_value(base: Value, index: Value) -> Result<Value, EvalFault> {
    match (&base, &index) {
        (Value::Array(items), Value::Number(n)) => {
            let idx = n
                .as_u64()
                .ok_or_else(|| EvalFault::Type("list index must be a non-negative integer".into()))?
                as usize;
            items
                .get(idx)
                .cloned()
                .ok_or(EvalFault::OutOfBounds(idx))
        }
        (Value::Object(map), Value::String(key)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| EvalFault::UnknownField(key.clone())),
        // Integer keys address object entries by their decimal form; this is
        // how `results[<nid>]` reaches per-node result records.
        (Value::Object(map), Value::Number(n)) => {
            let key = n.to_string();
            map.get(&key)
                .cloned()
                .ok_or(EvalFault::UnknownField(key))
        }
        (base, index) => Err(EvalFault::Type(format!(
            "cannot index {} with {}",
            type_name(base),
            type_name(index)
        ))),
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, EvalFault> {
    match (op, &value) {
        (UnaryOp::Neg, Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                i.checked_neg()
                    .map(Value::from)
                    .ok_or(EvalFault::Overflow)
            } else if let Some(f) = n.as_f64() {
                Ok(Value::from(-f))
            } else {
                Err(EvalFault::Overflow)
            }
        }
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, other) => Err(EvalFault::Type(format!(
            "cannot negate {}",
            type_name(other)
        ))),
        (UnaryOp::Not, other) => Err(EvalFault::Type(format!(
            "`!` requires a boolean, got {}",
            type_name(other)
        ))),
    }
}

enum NumPair {
    Ints(i64, i64),
    Floats(f64, f64),
}

fn numeric_pair(lhs: &Value, rhs: &Value) -> Option<NumPair> {
    let (l, r) = match (lhs, rhs) {
        (Value::Number(l), Value::Number(r)) => (l, r),
        _ => return None,
    };
    match (l.as_i64(), r.as_i64()) {
        (Some(li), Some(ri)) => Some(NumPair::Ints(li, ri)),
        _ => Some(NumPair::Floats(l.as_f64()?, r.as_f64()?)),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalFault> {
    match op {
        BinaryOp::Add => match (lhs, rhs) {
            (Value::String(l), Value::String(r)) => Ok(Value::String(l + &r)),
            (Value::Array(mut l), Value::Array(r)) => {
                l.extend(r);
                Ok(Value::Array(l))
            }
            (lhs, rhs) => arith(op, lhs, rhs),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arith(op, lhs, rhs),
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&lhs, &rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, lhs, rhs),
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit ops handled in eval"),
    }
}

fn arith(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalFault> {
    match numeric_pair(&lhs, &rhs) {
        Some(NumPair::Ints(l, r)) => {
            let result = match op {
                BinaryOp::Add => l.checked_add(r),
                BinaryOp::Sub => l.checked_sub(r),
                BinaryOp::Mul => l.checked_mul(r),
                BinaryOp::Div => {
                    if r == 0 {
                        return Err(EvalFault::DivisionByZero);
                    }
                    l.checked_div(r)
                }
                BinaryOp::Rem => {
                    if r == 0 {
                        return Err(EvalFault::DivisionByZero);
                    }
                    l.checked_rem(r)
                }
                _ => unreachable!(),
            };
            result.map(Value::from).ok_or(EvalFault::Overflow)
        }
        Some(NumPair::Floats(l, r)) => {
            let result = match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => l / r,
                BinaryOp::Rem => l % r,
                _ => unreachable!(),
            };
            Ok(Value::from(result))
        }
        None => Err(EvalFault::Type(format!(
            "cannot apply arithmetic to {} and {}",
            type_name(&lhs),
            type_name(&rhs)
        ))),
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    // Numbers compare by value so `1 == 1.0` holds.
    if let Some(pair) = numeric_pair(lhs, rhs) {
        return match pair {
            NumPair::Ints(l, r) => l == r,
            NumPair::Floats(l, r) => l == r,
        };
    }
    lhs == rhs
}

fn compare(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalFault> {
    let ordering = match numeric_pair(&lhs, &rhs) {
        Some(NumPair::Ints(l, r)) => l.partial_cmp(&r),
        Some(NumPair::Floats(l, r)) => l.partial_cmp(&r),
        None => match (&lhs, &rhs) {
            (Value::String(l), Value::String(r)) => l.partial_cmp(r),
            _ => {
                return Err(EvalFault::Type(format!(
                    "cannot order {} and {}",
                    type_name(&lhs),
                    type_name(&rhs)
                )))
            }
        },
    };
    let Some(ordering) = ordering else {
        return Ok(Value::Bool(false));
    };
    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

#[cfg(test)]
mod tests {
    use crate::expr::{evaluate, evaluate_condition, evaluate_str, ExprError};
    use crate::types::VarMap;
    use serde_json::json;

    fn vars() -> VarMap {
        let mut vars = VarMap::default();
        vars.insert("counter".to_string(), json!(3));
        vars.insert("name".to_string(), json!("spam"));
        vars.insert("flag".to_string(), json!(true));
        vars.insert("pi".to_string(), json!(3.5));
        vars.insert("items".to_string(), json!(["a", "b", "c"]));
        vars.insert(
            "results".to_string(),
            json!({"2": {"returned": 7, "exception": null}}),
        );
        vars
    }

    #[test]
    fn arithmetic() {
        let v = vars();
        assert_eq!(evaluate_str("1+1", &v).unwrap(), json!(2));
        assert_eq!(evaluate_str("2 * counter - 1", &v).unwrap(), json!(5));
        assert_eq!(evaluate_str("7 % 4", &v).unwrap(), json!(3));
        assert_eq!(evaluate_str("pi * 2.0", &v).unwrap(), json!(7.0));
        assert_eq!(evaluate_str("counter + pi", &v).unwrap(), json!(6.5));
        assert_eq!(evaluate_str("-counter", &v).unwrap(), json!(-3));
    }

    #[test]
    fn string_concat() {
        let v = vars();
        assert_eq!(evaluate_str("name + ' and egg'", &v).unwrap(), json!("spam and egg"));
    }

    #[test]
    fn comparisons_and_logic() {
        let v = vars();
        assert_eq!(evaluate_str("counter < 10", &v).unwrap(), json!(true));
        assert_eq!(evaluate_str("counter >= 3", &v).unwrap(), json!(true));
        assert_eq!(evaluate_str("name == 'spam'", &v).unwrap(), json!(true));
        assert_eq!(evaluate_str("1 == 1.0", &v).unwrap(), json!(true));
        assert_eq!(
            evaluate_str("flag && counter != 3", &v).unwrap(),
            json!(false)
        );
        assert_eq!(evaluate_str("!flag || counter == 3", &v).unwrap(), json!(true));
    }

    #[test]
    fn short_circuit_skips_rhs() {
        // The right-hand side references an unknown variable but is never reached.
        let v = vars();
        assert_eq!(evaluate_str("flag || missing", &v).unwrap(), json!(true));
        assert_eq!(evaluate_str("!flag && missing", &v).unwrap(), json!(false));
    }

    #[test]
    fn access_chains() {
        let v = vars();
        assert_eq!(evaluate_str("items[1]", &v).unwrap(), json!("b"));
        assert_eq!(evaluate_str("results[2].returned", &v).unwrap(), json!(7));
        assert_eq!(
            evaluate_str("results[2].exception == null", &v).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn list_literals() {
        let v = vars();
        assert_eq!(
            evaluate_str("[counter, counter + 1]", &v).unwrap(),
            json!([3, 4])
        );
        assert_eq!(evaluate_str("[] + ['x']", &v).unwrap(), json!(["x"]));
    }

    #[test]
    fn literal_values_pass_through() {
        let v = vars();
        assert_eq!(evaluate(&json!(42), &v).unwrap(), json!(42));
        assert_eq!(evaluate(&json!([1, 2]), &v).unwrap(), json!([1, 2]));
        // Strings are expressions; quoting yields an actual string.
        assert_eq!(evaluate(&json!("'egg'"), &v).unwrap(), json!("egg"));
    }

    #[test]
    fn unknown_variable_is_reported_with_expression() {
        let v = vars();
        let err = evaluate_str("missing + 1", &v).unwrap_err();
        match err {
            ExprError::Eval { expr, message } => {
                assert_eq!(expr, "missing + 1");
                assert!(message.contains("missing"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn division_by_zero() {
        let v = vars();
        assert!(matches!(
            evaluate_str("1 / 0", &v),
            Err(ExprError::Eval { .. })
        ));
        assert!(matches!(
            evaluate_str("1 % 0", &v),
            Err(ExprError::Eval { .. })
        ));
    }

    #[test]
    fn conditions_require_booleans() {
        let v = vars();
        assert!(evaluate_condition("counter == 3", &v).unwrap());
        assert!(matches!(
            evaluate_condition("counter", &v),
            Err(ExprError::NonBooleanCondition { .. })
        ));
    }
}
