//! Postfix (reverse Polish) expressions for computed columns
//!
//! A compute expression is a list of tokens: numbers, string literals,
//! `{name}` placeholders (substituted from the unit's determiners before
//! evaluation), `xN` input variables, operators and named functions written
//! `name()` (unary) or `name(,)` (binary).
//!
//! # Operand order
//!
//! Binary operators and binary functions pop their operands from the stack
//! and build `(first_popped OP second_popped)`. The value on top of the
//! stack is therefore the *left* operand: `["3", "4", "-"]` is `4 - 3`, and
//! renders as `(4 - 3)`. Evaluation and rendering use the same order so an
//! expression evaluated here agrees with its rendered SQL.
//!
//! The two functions that build identifiers take their arguments in push
//! order: `zerofill(,)` pops the width and then the value to pad, and
//! `prepend(,)` pops the prefix and then the value it is prepended to.
//!
//! ```
//! use catalog_ingest::expression::{rpn_eval, Value};
//!
//! let tokens: Vec<String> = ["7", "3", "zerofill(,)"].iter().map(|s| s.to_string()).collect();
//! assert_eq!(rpn_eval(&[], &tokens).unwrap(), Value::Text("007".to_string()));
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use crate::models::{ColumnData, Determiners, ScalarType};

static VAR_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^x(\d+)$").expect("Invalid regex"));
static SUBST_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{[a-zA-Z_]*\}$").expect("Invalid regex"));
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-zA-Z_][a-zA-Z0-9_]*)\}").expect("Invalid regex"));
static FUNC_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-zA-Z_]+[:a-zA-Z0-9_.]*)\(\)$").expect("Invalid regex"));
static FUNC2_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-zA-Z_]+[:a-zA-Z0-9_.]*)\(,\)$").expect("Invalid regex"));

const BINARY_OPERATORS: &[&str] = &["*", "+", "-", "/", "^", "|", "%", "&", "or", "and"];
const UNARY_OPERATORS: &[&str] = &["!", "not"];

/// Errors from evaluating or rendering an expression
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    /// The stack did not end with exactly one value, or an operator ran
    /// out of operands
    #[error("Malformed expression: {0}")]
    MalformedExpression(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Unknown element {0} in expression")]
    UnknownElement(String),

    #[error("Expression references non-existent input {0}")]
    UnknownVariable(String),

    #[error("Placeholder {{{0}}} has no value in this context")]
    UnknownPlaceholder(String),

    #[error("Operator {op} cannot be applied to {operands}")]
    TypeMismatch { op: String, operands: String },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Integer overflow in {0}")]
    Overflow(String),

    #[error("Cannot convert {value} to {target}")]
    Coercion { value: String, target: ScalarType },
}

/// Result type for expression operations
pub type ExpressionResult<T> = Result<T, ExpressionError>;

/// A scalar produced by evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl Value {
    /// Parse a literal token. Integers win over floats when both parse to
    /// the same number.
    pub fn parse_literal(token: &str) -> Option<Value> {
        if let Ok(i) = token.parse::<i64>() {
            return Some(Value::Int(i));
        }
        token.parse::<f64>().ok().map(Value::Float)
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Text(_) => "text",
        }
    }

    fn truthy(&self, op: &str) -> ExpressionResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Float(f) => Ok(*f != 0.0),
            Value::Text(_) => Err(ExpressionError::TypeMismatch {
                op: op.to_string(),
                operands: "text".to_string(),
            }),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Build a constant column of `len` rows holding this value converted
    /// to `target`.
    pub fn fill(&self, target: ScalarType, len: usize) -> ExpressionResult<ColumnData> {
        let fail = || ExpressionError::Coercion {
            value: self.to_string(),
            target,
        };
        let as_int = || -> ExpressionResult<i64> {
            match self {
                Value::Int(i) => Ok(*i),
                Value::Bool(b) => Ok(i64::from(*b)),
                Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(*f as i64),
                Value::Text(s) => s.trim().parse().map_err(|_| fail()),
                _ => Err(fail()),
            }
        };
        let as_float = || -> ExpressionResult<f64> {
            match self {
                Value::Text(s) => s.trim().parse().map_err(|_| fail()),
                Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
                other => other.as_f64().ok_or_else(fail),
            }
        };
        Ok(match target {
            ScalarType::Bool => {
                let b = match self {
                    Value::Bool(b) => *b,
                    Value::Int(i) => *i != 0,
                    Value::Float(f) => *f != 0.0,
                    Value::Text(s) => match s.to_lowercase().as_str() {
                        "true" | "t" | "1" => true,
                        "false" | "f" | "0" => false,
                        _ => return Err(fail()),
                    },
                };
                ColumnData::Bool(vec![b; len])
            }
            ScalarType::Int16 => {
                let v = i16::try_from(as_int()?).map_err(|_| fail())?;
                ColumnData::Int16(vec![v; len])
            }
            ScalarType::Int32 => {
                let v = i32::try_from(as_int()?).map_err(|_| fail())?;
                ColumnData::Int32(vec![v; len])
            }
            ScalarType::Int64 => ColumnData::Int64(vec![as_int()?; len]),
            ScalarType::Float32 => ColumnData::Float32(vec![as_float()? as f32; len]),
            ScalarType::Float64 => ColumnData::Float64(vec![as_float()?; len]),
            ScalarType::Text => ColumnData::Text(vec![self.to_string(); len]),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// Replace every `{name}` placeholder in the tokens with the matching
/// determiner value.
pub fn substitute(rpn: &[String], context: &Determiners) -> ExpressionResult<Vec<String>> {
    rpn.iter()
        .map(|token| {
            let mut missing = None;
            let replaced = PLACEHOLDER.replace_all(token, |caps: &regex::Captures<'_>| {
                match context.get(&caps[1]) {
                    Some(value) => value.to_string(),
                    None => {
                        missing.get_or_insert_with(|| caps[1].to_string());
                        String::new()
                    }
                }
            });
            match missing {
                Some(name) => Err(ExpressionError::UnknownPlaceholder(name)),
                None => Ok(replaced.into_owned()),
            }
        })
        .collect()
}

fn pop(stack: &mut Vec<Value>, token: &str) -> ExpressionResult<Value> {
    stack.pop().ok_or_else(|| {
        ExpressionError::MalformedExpression(format!("not enough operands for {}", token))
    })
}

/// Left-pad the textual form of `value` with zeros to `width` characters.
pub fn zerofill(value: &Value, width: &Value) -> ExpressionResult<Value> {
    let width = match width {
        Value::Int(w) if *w >= 0 => *w as usize,
        other => {
            return Err(ExpressionError::TypeMismatch {
                op: "zerofill".to_string(),
                operands: format!("width of type {}", other.type_name()),
            });
        }
    };
    Ok(Value::Text(format!("{:0>width$}", value.to_string(), width = width)))
}

/// Concatenate `prefix` and `value` as text.
pub fn prepend(prefix: &Value, value: &Value) -> Value {
    Value::Text(format!("{}{}", prefix, value))
}

fn apply_unary_function(name: &str, arg: Value) -> ExpressionResult<Value> {
    match (name, arg) {
        ("abs", Value::Int(i)) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| ExpressionError::Overflow("abs".to_string())),
        ("abs", Value::Float(f)) => Ok(Value::Float(f.abs())),
        ("int", v) => match v {
            Value::Int(i) => Ok(Value::Int(i)),
            Value::Float(f) => Ok(Value::Int(f.trunc() as i64)),
            Value::Bool(b) => Ok(Value::Int(i64::from(b))),
            Value::Text(s) => s.trim().parse().map(Value::Int).map_err(|_| {
                ExpressionError::Coercion {
                    value: s,
                    target: ScalarType::Int64,
                }
            }),
        },
        ("float", v) => match v {
            Value::Text(ref s) => s.trim().parse().map(Value::Float).map_err(|_| {
                ExpressionError::Coercion {
                    value: s.clone(),
                    target: ScalarType::Float64,
                }
            }),
            other => other.as_f64().map(Value::Float).ok_or_else(|| {
                ExpressionError::TypeMismatch {
                    op: "float".to_string(),
                    operands: other.type_name().to_string(),
                }
            }),
        },
        ("abs", other) => Err(ExpressionError::TypeMismatch {
            op: "abs".to_string(),
            operands: other.type_name().to_string(),
        }),
        (other, _) => Err(ExpressionError::UnknownFunction(format!("{}()", other))),
    }
}

fn apply_binary(op: &str, left: Value, right: Value) -> ExpressionResult<Value> {
    let mismatch = |l: &Value, r: &Value| ExpressionError::TypeMismatch {
        op: op.to_string(),
        operands: format!("{} and {}", l.type_name(), r.type_name()),
    };
    let overflow = || ExpressionError::Overflow(op.to_string());

    match op {
        "and" => Ok(Value::Bool(left.truthy(op)? && right.truthy(op)?)),
        "or" => Ok(Value::Bool(left.truthy(op)? || right.truthy(op)?)),
        "|" | "&" => match (&left, &right) {
            (Value::Int(l), Value::Int(r)) => Ok(Value::Int(if op == "|" { l | r } else { l & r })),
            _ => Err(mismatch(&left, &right)),
        },
        "^" => match (left.as_f64(), right.as_f64()) {
            (Some(l), Some(r)) => Ok(Value::Float(l.powf(r))),
            _ => Err(mismatch(&left, &right)),
        },
        _ => match (&left, &right) {
            (Value::Int(l), Value::Int(r)) => {
                let (l, r) = (*l, *r);
                let result = match op {
                    "+" => l.checked_add(r).ok_or_else(overflow)?,
                    "-" => l.checked_sub(r).ok_or_else(overflow)?,
                    "*" => l.checked_mul(r).ok_or_else(overflow)?,
                    "/" | "%" if r == 0 => return Err(ExpressionError::DivisionByZero),
                    "/" => l.checked_div(r).ok_or_else(overflow)?,
                    "%" => l.checked_rem(r).ok_or_else(overflow)?,
                    _ => return Err(ExpressionError::UnknownElement(op.to_string())),
                };
                Ok(Value::Int(result))
            }
            _ => {
                let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
                    return Err(mismatch(&left, &right));
                };
                let result = match op {
                    "+" => l + r,
                    "-" => l - r,
                    "*" => l * r,
                    "/" | "%" if r == 0.0 => return Err(ExpressionError::DivisionByZero),
                    "/" => l / r,
                    "%" => l % r,
                    _ => return Err(ExpressionError::UnknownElement(op.to_string())),
                };
                Ok(Value::Float(result))
            }
        },
    }
}

/// Evaluate a postfix token list to a single value.
///
/// `inputs` supplies values for `xN` variables (1-based). Tokens that are
/// neither literals, variables, operators nor recognized functions are
/// pushed as text.
pub fn rpn_eval(inputs: &[Value], rpn: &[String]) -> ExpressionResult<Value> {
    let mut stack: Vec<Value> = Vec::new();

    for token in rpn {
        let token = token.as_str();
        if let Some(value) = Value::parse_literal(token) {
            stack.push(value);
            continue;
        }
        if let Some(caps) = VAR_PATTERN.captures(token) {
            let index: usize = caps[1]
                .parse()
                .map_err(|_| ExpressionError::UnknownVariable(token.to_string()))?;
            let value = index
                .checked_sub(1)
                .and_then(|i| inputs.get(i))
                .ok_or_else(|| ExpressionError::UnknownVariable(token.to_string()))?;
            stack.push(value.clone());
            continue;
        }
        if BINARY_OPERATORS.contains(&token) {
            let left = pop(&mut stack, token)?;
            let right = pop(&mut stack, token)?;
            stack.push(apply_binary(token, left, right)?);
            continue;
        }
        if UNARY_OPERATORS.contains(&token) {
            let operand = pop(&mut stack, token)?;
            stack.push(Value::Bool(!operand.truthy(token)?));
            continue;
        }
        if let Some(caps) = FUNC2_PATTERN.captures(token) {
            let result = match &caps[1] {
                "zerofill" => {
                    let width = pop(&mut stack, token)?;
                    let value = pop(&mut stack, token)?;
                    zerofill(&value, &width)?
                }
                "prepend" => {
                    let prefix = pop(&mut stack, token)?;
                    let value = pop(&mut stack, token)?;
                    prepend(&prefix, &value)
                }
                other => return Err(ExpressionError::UnknownFunction(format!("{}(,)", other))),
            };
            stack.push(result);
            continue;
        }
        if let Some(caps) = FUNC_PATTERN.captures(token) {
            let arg = pop(&mut stack, token)?;
            stack.push(apply_unary_function(&caps[1], arg)?);
            continue;
        }
        stack.push(Value::Text(token.to_string()));
    }

    if stack.len() != 1 {
        return Err(ExpressionError::MalformedExpression(format!(
            "expected one value on the stack, found {}",
            stack.len()
        )));
    }
    pop(&mut stack, "result")
}

fn quote_function_name(name: &str) -> String {
    if name.contains(':') {
        format!("\"{}\"", name)
    } else {
        name.to_string()
    }
}

fn pop_text(stack: &mut Vec<String>, token: &str) -> ExpressionResult<String> {
    stack.pop().ok_or_else(|| {
        ExpressionError::MalformedExpression(format!("not enough operands for {}", token))
    })
}

/// Render a postfix token list as an infix formula, e.g. for the
/// definition of a column in a view.
///
/// `inputs` are the expressions substituted for `xN` variables. Unlike
/// [`rpn_eval`], unrecognized tokens are an error here.
pub fn rpn_to_expression(inputs: &[&str], rpn: &[String]) -> ExpressionResult<String> {
    let mut stack: Vec<String> = Vec::new();

    for token in rpn {
        let token = token.as_str();
        if Value::parse_literal(token).is_some() || SUBST_PATTERN.is_match(token) {
            stack.push(token.to_string());
            continue;
        }
        if let Some(caps) = VAR_PATTERN.captures(token) {
            let input = caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| i.checked_sub(1))
                .and_then(|i| inputs.get(i))
                .ok_or_else(|| ExpressionError::UnknownVariable(token.to_string()))?;
            stack.push((*input).to_string());
            continue;
        }
        if BINARY_OPERATORS.contains(&token) {
            let left = pop_text(&mut stack, token)?;
            let right = pop_text(&mut stack, token)?;
            stack.push(format!("({} {} {})", left, token, right));
            continue;
        }
        if UNARY_OPERATORS.contains(&token) {
            let operand = pop_text(&mut stack, token)?;
            stack.push(format!("({} {})", token, operand));
            continue;
        }
        if let Some(caps) = FUNC_PATTERN.captures(token) {
            let arg = pop_text(&mut stack, token)?;
            stack.push(format!("{}({})", quote_function_name(&caps[1]), arg));
            continue;
        }
        if let Some(caps) = FUNC2_PATTERN.captures(token) {
            let first = pop_text(&mut stack, token)?;
            let second = pop_text(&mut stack, token)?;
            stack.push(format!(
                "{}({},{})",
                quote_function_name(&caps[1]),
                first,
                second
            ));
            continue;
        }
        return Err(ExpressionError::UnknownElement(token.to_string()));
    }

    if stack.len() != 1 {
        return Err(ExpressionError::MalformedExpression(format!(
            "expected one value on the stack, found {}",
            stack.len()
        )));
    }
    pop_text(&mut stack, "result")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_addition_evaluates_and_renders() {
        let rpn = tokens(&["3", "4", "+"]);
        assert_eq!(rpn_eval(&[], &rpn).unwrap(), Value::Int(7));
        assert_eq!(rpn_to_expression(&[], &rpn).unwrap(), "(4 + 3)");
    }

    #[test]
    fn test_top_of_stack_is_left_operand() {
        let rpn = tokens(&["3", "4", "-"]);
        assert_eq!(rpn_eval(&[], &rpn).unwrap(), Value::Int(1));
        assert_eq!(rpn_to_expression(&[], &rpn).unwrap(), "(4 - 3)");

        let rpn = tokens(&["2", "10", "/"]);
        assert_eq!(rpn_eval(&[], &rpn).unwrap(), Value::Int(5));
        assert_eq!(rpn_to_expression(&[], &rpn).unwrap(), "(10 / 2)");

        let rpn = tokens(&["3", "17", "%"]);
        assert_eq!(rpn_eval(&[], &rpn).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_integer_division_truncates() {
        let rpn = tokens(&["2", "7", "/"]);
        assert_eq!(rpn_eval(&[], &rpn).unwrap(), Value::Int(3));
        let rpn = tokens(&["2", "7.0", "/"]);
        assert_eq!(rpn_eval(&[], &rpn).unwrap(), Value::Float(3.5));
    }

    #[test]
    fn test_division_by_zero() {
        let rpn = tokens(&["0", "7", "/"]);
        assert_eq!(
            rpn_eval(&[], &rpn).unwrap_err(),
            ExpressionError::DivisionByZero
        );
    }

    #[test]
    fn test_zerofill_and_prepend() {
        assert_eq!(
            zerofill(&Value::Text("7".into()), &Value::Int(3)).unwrap(),
            Value::Text("007".into())
        );
        assert_eq!(
            prepend(&Value::Text("R".into()), &Value::Text("01".into())),
            Value::Text("R01".into())
        );
        // no truncation when the value is already wider
        assert_eq!(
            zerofill(&Value::Int(12345), &Value::Int(3)).unwrap(),
            Value::Text("12345".into())
        );
    }

    #[test]
    fn test_prepend_pops_prefix_first() {
        let rpn = tokens(&["01", "2", "zerofill(,)", "R", "prepend(,)"]);
        assert_eq!(rpn_eval(&[], &rpn).unwrap(), Value::Text("R01".into()));
    }

    #[test]
    fn test_composite_identifier() {
        let context = Determiners::new()
            .with("raft", "23")
            .with("sensor", "2")
            .with("visit", "03455567");
        let rpn = tokens(&[
            "{visit}",
            "8",
            "zerofill(,)",
            "{sensor}",
            "2",
            "zerofill(,)",
            "prepend(,)",
            "{raft}",
            "1",
            "zerofill(,)",
            "prepend(,)",
        ]);
        let substituted = substitute(&rpn, &context).unwrap();
        assert_eq!(substituted[0], "03455567");

        let result = rpn_eval(&[], &substituted).unwrap();
        assert_eq!(result, Value::Text("230203455567".into()));

        // pure: same input, same output
        assert_eq!(rpn_eval(&[], &substituted).unwrap(), result);
    }

    #[test]
    fn test_unknown_placeholder() {
        let rpn = tokens(&["{detector}"]);
        let err = substitute(&rpn, &Determiners::new()).unwrap_err();
        assert_eq!(err, ExpressionError::UnknownPlaceholder("detector".into()));
    }

    #[test]
    fn test_malformed_stack() {
        let rpn = tokens(&["1", "2"]);
        assert!(matches!(
            rpn_eval(&[], &rpn),
            Err(ExpressionError::MalformedExpression(_))
        ));
        assert!(matches!(
            rpn_eval(&[], &tokens(&["+"])),
            Err(ExpressionError::MalformedExpression(_))
        ));
        assert!(matches!(
            rpn_eval(&[], &[]),
            Err(ExpressionError::MalformedExpression(_))
        ));
    }

    #[test]
    fn test_unknown_tokens_are_pushed_as_text() {
        let rpn = tokens(&["forced"]);
        assert_eq!(rpn_eval(&[], &rpn).unwrap(), Value::Text("forced".into()));
        assert_eq!(
            rpn_to_expression(&[], &rpn).unwrap_err(),
            ExpressionError::UnknownElement("forced".into())
        );
    }

    #[test]
    fn test_unknown_function() {
        let rpn = tokens(&["1", "2", "concat(,)"]);
        assert_eq!(
            rpn_eval(&[], &rpn).unwrap_err(),
            ExpressionError::UnknownFunction("concat(,)".into())
        );
    }

    #[test]
    fn test_variables() {
        let rpn = tokens(&["x1", "x2", "*"]);
        assert_eq!(
            rpn_eval(&[Value::Int(6), Value::Int(7)], &rpn).unwrap(),
            Value::Int(42)
        );
        assert_eq!(
            rpn_to_expression(&["flux", "scale"], &rpn).unwrap(),
            "(scale * flux)"
        );
        assert_eq!(
            rpn_eval(&[], &rpn).unwrap_err(),
            ExpressionError::UnknownVariable("x1".into())
        );
    }

    #[test]
    fn test_render_functions_and_unary() {
        let rpn = tokens(&["x1", "ns:scale()", "not"]);
        assert_eq!(
            rpn_to_expression(&["flux"], &rpn).unwrap(),
            "(not \"ns:scale\"(flux))"
        );
        let rpn = tokens(&["x1", "2", "round(,)"]);
        assert_eq!(rpn_to_expression(&["flux"], &rpn).unwrap(), "round(2,flux)");
    }

    #[test]
    fn test_logical_operators() {
        let rpn = tokens(&["0", "1", "or"]);
        assert_eq!(rpn_eval(&[], &rpn).unwrap(), Value::Bool(true));
        let rpn = tokens(&["0", "1", "and", "not"]);
        assert_eq!(rpn_eval(&[], &rpn).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_fill_coerces_to_declared_type() {
        let v = Value::Text("230203455567".into());
        assert_eq!(
            v.fill(ScalarType::Int64, 2).unwrap(),
            ColumnData::Int64(vec![230203455567, 230203455567])
        );
        assert!(matches!(
            v.fill(ScalarType::Int32, 1),
            Err(ExpressionError::Coercion { .. })
        ));
        assert_eq!(
            Value::Int(3).fill(ScalarType::Text, 1).unwrap(),
            ColumnData::Text(vec!["3".into()])
        );
    }
}
