//! Tree-walking interpreter for parsed queries and mapping statements.

use super::ExprError;
use super::parser::{BinaryOp, Expr, Statement, UnaryOp};
use crate::tree::{get_path, parse_dot_path, remove_path, set_path};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Everything a query can read while it runs.
pub struct Scope<'a> {
    pub context: &'a Value,
    pub root: Option<&'a Value>,
    pub vars: &'a HashMap<String, Value>,
}

type EvalResult = Result<Value, ExprError>;

fn runtime(message: impl Into<String>) -> ExprError {
    ExprError::Runtime(message.into())
}

/// State of the document a mapping builds.
enum Output {
    /// Root never assigned; the context passes through unchanged.
    Unset,
    /// `root = deleted()`.
    Deleted,
    Doc(Value),
}

impl Output {
    fn doc(&self) -> Option<&Value> {
        match self {
            Self::Doc(doc) => Some(doc),
            Self::Unset | Self::Deleted => None,
        }
    }
}

/// Run mapping statements against `context`. A script that never assigns
/// the result yields the context unchanged; `None` means the script deleted
/// the result.
pub fn run_statements(
    statements: &[Statement],
    context: &Value,
) -> Result<Option<Value>, ExprError> {
    let mut output = Output::Unset;
    let mut vars: HashMap<String, Value> = HashMap::new();

    for statement in statements {
        match statement {
            Statement::Let { name, value } => {
                let scope = Scope {
                    context,
                    root: output.doc(),
                    vars: &vars,
                };
                let value = eval(value, &scope)?;
                vars.insert(name.clone(), value);
            }
            Statement::Assign { target, value } => {
                if is_deletion(value) {
                    if target.is_empty() {
                        output = Output::Deleted;
                    } else if let Output::Doc(doc) = &mut output {
                        remove_path(doc, target);
                    }
                    continue;
                }

                let scope = Scope {
                    context,
                    root: output.doc(),
                    vars: &vars,
                };
                let value = eval(value, &scope)?;
                if target.is_empty() {
                    output = Output::Doc(value);
                    continue;
                }
                if !matches!(output, Output::Doc(_)) {
                    output = Output::Doc(Value::Object(Map::new()));
                }
                let Output::Doc(doc) = &mut output else {
                    continue;
                };
                if !doc.is_object() {
                    return Err(runtime(format!(
                        "cannot assign field `{}` of a {} result",
                        target.join("."),
                        type_name(doc)
                    )));
                }
                set_path(doc, target, value);
            }
        }
    }

    Ok(match output {
        Output::Unset => Some(context.clone()),
        Output::Deleted => None,
        Output::Doc(doc) => Some(doc),
    })
}

fn is_deletion(expr: &Expr) -> bool {
    matches!(expr, Expr::Call { name, args } if name == "deleted" && args.is_empty())
}

pub fn eval(expr: &Expr, scope: &Scope<'_>) -> EvalResult {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Array(items) => items
            .iter()
            .map(|item| eval(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Object(fields) => {
            let mut map = Map::new();
            for (key, value) in fields {
                map.insert(key.clone(), eval(value, scope)?);
            }
            Ok(Value::Object(map))
        }
        Expr::This(path) => Ok(lookup(scope.context, path)),
        Expr::Root(path) => Ok(scope
            .root
            .map_or(Value::Null, |root| lookup(root, path))),
        Expr::Variable(name, path) => scope
            .vars
            .get(name)
            .map(|value| lookup(value, path))
            .ok_or_else(|| runtime(format!("variable `${name}` is not defined"))),
        Expr::Get(inner, path) => Ok(lookup(&eval(inner, scope)?, path)),
        Expr::Call { name, args } => call(name, args, scope),
        Expr::Method { target, name, args } => method(target, name, args, scope),
        Expr::Unary(op, operand) => {
            let value = eval(operand, scope)?;
            match (op, &value) {
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnaryOp::Neg, Value::Number(n)) => negate(n),
                (UnaryOp::Not, other) => Err(runtime(format!(
                    "cannot negate {} with `!`",
                    type_name(other)
                ))),
                (UnaryOp::Neg, other) => Err(runtime(format!(
                    "cannot negate {} with `-`",
                    type_name(other)
                ))),
            }
        }
        Expr::Binary(op, lhs, rhs) => binary(*op, lhs, rhs, scope),
    }
}

fn lookup(value: &Value, path: &[String]) -> Value {
    get_path(value, path).cloned().unwrap_or(Value::Null)
}

fn binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, scope: &Scope<'_>) -> EvalResult {
    match op {
        BinaryOp::Coalesce => match eval(lhs, scope) {
            Ok(Value::Null) | Err(_) => eval(rhs, scope),
            Ok(value) => Ok(value),
        },
        BinaryOp::Or | BinaryOp::And => {
            let left = expect_bool(&eval(lhs, scope)?, op)?;
            if (op == BinaryOp::Or && left) || (op == BinaryOp::And && !left) {
                return Ok(Value::Bool(left));
            }
            Ok(Value::Bool(expect_bool(&eval(rhs, scope)?, op)?))
        }
        _ => {
            let left = eval(lhs, scope)?;
            let right = eval(rhs, scope)?;
            match op {
                BinaryOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
                BinaryOp::Ne => Ok(Value::Bool(!values_equal(&left, &right))),
                BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                    let ordering = compare(&left, &right)?;
                    Ok(Value::Bool(match op {
                        BinaryOp::Lt => ordering == Ordering::Less,
                        BinaryOp::Le => ordering != Ordering::Greater,
                        BinaryOp::Gt => ordering == Ordering::Greater,
                        _ => ordering != Ordering::Less,
                    }))
                }
                _ => arithmetic(op, &left, &right),
            }
        }
    }
}

fn expect_bool(value: &Value, op: BinaryOp) -> Result<bool, ExprError> {
    value.as_bool().ok_or_else(|| {
        runtime(format!(
            "expected bool operands for {op:?}, found {}",
            type_name(value)
        ))
    })
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Result<Ordering, ExprError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b))
            .ok_or_else(|| runtime("numbers are not comparable")),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(runtime(format!(
            "cannot compare {} with {}",
            type_name(left),
            type_name(right)
        ))),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> EvalResult {
    if op == BinaryOp::Add
        && let (Value::String(a), Value::String(b)) = (left, right)
    {
        return Ok(Value::String(format!("{a}{b}")));
    }

    let (Value::Number(a), Value::Number(b)) = (left, right) else {
        return Err(runtime(format!(
            "cannot apply {op:?} to {} and {}",
            type_name(left),
            type_name(right)
        )));
    };

    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let exact = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Rem if y != 0 => x.checked_rem(y),
            _ => None,
        };
        if let Some(result) = exact {
            return Ok(Value::Number(result.into()));
        }
    }

    let (x, y) = (to_f64(a)?, to_f64(b)?);
    if matches!(op, BinaryOp::Div | BinaryOp::Rem) && y == 0.0 {
        return Err(runtime("division by zero"));
    }
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        _ => x % y,
    };
    number_value(result)
}

fn to_f64(n: &Number) -> Result<f64, ExprError> {
    n.as_f64()
        .ok_or_else(|| runtime(format!("number {n} is out of range")))
}

/// Integral results stay integers so `4 / 2` renders as `2`.
pub(crate) fn number_value(n: f64) -> EvalResult {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Ok(Value::Number((n as i64).into()));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| runtime(format!("{n} is not a representable number")))
}

fn negate(n: &Number) -> EvalResult {
    match n.as_i64().and_then(i64::checked_neg) {
        Some(negated) => Ok(Value::Number(negated.into())),
        None => number_value(-to_f64(n)?),
    }
}

fn call(name: &str, args: &[Expr], scope: &Scope<'_>) -> EvalResult {
    let values = args
        .iter()
        .map(|arg| eval(arg, scope))
        .collect::<Result<Vec<_>, _>>()?;

    match (name, values.as_slice()) {
        ("json", []) => Ok(scope.context.clone()),
        ("json", [Value::String(path)]) => Ok(lookup(scope.context, &parse_dot_path(path))),
        ("env", [Value::String(var)]) => {
            Ok(std::env::var(var).map_or(Value::Null, Value::String))
        }
        ("content", []) => serde_json::to_string(scope.context)
            .map(Value::String)
            .map_err(|e| runtime(format!("cannot serialize context: {e}"))),
        ("now", []) => Ok(Value::String(
            Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        )),
        ("timestamp_unix", []) => Ok(Value::Number(Utc::now().timestamp().into())),
        ("uuid_v4", []) => Ok(Value::String(uuid::Uuid::new_v4().to_string())),
        ("deleted", []) => Err(runtime(
            "deleted() can only be used as the value of an assignment",
        )),
        _ => Err(runtime(format!(
            "wrong arguments for {name}(): {}",
            describe_args(&values)
        ))),
    }
}

fn method(target: &Expr, name: &str, args: &[Expr], scope: &Scope<'_>) -> EvalResult {
    // `or` only evaluates its argument when the target is null or fails.
    if name == "or" {
        let [default] = args else {
            return Err(runtime("or() takes exactly one argument"));
        };
        return match eval(target, scope) {
            Ok(Value::Null) | Err(_) => eval(default, scope),
            Ok(value) => Ok(value),
        };
    }

    let value = eval(target, scope)?;
    let values = args
        .iter()
        .map(|arg| eval(arg, scope))
        .collect::<Result<Vec<_>, _>>()?;

    match (name, &value, values.as_slice()) {
        ("uppercase", Value::String(s), []) => Ok(Value::String(s.to_uppercase())),
        ("lowercase", Value::String(s), []) => Ok(Value::String(s.to_lowercase())),
        ("trim", Value::String(s), []) => Ok(Value::String(s.trim().to_string())),
        ("string", v, []) => Ok(Value::String(render_value(v))),
        ("number", Value::Number(_), []) => Ok(value.clone()),
        ("number", Value::String(s), []) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| runtime(format!("cannot parse \"{s}\" as a number")))
            .and_then(number_value),
        ("length", Value::String(s), []) => Ok(Value::Number(s.chars().count().into())),
        ("length", Value::Array(items), []) => Ok(Value::Number(items.len().into())),
        ("length", Value::Object(map), []) => Ok(Value::Number(map.len().into())),
        ("keys", Value::Object(map), []) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Ok(Value::Array(
                keys.into_iter().map(|k| Value::String(k.clone())).collect(),
            ))
        }
        ("values", Value::Object(map), []) => Ok(Value::Array(map.values().cloned().collect())),
        ("type", v, []) => Ok(Value::String(type_name(v).to_string())),
        ("contains", Value::String(s), [Value::String(needle)]) => {
            Ok(Value::Bool(s.contains(needle.as_str())))
        }
        ("contains", Value::Array(items), [needle]) => Ok(Value::Bool(
            items.iter().any(|item| values_equal(item, needle)),
        )),
        ("contains", Value::Object(map), [Value::String(key)]) => {
            Ok(Value::Bool(map.contains_key(key)))
        }
        ("replace", Value::String(s), [Value::String(from), Value::String(to)]) => {
            Ok(Value::String(s.replace(from.as_str(), to)))
        }
        ("split", Value::String(s), [Value::String(sep)]) => Ok(Value::Array(
            s.split(sep.as_str())
                .map(|part| Value::String(part.to_string()))
                .collect(),
        )),
        ("join", Value::Array(items), [Value::String(sep)]) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.as_str()),
                other => Err(runtime(format!(
                    "join() expects an array of strings, found {}",
                    type_name(other)
                ))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|parts| Value::String(parts.join(sep.as_str()))),
        ("not_null", Value::Null, []) => Err(runtime("value is null")),
        ("not_null", v, []) => Ok(v.clone()),
        ("from_json", Value::String(s), []) => serde_json::from_str(s)
            .map_err(|e| runtime(format!("from_json(): {e}"))),
        ("format_json", v, []) => serde_json::to_string_pretty(v)
            .map(Value::String)
            .map_err(|e| runtime(format!("format_json(): {e}"))),
        _ => Err(runtime(format!(
            "method {name}() does not apply to {} with arguments ({})",
            type_name(&value),
            describe_args(&values)
        ))),
    }
}

fn describe_args(values: &[Value]) -> String {
    values
        .iter()
        .map(type_name)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Text form of a query result inside an interpolation.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
