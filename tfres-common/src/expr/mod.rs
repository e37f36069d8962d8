//! Templated fields and mapping scripts.
//!
//! Two entry points, each split into a compile step and an evaluate step:
//!
//! | Input                         | Compile            | Evaluate          |
//! |-------------------------------|--------------------|-------------------|
//! | `"prefix-${! json(\"a\") }"`  | [`Field::parse`]   | [`Field::render`] |
//! | `root = this.vars`            | [`Mapping::parse`] | [`Mapping::apply`]|
//!
//! [`Evaluator`] bundles both around a single JSON context.

mod eval;
mod parser;

pub use eval::{render_value, type_name};

use eval::{Scope, run_statements};
use parser::{Expr, Statement, parse_interpolation, parse_mapping};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

const INTERPOLATION_OPEN: &str = "${!";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
    #[error("{0}")]
    Runtime(String),
}

impl ExprError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            message: message.into(),
        }
    }

    /// Whether the failure happened before anything was evaluated.
    pub fn is_compile_error(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}

/// Which kind of input failed to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalKind {
    Field,
    Mapping,
}

/// An [`ExprError`] tagged with the request value that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to evaluate {what}: {source}")]
pub struct EvaluationError {
    pub what: String,
    pub kind: EvalKind,
    #[source]
    pub source: ExprError,
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Query(Expr),
}

/// A compiled template string.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    parts: Vec<Part>,
}

impl Field {
    pub fn parse(src: &str) -> Result<Self, ExprError> {
        let mut parts = Vec::new();
        let mut text_start = 0;
        let mut search_from = 0;

        while let Some(found) = src[search_from..].find(INTERPOLATION_OPEN) {
            let open = search_from + found;
            if open > text_start {
                parts.push(Part::Text(src[text_start..open].to_string()));
            }
            let (query, end) = parse_interpolation(src, open + INTERPOLATION_OPEN.len())?;
            parts.push(Part::Query(query));
            text_start = end;
            search_from = end;
        }
        if text_start < src.len() {
            parts.push(Part::Text(src[text_start..].to_string()));
        }

        Ok(Self { parts })
    }

    pub fn render(&self, context: &Value) -> Result<String, ExprError> {
        let vars = HashMap::new();
        let scope = Scope {
            context,
            root: None,
            vars: &vars,
        };
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Query(expr) => out.push_str(&render_value(&eval::eval(expr, &scope)?)),
            }
        }
        Ok(out)
    }
}

/// A compiled assignment script.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    statements: Vec<Statement>,
}

impl Mapping {
    pub fn parse(src: &str) -> Result<Self, ExprError> {
        Ok(Self {
            statements: parse_mapping(src)?,
        })
    }

    /// Run the script once. A script that never assigns `root` returns the
    /// context; `None` means it deleted the result.
    pub fn apply(&self, context: &Value) -> Result<Option<Value>, ExprError> {
        run_statements(&self.statements, context)
    }
}

/// Evaluates fields and mappings against one context.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluator {
    context: Value,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(Value::Object(Map::new()))
    }
}

impl Evaluator {
    pub fn new(context: Value) -> Self {
        Self { context }
    }

    pub fn evaluate_field(&self, src: &str) -> Result<String, ExprError> {
        Field::parse(src)?.render(&self.context)
    }

    pub fn evaluate_mapping(&self, src: &str) -> Result<Option<Value>, ExprError> {
        Mapping::parse(src)?.apply(&self.context)
    }

    /// [`Self::evaluate_field`], naming `what` in the error.
    pub fn field(&self, what: &str, src: &str) -> Result<String, EvaluationError> {
        self.evaluate_field(src).map_err(|source| EvaluationError {
            what: what.to_string(),
            kind: EvalKind::Field,
            source,
        })
    }

    /// [`Self::evaluate_mapping`], naming `what` in the error.
    pub fn mapping(&self, what: &str, src: &str) -> Result<Option<Value>, EvaluationError> {
        self.evaluate_mapping(src).map_err(|source| EvaluationError {
            what: what.to_string(),
            kind: EvalKind::Mapping,
            source,
        })
    }
}
