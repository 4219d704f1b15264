//! Expression evaluation
//!
//! Leaf nodes evaluate in one go without a frame. Everything with children
//! goes through the frame stack (see `statements`).

use std::rc::Rc;

use super::env::Scope;
use super::errors::{self, ErrorInfo};
use super::types::{Ast, Closure, Lit, NodeId, NodeKind, Val};
use crate::scheduler::Wait;

/// Result of evaluating an expression or calling a primitive
///
/// Evaluation can either:
/// - Produce a value (normal case)
/// - Signal an error (throw)
/// - Park the job until a wait condition is met
/// - Give up the rest of the job's turn
#[derive(Debug, Clone)]
pub enum EvalResult {
    /// Expression evaluated to a value
    Value { v: Val },
    /// Evaluation failed
    Throw { error: Val },
    /// The job must wait; it resumes with the value the scheduler hands back
    Suspend { wait: Wait },
    /// End the job's turn; it resumes with `void`
    Yield,
}

impl EvalResult {
    pub fn value(v: Val) -> Self {
        EvalResult::Value { v }
    }

    pub fn void() -> Self {
        EvalResult::Value { v: Val::Void }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        EvalResult::Throw {
            error: Val::Error(ErrorInfo::new(code, message)),
        }
    }
}

/// Evaluate a leaf node
///
/// Supports:
/// - Literals
/// - Local lookups
/// - Function literals (capture the current scope)
pub fn eval_leaf(ast: &Rc<Ast>, id: NodeId, env: &Rc<Scope>) -> EvalResult {
    match ast.kind(id) {
        NodeKind::Literal { v } => EvalResult::value(lit_to_val(v)),

        NodeKind::Local { name } => match env.lookup(name) {
            Some(v) => EvalResult::value(v),
            None => EvalResult::error(
                errors::LOOKUP_ERROR,
                format!("lookup failed: {}", name),
            ),
        },

        NodeKind::Function { .. } => EvalResult::value(Val::Code(Rc::new(Closure {
            ast: ast.clone(),
            node: id,
            env: env.clone(),
        }))),

        other => EvalResult::error(
            errors::TYPE_ERROR,
            format!("not a leaf expression: {:?}", other),
        ),
    }
}

pub fn lit_to_val(lit: &Lit) -> Val {
    match lit {
        Lit::Nil => Val::Nil,
        Lit::Bool(b) => Val::Bool(*b),
        Lit::Num(n) => Val::Num(*n),
        Lit::Str(s) => Val::Str(s.clone()),
    }
}
