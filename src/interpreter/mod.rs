//! # Interpreter - Resumable Stack-Driven Evaluator
//!
//! Evaluates already-parsed programs (see [`types::Ast`]) one micro-step at
//! a time so the scheduler can interleave many jobs on one thread.
//!
//! ## Core Principles
//!
//! 1. **Stack-driven execution**: All state in `frames: Vec<Frame>`, no recursion
//! 2. **Centralized control flow**: `Control` manages break/continue/return/throw
//!    as well as tag stops and terminations
//! 3. **Cooperative**: a step never blocks; waiting is reported to the
//!    scheduler as [`vm::Step::Wait`]
//! 4. **Tags**: every job carries the stack of tags it runs under, which is
//!    how stop/freeze/block reach it

pub mod env;
pub mod errors;
pub mod exec_loop;
pub mod expressions;
pub mod statements;
pub mod stdlib;
pub mod types;
pub mod vm;

#[cfg(test)]
pub(crate) mod tests;

// Re-export commonly used items
pub use env::Scope;
pub use errors::ErrorInfo;
pub use exec_loop::step;
pub use expressions::EvalResult;
pub use types::{Ast, Control, NodeId, NodeKind, Val};
pub use vm::{Step, Vm};

use crate::errors::SchedulerError;

/// Parse a JSON-encoded program and check its node references
pub fn parse_program(source: &str) -> Result<Ast, SchedulerError> {
    let ast: Ast =
        serde_json::from_str(source).map_err(|e| SchedulerError::InvalidAst(e.to_string()))?;
    ast.validate().map_err(SchedulerError::InvalidAst)?;
    Ok(ast)
}
