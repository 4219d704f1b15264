//! Type definitions for the interpreter
//!
//! This module contains all the core types used by the evaluator:
//! - AST nodes (Ast, Node, NodeKind)
//! - Runtime values (Val, Object, Closure)
//! - Control flow (Control, Frame, FrameKind)
//! - Phase enums for each frame kind

pub mod ast;
pub mod control;
pub mod phase;
pub mod values;

// Re-export all types for convenient access
pub use ast::{Ast, Flavor, Handler, Lit, Node, NodeId, NodeKind, Pattern, Span, Stmt};
pub use control::{
    CallSite, Control, Exception, Frame, FrameKind, Interrupt, StopPayload, TagEntry,
};
pub use phase::*;
pub use values::{Closure, ListRef, ObjRef, Object, Val};
