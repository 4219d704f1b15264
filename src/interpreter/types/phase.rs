//! Execution phase enums for each frame kind
//!
//! Each node kind that needs more than one micro-step has its own Phase enum
//! tracking which step it is currently at.

use serde::{Deserialize, Serialize};

/// Execution phase for Declare and Assign nodes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StorePhase {
    /// Push the value expression
    Eval = 0,
    /// Value is in the accumulator; store it
    Store = 1,
}

/// Execution phase for Call nodes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CallPhase {
    /// Evaluate the target, if any
    Start,
    /// Target value is in the accumulator
    Target,
    /// Argument `n` is in the accumulator
    Arg(usize),
    /// A primitive suspended; its result arrives as the resume value
    Resume,
    /// A function body ran; its result is in the accumulator
    Returned,
}

/// Execution phase for a running function body
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum InvokePhase {
    Body = 0,
}

/// Execution phase for Nary, Pipe and And composites
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NaryPhase {
    /// Give the scheduler a turn, then execute the current child
    Yield = 0,
    /// Execute (or spawn) the current child
    Exec = 1,
    /// The current child finished; its value is in the accumulator
    Collect = 2,
    /// Wait for spawned siblings to terminate
    Join = 3,
}

/// Execution phase for Scope nodes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ScopePhase {
    Enter = 0,
    Exit = 1,
}

/// Execution phase for If nodes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum IfPhase {
    Test = 0,
    Choose = 1,
}

/// Execution phase for While and Foreach loops
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum LoopPhase {
    /// Push the loop tag
    Enter = 0,
    /// Evaluate the test (while) or the list (foreach)
    Eval = 1,
    /// Test/list value is in the accumulator
    Check = 2,
    /// Start the next iteration
    Iterate = 3,
    /// An iteration body finished
    AfterBody = 4,
    /// Yield, then start the next iteration
    YieldThenIterate = 5,
    /// Wait for concurrent iterations
    Join = 6,
}

/// Execution phase for nodes that evaluate one value then act on it
/// (Return, Throw, WaitUntil)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValuePhase {
    Eval = 0,
    Apply = 1,
}

/// Execution phase for Try nodes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TryPhase {
    /// Initial state - push try body
    NotStarted,
    /// Try body is executing
    TryStarted,
    /// Guard of handler `n` is executing
    Guard(usize),
    /// A handler body is executing
    CatchStarted,
    /// The else clause is executing
    ElseStarted,
}

/// Execution phase for Finally nodes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FinallyPhase {
    NotStarted = 0,
    BodyStarted = 1,
    FinallyStarted = 2,
}

/// Execution phase for TaggedStmt nodes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TaggedPhase {
    /// Evaluate the tag expression
    EvalTag = 0,
    /// Tag value is in the accumulator
    Enter = 1,
    /// Body is executing under the tag
    Body = 2,
}

/// Execution phase for At nodes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AtPhase {
    /// Hand the statement to a watcher job
    Register = 0,
    /// Evaluate the condition (in the watcher)
    Test = 1,
    /// Condition value is in the accumulator
    Check = 2,
}
