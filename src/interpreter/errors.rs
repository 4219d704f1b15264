//! Error codes and utilities
//!
//! Defines standard error codes raised by the evaluator and primitives

use serde::{Deserialize, Serialize};

/// Error information with code and message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code (e.g., "LOOKUP_ERROR", "TYPE_ERROR")
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorInfo {
    /// Create a new error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Error code: Name not found in scope, or slot not found on a value
pub const LOOKUP_ERROR: &str = "LOOKUP_ERROR";

/// Error code: Type error (wrong type for operation)
pub const TYPE_ERROR: &str = "TYPE_ERROR";

/// Error code: Value is not callable
pub const NOT_A_FUNCTION: &str = "NOT_A_FUNCTION";

/// Error code: Wrong number of arguments
pub const WRONG_ARG_COUNT: &str = "WRONG_ARG_COUNT";

/// Error code: Wrong argument type
pub const WRONG_ARG_TYPE: &str = "WRONG_ARG_TYPE";

/// Error code: Arithmetic error (division by zero)
pub const ARITHMETIC_ERROR: &str = "ARITHMETIC_ERROR";

/// Error code: Index out of range
pub const INDEX_ERROR: &str = "INDEX_ERROR";
