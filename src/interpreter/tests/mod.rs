//! Tests for the interpreter
//!
//! Organized by feature area. Every program goes through the JSON tree
//! format and runs on a simulated-clock scheduler.

pub mod helpers;

mod tag_tests;
mod try_tests;
