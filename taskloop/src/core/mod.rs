//! Deterministic, pure logic shared by the task loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod decision_parse;
pub mod discovery;
pub mod file_select;
pub mod fingerprint;
pub mod mutations;
pub mod paths;
pub mod pruning;
pub mod retry;
pub mod scoring;
pub mod state;
pub mod tool_detect;
pub mod tool_policy;
pub mod types;
