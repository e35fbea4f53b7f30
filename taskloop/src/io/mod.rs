//! I/O collaborators for the task loop.

pub mod agents;
pub mod config;
pub mod llm;
pub mod process;
pub mod prompt;
pub mod repair;
pub mod tool_executor;
pub mod tools;
pub mod transcript;
pub mod verify;
