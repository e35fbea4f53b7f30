//! Task routing and verification loop.
//!
//! A natural-language task is routed through a three-phase planner (pattern
//! match, optional fast classifier, full planner), executed as tool calls or a
//! delegation to an agent, and then verified against an expected output. The
//! loop retries with feedback until the artifact passes, local repair fixes
//! it, identical failures repeat, or the iteration/model-call budgets run out.
//!
//! - **[`core`]**: Pure, deterministic logic (classification, decision parsing,
//!   tool policy, mutations, pruning, budgets). No I/O.
//! - **[`io`]**: Side-effecting collaborators (tools, subprocesses, models,
//!   agents, verification, repair, config, transcript).
//!
//! Orchestration modules ([`planning`], [`delegation`], [`review`], [`looping`])
//! coordinate core logic with I/O to implement CLI commands.

pub mod core;
pub mod delegation;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod planning;
pub mod review;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
