//! Stable exit codes for taskloop CLI commands.

/// Task completed, artifact verified or repaired.
pub const OK: i32 = 0;
/// Invalid config or arguments, or any unexpected error.
pub const INVALID: i32 = 1;
/// Identical verification failures repeated until the loop gave up.
pub const STUCK: i32 = 3;
/// `max_iterations` passes ran without a final result.
pub const MAX_ITERATIONS: i32 = 4;
/// The model call budget was exhausted.
pub const BUDGET_EXCEEDED: i32 = 5;
/// `taskloop verify` or `taskloop repair` left a failing artifact.
pub const VERIFY_FAILED: i32 = 6;
