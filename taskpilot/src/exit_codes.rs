//! Stable exit codes for taskpilot CLI commands.

/// Command succeeded, or the autopilot drained the backlog.
pub const OK: i32 = 0;
/// Invalid arguments, missing project, unmet preconditions or other errors.
pub const INVALID: i32 = 1;
/// The cancellation flag was observed (Ctrl-C).
pub const CANCELLED: i32 = 2;
/// `taskpilot autopilot` ran out of iterations with work left in the backlog.
pub const MAX_ITERATIONS: i32 = 3;
