//! Stable exit codes for stepwise CLI commands.

/// Command succeeded; for `run`, every step succeeded.
pub const OK: i32 = 0;
/// Invalid config or arguments, or planning failed.
pub const INVALID: i32 = 1;
/// `stepwise run` stopped at a failed or cancelled step.
pub const EXECUTION_FAILED: i32 = 2;
/// The user declined the plan.
pub const REJECTED: i32 = 3;
