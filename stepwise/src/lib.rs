//! Natural-language task planning and step execution.
//!
//! A free-form request is turned into an ordered [`plan::TaskPlan`] by the
//! [`planner`], then run step by step by the [`executor`] with bounded retries
//! and deterministic auto-correction. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (path sanitizing, step contracts,
//!   dependency ordering, retry bookkeeping, response extraction, content
//!   repair). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (generator process, shell
//!   commands, workspace filesystem, config, prompt rendering). Isolated behind
//!   traits so tests can script them.
//!
//! Orchestration modules ([`planner`], [`executor`]) coordinate core logic with
//! I/O to implement the CLI commands.

pub mod core;
pub mod error;
pub mod executor;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod plan;
pub mod planner;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
