//! Side-effecting collaborators used by the planner and the executor.

pub mod config;
pub mod context;
pub mod generator;
pub mod process;
pub mod prompt;
pub mod shell;
pub mod workspace;
