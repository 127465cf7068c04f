//! Deterministic, pure logic shared by the planner and the executor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod contract;
pub mod correct;
pub mod extract;
pub mod graph;
pub mod lang;
pub mod retry;
pub mod sanitize;
