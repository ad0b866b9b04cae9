//! Shared utilities for Modforge.
//!
//! Cross-cutting concerns used by the other Modforge crates: the unified
//! error type, filesystem helpers and terminal status output.

pub mod errors;
pub mod fs;
pub mod progress;
