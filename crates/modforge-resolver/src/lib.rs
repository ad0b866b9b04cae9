//! Dependency resolution engine.
//!
//! Root selections are expanded through a worklist until every reachable
//! mod has exactly one version assigned that satisfies every constraint
//! placed on it, or until a constraint set becomes unsatisfiable. Choices
//! the constraints leave open are made by the policy evaluator.

pub mod cache;
pub mod conflict;
pub mod constraint;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod policy;
pub mod resolver;

pub use error::ResolveError;
pub use resolver::{resolve, CancelToken, Resolution, ResolveOptions, RootSelection};
