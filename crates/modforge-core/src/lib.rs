//! Core data types for Modforge.
//!
//! Mod identities, version ordering and ranges, published version
//! candidates, compatibility tags, and the files a pack is described by:
//! `modforge.toml`, `modforge-policy.toml`, `modforge.lock` and the global
//! configuration.
//!
//! This crate is intentionally free of async code and network I/O.

pub mod candidate;
pub mod config;
pub mod identity;
pub mod lockfile;
pub mod metadata;
pub mod pack;
pub mod policy;
pub mod tags;
pub mod version;
