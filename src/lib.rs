//! revcache: two-tier result cache for AI code review (library crate).
//!
//! Re-exports public modules for integration tests and external use.

pub mod cache;
pub mod config;
pub mod constants;
pub mod env;
