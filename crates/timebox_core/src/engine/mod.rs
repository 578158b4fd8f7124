//! Read-only engine over an in-memory task snapshot.
//!
//! # Responsibility
//! - Own the flat task snapshot (`TaskStore`) and its parent/child index.
//! - Resolve inherited properties, aggregate metrics and answer tree
//!   visibility queries as pure functions of that snapshot.
//!
//! # Invariants
//! - Nothing in this module mutates tasks.
//! - Missing parents or children stop a walk; they never raise.
//! - Every walk tracks visited IDs, so malformed cyclic data terminates.

pub mod hierarchy;
pub mod metrics;
pub mod store;
pub mod visibility;
