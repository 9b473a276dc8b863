//! Repository layer for the user store.
//!
//! # Responsibility
//! - Define the versioned record store contract.
//! - Keep SQL text and row decoding out of services and callers.
//!
//! # Invariants
//! - Every default read carries the logical delete predicate.
//! - Optimistic-lock conflicts are reported as `Ok(false)`, not as errors.

pub mod user_repo;
