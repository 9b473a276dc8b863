//! Record model and query vocabulary for the `user` table.
//!
//! # Responsibility
//! - Define the data structures exchanged with the store.
//! - Keep predicate construction free of SQL text.
//!
//! # Invariants
//! - Every row is identified by a stable positive `UserId`.
//! - Deletion is represented by a logical flag, not a physical delete.

pub mod query;
pub mod user;
