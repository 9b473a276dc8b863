//! Use-case services over the user store.
//!
//! # Responsibility
//! - Orchestrate repository calls into caller-level APIs.
//! - Keep callers decoupled from SQL and row decoding.

pub mod user_service;
