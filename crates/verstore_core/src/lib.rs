//! Versioned record store for `user` rows on SQLite.
//!
//! Rows carry a version column used for optimistic locking, audit timestamps
//! filled in by an explicit hook, and a logical delete flag that hides them
//! from default reads.

pub mod config;
pub mod db;
pub mod fill;
pub mod id;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, StoreConfig};
pub use fill::{Clock, FillHook, SystemClock, TimestampFill};
pub use id::{IdError, IdGenerator, SnowflakeGenerator};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::query::{
    Column, Condition, FieldValue, Page, PageRequest, QueryError, UserQuery, ValueKind,
};
pub use model::user::{NewUser, User, UserId, UserValidationError};
pub use repo::user_repo::{RepoError, RepoResult, SqliteUserRepository, UserRepository};
pub use service::user_service::{UpdateOutcome, UserService};

/// Minimal health-check API for smoke probes.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
