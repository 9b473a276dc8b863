//! User record model.
//!
//! # Responsibility
//! - Define the canonical `user` row shape read and written by the store.
//! - Define the insert request shape, where id and version are optional.
//! - Validate field invariants before writes and after reads.
//!
//! # Invariants
//! - `id` is positive, stable, and never reused for another user.
//! - `version` is never negative; only the store advances it, and never
//!   past `i64::MAX`.
//! - `updated_at` is never earlier than `created_at`.
//! - `deleted` is the source of truth for tombstone state.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Primary key of a user row.
pub type UserId = i64;

/// Field-level validation failures for user records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserValidationError {
    NonPositiveId(UserId),
    BlankName,
    NegativeAge(i32),
    NegativeVersion(i64),
    /// Version is at `i64::MAX` and cannot advance again.
    VersionExhausted(UserId),
    /// `updated_at` precedes `created_at`.
    InvalidTimestamps {
        created_at: i64,
        updated_at: i64,
    },
}

impl Display for UserValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonPositiveId(id) => write!(f, "user id must be positive, got {id}"),
            Self::BlankName => write!(f, "user name must not be blank"),
            Self::NegativeAge(age) => write!(f, "user age must not be negative, got {age}"),
            Self::NegativeVersion(version) => {
                write!(f, "user version must not be negative, got {version}")
            }
            Self::VersionExhausted(id) => {
                write!(f, "user {id} version cannot advance past {}", i64::MAX)
            }
            Self::InvalidTimestamps {
                created_at,
                updated_at,
            } => write!(
                f,
                "updated_at ({updated_at}) must not be earlier than created_at ({created_at})"
            ),
        }
    }
}

impl Error for UserValidationError {}

/// Persisted user row.
///
/// Values of this type are snapshots: holding one does not reserve the row,
/// and `version` records what the row looked like at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub age: i32,
    pub email: Option<String>,
    /// Epoch milliseconds, assigned once by the insert fill hook.
    pub created_at: i64,
    /// Epoch milliseconds, refreshed by the update fill hook.
    pub updated_at: i64,
    /// Optimistic-lock token.
    pub version: i64,
    pub deleted: bool,
}

impl User {
    /// Checks field invariants shared by read and write paths.
    pub fn validate(&self) -> Result<(), UserValidationError> {
        validate_id(self.id)?;
        validate_payload(&self.name, self.age)?;
        if self.version < 0 {
            return Err(UserValidationError::NegativeVersion(self.version));
        }
        if self.updated_at < self.created_at {
            return Err(UserValidationError::InvalidTimestamps {
                created_at: self.created_at,
                updated_at: self.updated_at,
            });
        }
        Ok(())
    }

    /// Version the next successful conditional update will store.
    pub fn next_version(&self) -> Result<i64, UserValidationError> {
        self.version
            .checked_add(1)
            .ok_or(UserValidationError::VersionExhausted(self.id))
    }

    /// Returns whether this user is visible to default reads.
    pub fn is_active(&self) -> bool {
        !self.deleted
    }
}

/// Insert request for a new user row.
///
/// `id` and `version` are left empty to let the store assign them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub id: Option<UserId>,
    pub name: String,
    pub age: i32,
    pub email: Option<String>,
    pub version: Option<i64>,
}

impl NewUser {
    pub fn new(name: impl Into<String>, age: i32) -> Self {
        Self {
            id: None,
            name: name.into(),
            age,
            email: None,
            version: None,
        }
    }

    /// Pins the primary key; the store uses it verbatim instead of generating one.
    pub fn with_id(mut self, id: UserId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Overrides the configured initial version.
    pub fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    /// Checks caller-provided fields before id and timestamps are assigned.
    pub fn validate(&self) -> Result<(), UserValidationError> {
        if let Some(id) = self.id {
            validate_id(id)?;
        }
        if let Some(version) = self.version {
            if version < 0 {
                return Err(UserValidationError::NegativeVersion(version));
            }
            if version == i64::MAX {
                return Err(UserValidationError::VersionExhausted(self.id.unwrap_or(0)));
            }
        }
        validate_payload(&self.name, self.age)
    }
}

fn validate_id(id: UserId) -> Result<(), UserValidationError> {
    if id <= 0 {
        return Err(UserValidationError::NonPositiveId(id));
    }
    Ok(())
}

fn validate_payload(name: &str, age: i32) -> Result<(), UserValidationError> {
    if name.trim().is_empty() {
        return Err(UserValidationError::BlankName);
    }
    if age < 0 {
        return Err(UserValidationError::NegativeAge(age));
    }
    Ok(())
}
