//! Store configuration.
//!
//! # Responsibility
//! - Hold tunables for logical deletion, versioning, id generation and paging.
//! - Load and validate configuration from JSON documents.
//!
//! # Invariants
//! - A validated config has an SQL-safe logical delete column name, because
//!   that name is interpolated into statements.
//! - Deleted and not-deleted flag values are distinct.

use crate::id::SnowflakeGenerator;
use crate::model::query::Column;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

static SQL_IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("identifier pattern is valid")
});

/// Tunables for [`crate::SqliteUserRepository`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Column holding the logical delete flag.
    pub logic_delete_column: String,
    /// Stored flag value for deleted rows.
    pub logic_delete_value: i64,
    /// Stored flag value for live rows.
    pub logic_not_delete_value: i64,
    /// Version assigned on insert when the caller does not supply one.
    pub initial_version: i64,
    /// Snowflake worker id for generated primary keys.
    pub worker_id: u16,
    /// Upper bound on page sizes. Larger requests are rejected; `None` allows any size.
    pub max_page_size: Option<u32>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            logic_delete_column: "deleted".to_string(),
            logic_delete_value: 1,
            logic_not_delete_value: 0,
            initial_version: 0,
            worker_id: 0,
            max_page_size: None,
        }
    }
}

impl StoreConfig {
    /// Parses a JSON document; missing keys fall back to defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let column = self.logic_delete_column.as_str();
        if !SQL_IDENTIFIER.is_match(column) {
            return Err(ConfigError::InvalidColumnName(column.to_string()));
        }
        if Column::ALL
            .iter()
            .any(|data_column| data_column.name().eq_ignore_ascii_case(column))
        {
            return Err(ConfigError::ColumnConflict(column.to_string()));
        }
        if self.logic_delete_value == self.logic_not_delete_value {
            return Err(ConfigError::IdenticalDeleteValues(self.logic_delete_value));
        }
        if self.initial_version < 0 {
            return Err(ConfigError::NegativeInitialVersion(self.initial_version));
        }
        if self.worker_id > SnowflakeGenerator::MAX_WORKER_ID {
            return Err(ConfigError::InvalidWorkerId(self.worker_id));
        }
        if self.max_page_size == Some(0) {
            return Err(ConfigError::ZeroMaxPageSize);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    InvalidColumnName(String),
    /// Logical delete column shadows a data column.
    ColumnConflict(String),
    IdenticalDeleteValues(i64),
    NegativeInitialVersion(i64),
    InvalidWorkerId(u16),
    ZeroMaxPageSize,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "invalid store config: {message}"),
            Self::InvalidColumnName(name) => {
                write!(f, "logic_delete_column `{name}` is not a valid SQL identifier")
            }
            Self::ColumnConflict(name) => {
                write!(f, "logic_delete_column `{name}` collides with a data column")
            }
            Self::IdenticalDeleteValues(value) => write!(
                f,
                "logic_delete_value and logic_not_delete_value must differ, both are {value}"
            ),
            Self::NegativeInitialVersion(version) => {
                write!(f, "initial_version must not be negative, got {version}")
            }
            Self::InvalidWorkerId(worker_id) => write!(
                f,
                "worker_id {worker_id} exceeds maximum {}",
                SnowflakeGenerator::MAX_WORKER_ID
            ),
            Self::ZeroMaxPageSize => write!(f, "max_page_size must be at least 1"),
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::{ConfigError, StoreConfig};

    #[test]
    fn default_config_is_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logic_delete_column, "deleted");
        assert_eq!(config.logic_delete_value, 1);
        assert_eq!(config.logic_not_delete_value, 0);
    }

    #[test]
    fn json_overrides_only_given_keys() {
        let config =
            StoreConfig::from_json_str(r#"{ "logic_delete_column": "is_deleted", "worker_id": 7 }"#)
                .unwrap();
        assert_eq!(config.logic_delete_column, "is_deleted");
        assert_eq!(config.worker_id, 7);
        assert_eq!(config.max_page_size, None);
    }

    #[test]
    fn rejects_unsafe_column_names() {
        let config = StoreConfig {
            logic_delete_column: "deleted; DROP TABLE user".to_string(),
            ..StoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidColumnName(_))
        ));

        let shadowing = StoreConfig {
            logic_delete_column: "Version".to_string(),
            ..StoreConfig::default()
        };
        assert!(matches!(
            shadowing.validate(),
            Err(ConfigError::ColumnConflict(_))
        ));
    }

    #[test]
    fn rejects_identical_flag_values() {
        let err = StoreConfig::from_json_str(r#"{ "logic_delete_value": 0 }"#).unwrap_err();
        assert_eq!(err, ConfigError::IdenticalDeleteValues(0));
    }

    #[test]
    fn page_cap_is_optional_but_never_zero() {
        let capped = StoreConfig::from_json_str(r#"{ "max_page_size": 50 }"#).unwrap();
        assert_eq!(capped.max_page_size, Some(50));

        let err = StoreConfig::from_json_str(r#"{ "max_page_size": 0 }"#).unwrap_err();
        assert_eq!(err, ConfigError::ZeroMaxPageSize);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = StoreConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
