//! Predicate expression tree and pagination types for user queries.
//!
//! # Responsibility
//! - Describe filters as plain data: a conjunction of leaf conditions.
//! - Resolve column names from external input (`from_map`) into typed columns.
//! - Reject malformed predicates before any SQL is built.
//!
//! # Invariants
//! - The logical delete column is never addressable here; the store injects
//!   that predicate itself.
//! - A condition's value kind always matches its column's kind once validated.

use crate::model::user::User;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Column name reserved for the logical delete flag.
pub const RESERVED_DELETE_COLUMN: &str = "deleted";

/// Filterable columns of the `user` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
    Id,
    Name,
    Age,
    Email,
    CreatedAt,
    UpdatedAt,
    Version,
}

/// Storage kind of a column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Text,
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer => f.write_str("integer"),
            Self::Text => f.write_str("text"),
        }
    }
}

impl Column {
    pub const ALL: [Column; 7] = [
        Column::Id,
        Column::Name,
        Column::Age,
        Column::Email,
        Column::CreatedAt,
        Column::UpdatedAt,
        Column::Version,
    ];

    /// SQL column name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Age => "age",
            Self::Email => "email",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::Version => "version",
        }
    }

    pub fn kind(self) -> ValueKind {
        match self {
            Self::Name | Self::Email => ValueKind::Text,
            Self::Id | Self::Age | Self::CreatedAt | Self::UpdatedAt | Self::Version => {
                ValueKind::Integer
            }
        }
    }
}

impl Display for Column {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Column {
    type Err = QueryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        if normalized == RESERVED_DELETE_COLUMN {
            return Err(QueryError::ReservedColumn(normalized));
        }
        Self::ALL
            .into_iter()
            .find(|column| column.name() == normalized)
            .ok_or_else(|| QueryError::UnknownColumn(value.to_string()))
    }
}

/// Literal compared against a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
}

impl FieldValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Integer(_) => ValueKind::Integer,
            Self::Text(_) => ValueKind::Text,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Leaf condition over one column.
///
/// Comparison leaves follow SQL semantics: a NULL column value never matches
/// `Eq`, `Ne`, or any range comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Eq(Column, FieldValue),
    Ne(Column, FieldValue),
    Ge(Column, FieldValue),
    Gt(Column, FieldValue),
    Le(Column, FieldValue),
    Lt(Column, FieldValue),
    IsNull(Column),
    IsNotNull(Column),
}

impl Condition {
    pub fn column(&self) -> Column {
        match self {
            Self::Eq(column, _)
            | Self::Ne(column, _)
            | Self::Ge(column, _)
            | Self::Gt(column, _)
            | Self::Le(column, _)
            | Self::Lt(column, _)
            | Self::IsNull(column)
            | Self::IsNotNull(column) => *column,
        }
    }

    pub fn value(&self) -> Option<&FieldValue> {
        match self {
            Self::Eq(_, value)
            | Self::Ne(_, value)
            | Self::Ge(_, value)
            | Self::Gt(_, value)
            | Self::Le(_, value)
            | Self::Lt(_, value) => Some(value),
            Self::IsNull(_) | Self::IsNotNull(_) => None,
        }
    }

    fn validate(&self) -> Result<(), QueryError> {
        let column = self.column();
        match self.value() {
            Some(value) if value.kind() != column.kind() => Err(QueryError::TypeMismatch {
                column,
                expected: column.kind(),
                actual: value.kind(),
            }),
            _ => Ok(()),
        }
    }
}

/// Malformed predicate input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    UnknownColumn(String),
    /// The logical delete column is managed by the store.
    ReservedColumn(String),
    TypeMismatch {
        column: Column,
        expected: ValueKind,
        actual: ValueKind,
    },
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownColumn(name) => write!(f, "unknown user column `{name}`"),
            Self::ReservedColumn(name) => write!(
                f,
                "column `{name}` is managed by the store and cannot be filtered on"
            ),
            Self::TypeMismatch {
                column,
                expected,
                actual,
            } => write!(
                f,
                "column `{column}` expects a {expected} value, got {actual}"
            ),
        }
    }
}

impl Error for QueryError {}

/// Immutable conjunction of conditions.
///
/// An empty query matches every non-deleted row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserQuery {
    conditions: Vec<Condition>,
}

impl UserQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an equality-only query from column names, like a column map filter.
    ///
    /// # Errors
    /// - Unknown or reserved column names.
    /// - Values whose kind does not match the column.
    pub fn from_map<K, I>(entries: I) -> Result<Self, QueryError>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, FieldValue)>,
    {
        let mut query = Self::new();
        for (name, value) in entries {
            let column = name.as_ref().parse::<Column>()?;
            query = query.and(Condition::Eq(column, value));
        }
        query.validate()?;
        Ok(query)
    }

    /// Appends a condition, returning the extended query.
    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn eq(self, column: Column, value: impl Into<FieldValue>) -> Self {
        self.and(Condition::Eq(column, value.into()))
    }

    pub fn ne(self, column: Column, value: impl Into<FieldValue>) -> Self {
        self.and(Condition::Ne(column, value.into()))
    }

    pub fn ge(self, column: Column, value: impl Into<FieldValue>) -> Self {
        self.and(Condition::Ge(column, value.into()))
    }

    pub fn gt(self, column: Column, value: impl Into<FieldValue>) -> Self {
        self.and(Condition::Gt(column, value.into()))
    }

    pub fn le(self, column: Column, value: impl Into<FieldValue>) -> Self {
        self.and(Condition::Le(column, value.into()))
    }

    pub fn lt(self, column: Column, value: impl Into<FieldValue>) -> Self {
        self.and(Condition::Lt(column, value.into()))
    }

    pub fn is_null(self, column: Column) -> Self {
        self.and(Condition::IsNull(column))
    }

    pub fn is_not_null(self, column: Column) -> Self {
        self.and(Condition::IsNotNull(column))
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Checks every condition's value kind against its column.
    pub fn validate(&self) -> Result<(), QueryError> {
        self.conditions.iter().try_for_each(Condition::validate)
    }
}

/// One-based page window with optional total count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub size: i64,
    pub count_total: bool,
}

impl PageRequest {
    /// Creates a request that also counts matching rows.
    pub fn new(page: i64, size: i64) -> Self {
        Self {
            page,
            size,
            count_total: true,
        }
    }

    pub fn without_count(mut self) -> Self {
        self.count_total = false;
        self
    }

    pub fn is_valid(&self) -> bool {
        self.page >= 1 && self.size >= 1
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub records: Vec<User>,
    /// Present only when the request asked for a total count.
    pub total: Option<u64>,
    pub page: i64,
    pub size: i64,
}

impl Page {
    /// Number of pages implied by `total`, when it was counted.
    pub fn pages(&self) -> Option<u64> {
        let size = u64::try_from(self.size).ok().filter(|size| *size > 0)?;
        self.total.map(|total| total.div_ceil(size))
    }
}

#[cfg(test)]
mod tests {
    use super::{Column, Condition, FieldValue, Page, QueryError, UserQuery, ValueKind};

    #[test]
    fn column_parses_snake_case_names_case_insensitively() {
        assert_eq!(" Created_At ".parse::<Column>().unwrap(), Column::CreatedAt);
        assert_eq!("email".parse::<Column>().unwrap(), Column::Email);
    }

    #[test]
    fn column_rejects_reserved_and_unknown_names() {
        assert!(matches!(
            "deleted".parse::<Column>(),
            Err(QueryError::ReservedColumn(_))
        ));
        assert!(matches!(
            "nickname".parse::<Column>(),
            Err(QueryError::UnknownColumn(name)) if name == "nickname"
        ));
    }

    #[test]
    fn builder_appends_conditions_in_order() {
        let query = UserQuery::new()
            .eq(Column::Name, "Alice")
            .ge(Column::Age, 10)
            .is_not_null(Column::Email);

        assert_eq!(
            query.conditions(),
            &[
                Condition::Eq(Column::Name, FieldValue::Text("Alice".to_string())),
                Condition::Ge(Column::Age, FieldValue::Integer(10)),
                Condition::IsNotNull(Column::Email),
            ]
        );
        assert!(query.validate().is_ok());
    }

    #[test]
    fn validate_rejects_value_kind_mismatch() {
        let query = UserQuery::new().eq(Column::Age, "18");
        assert_eq!(
            query.validate().unwrap_err(),
            QueryError::TypeMismatch {
                column: Column::Age,
                expected: ValueKind::Integer,
                actual: ValueKind::Text,
            }
        );
    }

    #[test]
    fn from_map_builds_equality_conjunction() {
        let query = UserQuery::from_map([
            ("name", FieldValue::from("Alice")),
            ("version", FieldValue::from(1_i64)),
        ])
        .unwrap();
        assert_eq!(query.conditions().len(), 2);
        assert_eq!(query.conditions()[1].column(), Column::Version);
    }

    #[test]
    fn from_map_rejects_delete_flag_column() {
        let err = UserQuery::from_map([("deleted", FieldValue::from(1_i64))]).unwrap_err();
        assert!(matches!(err, QueryError::ReservedColumn(_)));
    }

    #[test]
    fn page_count_rounds_up() {
        let page = Page {
            records: Vec::new(),
            total: Some(10),
            page: 1,
            size: 3,
        };
        assert_eq!(page.pages(), Some(4));

        let uncounted = Page {
            total: None,
            ..page
        };
        assert_eq!(uncounted.pages(), None);
    }
}
