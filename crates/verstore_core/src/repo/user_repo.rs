//! User repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide point, batch, filtered and paged reads over the `user` table.
//! - Insert rows with store-assigned id, version and audit timestamps.
//! - Apply updates through the version-checked conditional write.
//! - Delete rows logically by flipping the configured flag column.
//!
//! # Invariants
//! - Default reads only ever see rows whose flag equals `logic_not_delete_value`.
//! - A conditional update touches at most one row and advances its version by 1.
//! - `delete_logical` never changes `version`.
//! - Write paths validate before SQL; read paths reject invalid persisted rows.

use crate::config::{ConfigError, StoreConfig};
use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::fill::{FillHook, SystemClock, TimestampFill};
use crate::id::{IdError, IdGenerator, SnowflakeGenerator};
use crate::model::query::{Condition, FieldValue, Page, PageRequest, QueryError, UserQuery};
use crate::model::user::{NewUser, User, UserId, UserValidationError};
use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

const USER_TABLE: &str = "user";
const DATA_COLUMNS: [&str; 7] = [
    "id",
    "name",
    "age",
    "email",
    "created_at",
    "updated_at",
    "version",
];
/// Keeps `IN (...)` lists well below SQLite's bound-parameter limit.
const BATCH_CHUNK_SIZE: usize = 500;

pub type RepoResult<T> = Result<T, RepoError>;

/// Error for user persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(UserValidationError),
    Db(DbError),
    /// No live row with this id.
    NotFound(UserId),
    /// Page number or page size below 1, a size above the configured cap,
    /// or an offset that overflows.
    InvalidPage {
        page: i64,
        size: i64,
    },
    InvalidQuery(QueryError),
    IdGeneration(IdError),
    Config(ConfigError),
    /// Persisted row cannot be converted into a valid `User`.
    InvalidData(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: String,
    },
}

impl RepoError {
    /// Whether the caller passed arguments the store refuses outright.
    ///
    /// These are surfaced immediately and never worth retrying.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidPage { .. } | Self::InvalidQuery(_))
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "user not found: {id}"),
            Self::InvalidPage { page, size } => write!(
                f,
                "invalid page request: page={page} size={size}"
            ),
            Self::InvalidQuery(err) => write!(f, "invalid query: {err}"),
            Self::IdGeneration(err) => write!(f, "id generation failed: {err}"),
            Self::Config(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted user data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "user repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "user repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "user repository requires column `{column}` in table `{table}`"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::InvalidQuery(err) => Some(err),
            Self::IdGeneration(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::NotFound(_)
            | Self::InvalidPage { .. }
            | Self::InvalidData(_)
            | Self::UninitializedConnection { .. }
            | Self::MissingRequiredTable(_)
            | Self::MissingRequiredColumn { .. } => None,
        }
    }
}

impl From<UserValidationError> for RepoError {
    fn from(value: UserValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<QueryError> for RepoError {
    fn from(value: QueryError) -> Self {
        Self::InvalidQuery(value)
    }
}

impl From<IdError> for RepoError {
    fn from(value: IdError) -> Self {
        Self::IdGeneration(value)
    }
}

impl From<ConfigError> for RepoError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// Versioned record store over the `user` table.
pub trait UserRepository {
    /// Gets one live user, or `NotFound`.
    fn get(&self, id: UserId) -> RepoResult<User>;
    /// Administrative point read that also sees logically deleted rows.
    fn get_including_deleted(&self, id: UserId) -> RepoResult<Option<User>>;
    /// Gets live users for the given ids; unknown ids are skipped.
    fn get_batch(&self, ids: &[UserId]) -> RepoResult<Vec<User>>;
    /// Lists live users matching every condition, ordered by id.
    fn query(&self, query: &UserQuery) -> RepoResult<Vec<User>>;
    /// Counts live users matching every condition.
    fn count(&self, query: &UserQuery) -> RepoResult<u64>;
    /// Returns one page of `query` results, optionally with the total count.
    fn query_page(&self, request: &PageRequest, query: &UserQuery) -> RepoResult<Page>;
    /// Inserts a user and returns its id.
    fn insert(&self, user: &NewUser) -> RepoResult<UserId>;
    /// Writes `user` only if the stored version still equals `user.version`.
    ///
    /// Returns `false` when no row was written: the version is stale, or the
    /// row is gone or logically deleted. The caller's copy is stale either way.
    fn update_conditional(&self, user: &User) -> RepoResult<bool>;
    /// Flags a live user as deleted. Returns the number of rows changed (0 or 1).
    fn delete_logical(&self, id: UserId) -> RepoResult<usize>;
}

/// SQLite-backed user repository.
pub struct SqliteUserRepository<'conn> {
    conn: &'conn Connection,
    config: StoreConfig,
    fill: Box<dyn FillHook + 'conn>,
    id_generator: Box<dyn IdGenerator + 'conn>,
    select_sql: String,
}

impl<'conn> SqliteUserRepository<'conn> {
    /// Constructs a repository with default configuration.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        Self::try_with_config(conn, StoreConfig::default())
    }

    /// Constructs a repository from a migrated connection and explicit config.
    ///
    /// # Errors
    /// - `Config` when the config fails validation.
    /// - `UninitializedConnection` / `MissingRequired*` when the schema is not ready.
    pub fn try_with_config(conn: &'conn Connection, config: StoreConfig) -> RepoResult<Self> {
        config.validate()?;
        ensure_user_connection_ready(conn, &config.logic_delete_column)?;
        let id_generator = SnowflakeGenerator::new(config.worker_id)?;
        let select_sql = format!(
            "SELECT id, name, age, email, created_at, updated_at, version, {flag} AS deleted
             FROM {USER_TABLE}",
            flag = config.logic_delete_column
        );

        Ok(Self {
            conn,
            config,
            fill: Box::new(TimestampFill::new(SystemClock)),
            id_generator: Box::new(id_generator),
            select_sql,
        })
    }

    /// Replaces the pre-insert / pre-update hook.
    pub fn with_fill_hook(mut self, fill: impl FillHook + 'conn) -> Self {
        self.fill = Box::new(fill);
        self
    }

    /// Replaces the primary key generator used when inserts carry no id.
    pub fn with_id_generator(mut self, id_generator: impl IdGenerator + 'conn) -> Self {
        self.id_generator = Box::new(id_generator);
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn flag_column(&self) -> &str {
        &self.config.logic_delete_column
    }

    fn live_flag(&self) -> Value {
        Value::Integer(self.config.logic_not_delete_value)
    }

    fn query_users(
        &self,
        conn: &Connection,
        sql: &str,
        binds: Vec<Value>,
    ) -> RepoResult<Vec<User>> {
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut users = Vec::new();
        while let Some(row) = rows.next()? {
            users.push(parse_user_row(row, &self.config)?);
        }
        Ok(users)
    }

    /// Live-row `WHERE` clause for `query` plus its bind values.
    fn live_where(&self, query: &UserQuery) -> (String, Vec<Value>) {
        let mut sql = format!(" WHERE {} = ?", self.flag_column());
        let mut binds = vec![self.live_flag()];
        for condition in query.conditions() {
            push_condition(&mut sql, &mut binds, condition);
        }
        (sql, binds)
    }

    fn count_in(&self, conn: &Connection, query: &UserQuery) -> RepoResult<u64> {
        let (where_sql, binds) = self.live_where(query);
        let sql = format!("SELECT COUNT(*) FROM {USER_TABLE}{where_sql};");
        let total: i64 = conn.query_row(&sql, params_from_iter(binds), |row| row.get(0))?;
        u64::try_from(total).map_err(|_| RepoError::InvalidData(format!("negative count {total}")))
    }
}

impl UserRepository for SqliteUserRepository<'_> {
    fn get(&self, id: UserId) -> RepoResult<User> {
        let sql = format!(
            "{} WHERE id = ?1 AND {} = ?2;",
            self.select_sql,
            self.flag_column()
        );
        let user = self
            .conn
            .query_row(&sql, params![id, self.config.logic_not_delete_value], |row| {
                Ok(parse_user_row(row, &self.config))
            })
            .optional()?
            .transpose()?;

        debug!(
            "event=user_get module=repo status={} id={id}",
            if user.is_some() { "ok" } else { "not_found" }
        );
        user.ok_or(RepoError::NotFound(id))
    }

    fn get_including_deleted(&self, id: UserId) -> RepoResult<Option<User>> {
        let sql = format!("{} WHERE id = ?1;", self.select_sql);
        let user = self
            .conn
            .query_row(&sql, [id], |row| Ok(parse_user_row(row, &self.config)))
            .optional()?
            .transpose()?;
        Ok(user)
    }

    fn get_batch(&self, ids: &[UserId]) -> RepoResult<Vec<User>> {
        let unique: Vec<UserId> = ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut users = Vec::with_capacity(unique.len());

        for chunk in unique.chunks(BATCH_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "{} WHERE {} = ? AND id IN ({placeholders}) ORDER BY id ASC;",
                self.select_sql,
                self.flag_column()
            );
            let mut binds = Vec::with_capacity(chunk.len() + 1);
            binds.push(self.live_flag());
            binds.extend(chunk.iter().map(|id| Value::Integer(*id)));
            users.extend(self.query_users(self.conn, &sql, binds)?);
        }

        debug!(
            "event=user_get_batch module=repo status=ok requested={} found={}",
            unique.len(),
            users.len()
        );
        Ok(users)
    }

    fn query(&self, query: &UserQuery) -> RepoResult<Vec<User>> {
        query.validate()?;
        let (where_sql, binds) = self.live_where(query);
        let sql = format!("{}{where_sql} ORDER BY id ASC;", self.select_sql);
        let users = self.query_users(self.conn, &sql, binds)?;

        debug!(
            "event=user_query module=repo status=ok conditions={} rows={}",
            query.conditions().len(),
            users.len()
        );
        Ok(users)
    }

    fn count(&self, query: &UserQuery) -> RepoResult<u64> {
        query.validate()?;
        self.count_in(self.conn, query)
    }

    fn query_page(&self, request: &PageRequest, query: &UserQuery) -> RepoResult<Page> {
        let invalid_page = || RepoError::InvalidPage {
            page: request.page,
            size: request.size,
        };
        if !request.is_valid() {
            return Err(invalid_page());
        }
        if let Some(max) = self.config.max_page_size {
            if request.size > i64::from(max) {
                return Err(invalid_page());
            }
        }
        query.validate()?;

        let size = request.size;
        let offset = (request.page - 1)
            .checked_mul(size)
            .ok_or_else(invalid_page)?;

        // Count and window read share one snapshot.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Deferred)?;
        let total = if request.count_total {
            Some(self.count_in(&tx, query)?)
        } else {
            None
        };

        let records = if total == Some(0) {
            Vec::new()
        } else {
            let (where_sql, mut binds) = self.live_where(query);
            let sql = format!(
                "{}{where_sql} ORDER BY id ASC LIMIT ? OFFSET ?;",
                self.select_sql
            );
            binds.push(Value::Integer(size));
            binds.push(Value::Integer(offset));
            self.query_users(&tx, &sql, binds)?
        };
        tx.commit()?;

        debug!(
            "event=user_query_page module=repo status=ok page={} size={size} rows={} total={:?}",
            request.page,
            records.len(),
            total
        );
        Ok(Page {
            records,
            total,
            page: request.page,
            size,
        })
    }

    fn insert(&self, new_user: &NewUser) -> RepoResult<UserId> {
        new_user.validate()?;

        let id = match new_user.id {
            Some(id) => id,
            None => self.id_generator.next_id()?,
        };
        let mut user = User {
            id,
            name: new_user.name.clone(),
            age: new_user.age,
            email: new_user.email.clone(),
            created_at: 0,
            updated_at: 0,
            version: new_user.version.unwrap_or(self.config.initial_version),
            deleted: false,
        };
        self.fill.before_insert(&mut user);
        user.validate()?;

        let sql = format!(
            "INSERT INTO {USER_TABLE} (
                id,
                name,
                age,
                email,
                created_at,
                updated_at,
                version,
                {flag}
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            flag = self.flag_column()
        );
        self.conn.execute(
            &sql,
            params![
                user.id,
                user.name.as_str(),
                user.age,
                user.email.as_deref(),
                user.created_at,
                user.updated_at,
                user.version,
                self.config.logic_not_delete_value,
            ],
        )?;

        debug!(
            "event=user_insert module=repo status=ok id={} version={} generated_id={}",
            user.id,
            user.version,
            new_user.id.is_none()
        );
        Ok(user.id)
    }

    fn update_conditional(&self, user: &User) -> RepoResult<bool> {
        let mut staged = user.clone();
        self.fill.before_update(&mut staged);
        staged.validate()?;
        let next_version = staged.next_version()?;

        let sql = format!(
            "UPDATE {USER_TABLE}
             SET
                name = ?1,
                age = ?2,
                email = ?3,
                updated_at = MAX(created_at, ?4),
                version = ?8
             WHERE id = ?5
               AND version = ?6
               AND {flag} = ?7;",
            flag = self.flag_column()
        );
        let changed = self.conn.execute(
            &sql,
            params![
                staged.name.as_str(),
                staged.age,
                staged.email.as_deref(),
                staged.updated_at,
                staged.id,
                staged.version,
                self.config.logic_not_delete_value,
                next_version,
            ],
        )?;

        if changed == 0 {
            warn!(
                "event=user_update module=repo status=conflict id={} expected_version={}",
                user.id, user.version
            );
            return Ok(false);
        }

        debug!(
            "event=user_update module=repo status=ok id={} version={next_version}",
            user.id
        );
        Ok(true)
    }

    fn delete_logical(&self, id: UserId) -> RepoResult<usize> {
        let sql = format!(
            "UPDATE {USER_TABLE} SET {flag} = ?1 WHERE id = ?2 AND {flag} = ?3;",
            flag = self.flag_column()
        );
        let changed = self.conn.execute(
            &sql,
            params![
                self.config.logic_delete_value,
                id,
                self.config.logic_not_delete_value
            ],
        )?;

        debug!("event=user_delete module=repo status=ok id={id} changed={changed}");
        Ok(changed)
    }
}

fn push_condition(sql: &mut String, binds: &mut Vec<Value>, condition: &Condition) {
    let column = condition.column().name();
    let operator = match condition {
        Condition::Eq(..) => "=",
        Condition::Ne(..) => "<>",
        Condition::Ge(..) => ">=",
        Condition::Gt(..) => ">",
        Condition::Le(..) => "<=",
        Condition::Lt(..) => "<",
        Condition::IsNull(_) => {
            sql.push_str(&format!(" AND {column} IS NULL"));
            return;
        }
        Condition::IsNotNull(_) => {
            sql.push_str(&format!(" AND {column} IS NOT NULL"));
            return;
        }
    };
    sql.push_str(&format!(" AND {column} {operator} ?"));
    if let Some(value) = condition.value() {
        binds.push(field_value_to_db(value));
    }
}

fn field_value_to_db(value: &FieldValue) -> Value {
    match value {
        FieldValue::Integer(value) => Value::Integer(*value),
        FieldValue::Text(value) => Value::Text(value.clone()),
    }
}

fn parse_user_row(row: &Row<'_>, config: &StoreConfig) -> RepoResult<User> {
    let flag: i64 = row.get("deleted")?;
    let deleted = if flag == config.logic_delete_value {
        true
    } else if flag == config.logic_not_delete_value {
        false
    } else {
        return Err(RepoError::InvalidData(format!(
            "invalid flag value `{flag}` in {USER_TABLE}.{}",
            config.logic_delete_column
        )));
    };

    let user = User {
        id: row.get("id")?,
        name: row.get("name")?,
        age: row.get("age")?,
        email: row.get("email")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        version: row.get("version")?,
        deleted,
    };
    user.validate()
        .map_err(|err| RepoError::InvalidData(format!("user {}: {err}", user.id)))?;
    Ok(user)
}

fn ensure_user_connection_ready(conn: &Connection, flag_column: &str) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, USER_TABLE)? {
        return Err(RepoError::MissingRequiredTable(USER_TABLE));
    }

    let columns = table_columns(conn, USER_TABLE)?;
    for column in DATA_COLUMNS.into_iter().chain([flag_column]) {
        if !columns.iter().any(|existing| existing == column) {
            return Err(RepoError::MissingRequiredColumn {
                table: USER_TABLE,
                column: column.to_string(),
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_columns(conn: &Connection, table: &str) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get::<_, String>(1)?);
    }
    Ok(columns)
}
