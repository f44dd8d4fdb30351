// ABOUTME: SQLite persistence for projects, conversation messages and generated fragments
// ABOUTME: Owns the connection pool, embedded migrations and the shared storage error type

pub mod fragments;
pub mod messages;
pub mod projects;
pub mod types;

pub use fragments::FragmentStorage;
pub use messages::MessageStorage;
pub use projects::{ProjectStorage, DEFAULT_PROJECT_NAME};
pub use types::{
    Fragment, FileMap, Message, MessageRole, MessageType, MessageWithFragment, NewFragment,
    NewMessage, Project,
};
pub use sqlx::SqlitePool;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid timestamp in column {column}: {value}")]
    InvalidTimestamp { column: String, value: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Open a connection pool and apply pending migrations.
///
/// In-memory databases are pinned to a single connection, since every SQLite
/// connection to `:memory:` would otherwise see its own empty database.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let in_memory = database_url.contains(":memory:");
    let pool = SqlitePoolOptions::new()
        .max_connections(if in_memory { 1 } else { 5 })
        .connect_with(options)
        .await?;

    debug!("Running migrations for {}", database_url);
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Timestamps are stored as fixed-width RFC 3339 UTC strings so that SQL
/// comparisons and ordering on the text columns match chronological order.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StorageError::InvalidTimestamp {
            column: column.to_string(),
            value: value.to_string(),
        })
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(column, &v)).transpose()
}
