use thiserror::Error;

/// SQLSTATE for "database does not exist" (invalid_catalog_name)
pub const INVALID_CATALOG_NAME: &str = "3D000";
/// SQLSTATE raised when `statement_timeout` cancels a statement
pub const QUERY_CANCELED: &str = "57014";

/// Unified error type for database operations that application code can handle
#[derive(Error, Debug)]
pub enum DbError {
    /// Entity not found by the given identifier
    #[error("Entity not found")]
    NotFound,

    /// Unique constraint violation
    #[error("Unique constraint violation")]
    UniqueViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// Foreign key constraint violation
    #[error("Foreign key constraint violation")]
    ForeignKeyViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// Check constraint violation
    #[error("Check constraint violation")]
    CheckViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// The server is reachable but the target database does not exist
    #[error("Database '{database}' does not exist")]
    DatabaseNotFound { database: String },

    /// Server unreachable, connection refused or dropped, or the pool could not hand out a
    /// connection in time
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    /// A statement exceeded the configured command timeout
    #[error("Database statement timed out")]
    Timeout,

    /// Catch-all for non-recoverable errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DbError {
    /// Failures that mean the database itself is unavailable, as opposed to a problem with the
    /// statement or data.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            DbError::Connection { .. } | DbError::Timeout | DbError::DatabaseNotFound { .. }
        )
    }
}

/// Convert from sqlx::Error using proper sqlx error categorization
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) => {
                let code = db_err.code();
                if code.as_deref() == Some(INVALID_CATALOG_NAME) {
                    DbError::DatabaseNotFound {
                        database: quoted_name(db_err.message()).unwrap_or_default(),
                    }
                } else if code.as_deref() == Some(QUERY_CANCELED) {
                    DbError::Timeout
                } else if db_err.is_unique_violation() {
                    DbError::UniqueViolation {
                        constraint: db_err.constraint().map(|s| s.to_string()),
                        table: db_err.table().map(|s| s.to_string()),
                        message: db_err.message().to_string(),
                    }
                } else if db_err.is_foreign_key_violation() {
                    DbError::ForeignKeyViolation {
                        constraint: db_err.constraint().map(|s| s.to_string()),
                        table: db_err.table().map(|s| s.to_string()),
                        message: db_err.message().to_string(),
                    }
                } else if db_err.is_check_violation() {
                    DbError::CheckViolation {
                        constraint: db_err.constraint().map(|s| s.to_string()),
                        table: db_err.table().map(|s| s.to_string()),
                        message: db_err.message().to_string(),
                    }
                } else if code.as_deref().is_some_and(|c| c.starts_with("08")) {
                    // Class 08: connection exception
                    DbError::Connection {
                        message: db_err.message().to_string(),
                    }
                } else {
                    // All other database errors are non-recoverable - convert to anyhow
                    DbError::Other(anyhow::Error::from(err))
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => DbError::Connection { message: err.to_string() },
            // All other sqlx errors are non-recoverable - convert to anyhow with context
            _ => DbError::Other(anyhow::Error::from(err)),
        }
    }
}

/// Extract the first double-quoted name from a PostgreSQL message.
/// `database "fastvue" does not exist` -> `fastvue`
fn quoted_name(message: &str) -> Option<String> {
    let start = message.find('"')? + 1;
    let end = message[start..].find('"')?;
    Some(message[start..start + end].to_string())
}

/// Type alias for database operation results
pub type Result<T> = std::result::Result<T, DbError>;
