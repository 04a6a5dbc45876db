//! Database health probing.
//!
//! [`DatabaseProber`] runs a liveness query over a pooled connection and then looks at the
//! migration-tracking table, producing a [`HealthReport`]. It only reads: it never creates the
//! database, the schema or the tracking table.
//!
//! The [`HealthProbe`] trait is the seam the startup orchestrator and the wait-for-database
//! retry loop depend on, so they can be exercised without a server.

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use sqlx::PgConnection;
use tracing::{debug, instrument, warn};

use crate::db::{engine::Engine, errors::DbError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Ok,
    Failed,
    Unknown,
}

/// Whether the target database exists: `true`, `false` or `"unknown"` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseExists {
    Yes,
    No,
    Unknown,
}

impl Serialize for DatabaseExists {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DatabaseExists::Yes => serializer.serialize_bool(true),
            DatabaseExists::No => serializer.serialize_bool(false),
            DatabaseExists::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Ok,
    NotInitialized,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthErrorType {
    DatabaseNotFound,
    ConnectionFailed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub status: MigrationStatus,
    pub version: Option<String>,
    pub message: Option<String>,
}

/// Outcome of one probe. Built fresh each time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub connection: ConnectionStatus,
    pub database_exists: DatabaseExists,
    pub migrations: MigrationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<HealthErrorType>,
    pub message: String,
    pub suggestions: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Missing database needs a human; retrying will not help.
    pub fn is_database_missing(&self) -> bool {
        self.error_type == Some(HealthErrorType::DatabaseNotFound)
    }

    fn failed(error_type: HealthErrorType, database_exists: DatabaseExists, message: String, suggestions: Vec<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            connection: ConnectionStatus::Failed,
            database_exists,
            migrations: MigrationReport {
                status: MigrationStatus::Unknown,
                version: None,
                message: None,
            },
            error_type: Some(error_type),
            message,
            suggestions,
        }
    }
}

/// Remediation hints for a database that does not exist yet.
pub fn missing_database_suggestions(database: &str) -> Vec<String> {
    vec![
        format!("Create database: createdb {database}"),
        "Run: fastvue setup-db".to_string(),
        "Check DB_NAME and the database section of your configuration".to_string(),
    ]
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check_health(&self) -> HealthReport;
}

/// Probes the database behind an [`Engine`].
#[derive(Clone, Debug)]
pub struct DatabaseProber {
    engine: Engine,
}

impl DatabaseProber {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    async fn probe(&self) -> Result<MigrationReport, DbError> {
        let mut conn = self.engine.pool().acquire().await?;
        sqlx::query("SELECT 1").execute(&mut *conn).await?;
        self.migration_report(&mut conn).await
    }

    async fn migration_report(&self, conn: &mut PgConnection) -> Result<MigrationReport, DbError> {
        let table = self.engine.migrations_table();

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = $1)",
        )
        .bind(table)
        .fetch_one(&mut *conn)
        .await?;

        if !exists {
            return Ok(MigrationReport {
                status: MigrationStatus::NotInitialized,
                version: None,
                message: Some(format!(
                    "Migration table '{table}' not found. Run: fastvue setup-db (or start in permissive mode)"
                )),
            });
        }

        // The table name is a validated identifier, see DatabaseConfig::validate
        let latest = format!("SELECT MAX(version)::text FROM {table} WHERE success");
        match sqlx::query_scalar::<_, Option<String>>(&latest).fetch_one(&mut *conn).await {
            Ok(Some(version)) => Ok(MigrationReport {
                status: MigrationStatus::Ok,
                version: Some(version),
                message: None,
            }),
            Ok(None) => Ok(MigrationReport {
                status: MigrationStatus::NotInitialized,
                version: None,
                message: Some("No migrations have been applied".to_string()),
            }),
            // A tracking table in another tool's layout still counts as migrated
            Err(e) => match DbError::from(e) {
                err if err.is_unavailable() => Err(err),
                err => {
                    debug!(error = %err, table, "Migration table has no readable sqlx version");
                    Ok(MigrationReport {
                        status: MigrationStatus::Ok,
                        version: None,
                        message: Some(format!("Migration table '{table}' is present; its version is not readable")),
                    })
                }
            },
        }
    }

    fn classify(&self, err: DbError) -> HealthReport {
        let host = self.engine.host();
        let port = self.engine.port();

        match err {
            DbError::DatabaseNotFound { database } => {
                let database = if database.is_empty() { self.engine.database_name() } else { database };
                warn!(%database, "Database does not exist");
                HealthReport::failed(
                    HealthErrorType::DatabaseNotFound,
                    DatabaseExists::No,
                    format!("Database '{database}' does not exist on {host}:{port}"),
                    missing_database_suggestions(&database),
                )
            }
            DbError::Connection { .. } | DbError::Timeout => {
                warn!(error = %err, %host, port, "Database connection failed");
                HealthReport::failed(
                    HealthErrorType::ConnectionFailed,
                    DatabaseExists::Unknown,
                    format!("Cannot connect to database server at {host}:{port}"),
                    vec![
                        format!("Check that PostgreSQL is running and accepting connections on {host}:{port}"),
                        "Verify DB_HOST, DB_PORT and credentials".to_string(),
                    ],
                )
            }
            other => {
                warn!(error = %other, "Database health check failed");
                HealthReport::failed(
                    HealthErrorType::Unknown,
                    DatabaseExists::Unknown,
                    "Unexpected error during database health check".to_string(),
                    vec!["Check the server logs for details".to_string()],
                )
            }
        }
    }
}

#[async_trait]
impl HealthProbe for DatabaseProber {
    #[instrument(skip_all, fields(target = %self.engine.target()))]
    async fn check_health(&self) -> HealthReport {
        let report = match self.probe().await {
            Ok(migrations) => {
                let (status, message) = match migrations.status {
                    MigrationStatus::Ok => (HealthStatus::Healthy, "Database is healthy".to_string()),
                    _ => (
                        HealthStatus::Degraded,
                        "Database is reachable but the schema is not up to date".to_string(),
                    ),
                };
                let suggestions = match migrations.status {
                    MigrationStatus::Ok => Vec::new(),
                    _ => vec!["Run: fastvue setup-db".to_string()],
                };

                HealthReport {
                    status,
                    connection: ConnectionStatus::Ok,
                    database_exists: DatabaseExists::Yes,
                    migrations,
                    error_type: None,
                    message,
                    suggestions,
                }
            }
            Err(err) => self.classify(err),
        };

        debug!(status = ?report.status, "Database health probed");
        report
    }
}
