//! Development database setup: create the database if it is missing, then migrate.

use sqlx::{Connection, Executor, PgConnection, postgres::PgConnectOptions};
use tracing::{info, instrument, warn};

use crate::{
    config::{Config, DeploymentMode},
    db::{
        engine::Engine,
        errors::DbError,
        health::{DatabaseProber, HealthProbe, HealthReport},
    },
    errors::Error,
    lifecycle::{EmbeddedMigrations, SchemaManager},
};

/// Run the full setup against the configured database. Refused in strict deployment mode.
#[instrument(skip_all, fields(target = %config.database.target()), err)]
pub async fn setup_database(config: &Config) -> Result<HealthReport, Error> {
    if config.deployment_mode() == DeploymentMode::Strict {
        return Err(Error::Configuration {
            message: "setup-db creates databases and is refused in strict deployment mode".to_string(),
        });
    }

    let engine = Engine::initialize(&config.database)?;
    let result = run_setup(&engine, &config.database.maintenance_connect_options()).await;
    engine.dispose().await;
    result
}

/// Probe, create the database through `maintenance` if it does not exist, migrate, and probe
/// again. Returns the final report if it is healthy.
pub async fn run_setup(engine: &Engine, maintenance: &PgConnectOptions) -> Result<HealthReport, Error> {
    let prober = DatabaseProber::new(engine.clone());

    let report = prober.check_health().await;
    if report.is_database_missing() {
        create_database(maintenance, &engine.database_name()).await?;
    } else if report.error_type.is_some() {
        return Err(Error::DatabaseConnection { message: report.message });
    } else {
        info!(status = ?report.status, "Database exists");
    }

    EmbeddedMigrations::new(engine.clone()).ensure_schema().await?;

    let report = prober.check_health().await;
    if report.is_healthy() {
        info!(version = ?report.migrations.version, "Database setup complete");
        Ok(report)
    } else {
        warn!(status = ?report.status, "Database still unhealthy after setup: {}", report.message);
        Err(Error::Migration { message: report.message })
    }
}

#[instrument(skip(maintenance), err)]
async fn create_database(maintenance: &PgConnectOptions, database: &str) -> Result<(), Error> {
    let mut conn = PgConnection::connect_with(maintenance).await.map_err(DbError::from)?;

    conn.execute(format!("CREATE DATABASE {}", quote_identifier(database)).as_str())
        .await
        .map_err(DbError::from)?;
    info!(database, "Created database");

    conn.close().await.map_err(DbError::from)?;
    Ok(())
}

/// Double-quote an identifier for use in DDL, escaping embedded quotes
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
