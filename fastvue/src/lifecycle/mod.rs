//! Startup and shutdown orchestration around the database.
//!
//! ```text
//! Booting → HealthChecking ─┬→ Ready ─────────┬→ Running → ShuttingDown → Stopped
//!                           ├→ DegradedReady ─┘
//!                           └→ Failed
//! ```
//!
//! The [`Orchestrator`] probes the database once at startup and decides, based on the
//! [`DeploymentMode`], whether the server may start. In permissive mode an unhealthy database is
//! logged and the embedded migrations are applied; in strict mode startup aborts and the server
//! never accepts a request. Shutdown disposes the engine exactly once.

pub mod setup;
pub mod wait;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bon::Builder;
use sqlx::migrate::MigrateError;
use tracing::{error, info, instrument, warn};

use crate::{
    config::DeploymentMode,
    db::{
        engine::Engine,
        errors::DbError,
        health::{HealthErrorType, HealthProbe, HealthReport, HealthStatus},
    },
    errors::Error,
};

pub use wait::wait_for_database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Booting,
    HealthChecking,
    Ready,
    DegradedReady,
    Failed,
    Running,
    ShuttingDown,
    Stopped,
}

impl LifecycleState {
    fn can_advance_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Booting, HealthChecking)
                | (HealthChecking, Ready | DegradedReady | Failed)
                | (Ready | DegradedReady, Running)
                | (Running, ShuttingDown)
                | (ShuttingDown, Stopped)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Creates or upgrades the schema. Must be idempotent.
#[async_trait]
pub trait SchemaManager: Send + Sync {
    async fn ensure_schema(&self) -> Result<(), Error>;
}

/// Applies the migrations embedded in the binary.
#[derive(Clone, Debug)]
pub struct EmbeddedMigrations {
    engine: Engine,
}

impl EmbeddedMigrations {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl SchemaManager for EmbeddedMigrations {
    #[instrument(skip_all, err)]
    async fn ensure_schema(&self) -> Result<(), Error> {
        crate::migrator().run(self.engine.pool()).await.map_err(|e| match e {
            MigrateError::Execute(err) => match DbError::from(err) {
                db_err if db_err.is_unavailable() => Error::Database(db_err),
                db_err => Error::Migration {
                    message: db_err.to_string(),
                },
            },
            other => Error::Migration {
                message: other.to_string(),
            },
        })?;

        info!("Database migrations applied");
        Ok(())
    }
}

/// What startup found out, for the caller to act on.
#[derive(Debug, Clone)]
pub struct StartupOutcome {
    /// `None` when the startup check is disabled
    pub health: Option<HealthReport>,
    /// The schema is known, or assumed, to be in place
    pub schema_ready: bool,
}

/// Drives the lifecycle state machine for one process.
///
/// ```ignore
/// let mut orchestrator = Orchestrator::builder()
///     .probe(Arc::new(DatabaseProber::new(engine.clone())))
///     .schema(Arc::new(EmbeddedMigrations::new(engine.clone())))
///     .mode(config.deployment_mode())
///     .database_name(&config.database.name)
///     .build();
/// ```
#[derive(Builder)]
pub struct Orchestrator {
    probe: Arc<dyn HealthProbe>,
    schema: Arc<dyn SchemaManager>,
    mode: DeploymentMode,
    #[builder(default = true)]
    health_check_on_startup: bool,
    /// Reported in the error when the database is missing
    #[builder(into, default)]
    database_name: String,
    #[builder(skip = LifecycleState::Booting)]
    state: LifecycleState,
    #[builder(skip = vec![LifecycleState::Booting])]
    history: Vec<LifecycleState>,
}

impl Orchestrator {
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Every state visited so far, in order
    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    fn advance(&mut self, next: LifecycleState) -> Result<(), Error> {
        if !self.state.can_advance_to(next) {
            return Err(Error::Internal {
                operation: format!("move lifecycle from {} to {}", self.state, next),
            });
        }
        info!(from = %self.state, to = %next, "Lifecycle transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Probe the database and decide whether the server may start. On success the state is
    /// `Ready` or `DegradedReady`; in strict mode an unhealthy database ends in `Failed` and
    /// returns the classified error.
    #[instrument(skip_all, fields(mode = ?self.mode), err)]
    pub async fn startup(&mut self) -> Result<StartupOutcome, Error> {
        self.advance(LifecycleState::HealthChecking)?;

        let health = if self.health_check_on_startup {
            let report = self.probe.check_health().await;
            Some(report)
        } else {
            info!("Startup health check disabled, assuming the database is ready");
            None
        };

        let healthy = health.as_ref().is_none_or(HealthReport::is_healthy);

        if healthy {
            self.advance(LifecycleState::Ready)?;
        } else if let Some(report) = &health {
            match self.mode {
                DeploymentMode::Permissive => {
                    warn!(
                        status = ?report.status,
                        error_type = ?report.error_type,
                        suggestions = ?report.suggestions,
                        "Database is not healthy, continuing in permissive mode: {}",
                        report.message
                    );
                    self.advance(LifecycleState::DegradedReady)?;
                }
                DeploymentMode::Strict => {
                    error!(
                        status = ?report.status,
                        error_type = ?report.error_type,
                        "Database is not healthy, refusing to start in strict mode: {}",
                        report.message
                    );
                    self.advance(LifecycleState::Failed)?;
                    return Err(startup_error(report, &self.database_name));
                }
            }
        }

        // Schema creation only ever happens in permissive mode
        let schema_ready = match self.mode {
            DeploymentMode::Permissive => match self.schema.ensure_schema().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Could not create the database schema, serving anyway");
                    false
                }
            },
            DeploymentMode::Strict => healthy,
        };

        Ok(StartupOutcome { health, schema_ready })
    }

    /// Control passes to the HTTP server.
    pub fn mark_running(&mut self) -> Result<(), Error> {
        self.advance(LifecycleState::Running)
    }

    /// Dispose the engine and stop. Called once the server has drained.
    #[instrument(skip_all)]
    pub async fn shutdown(&mut self, engine: &Engine) -> Result<(), Error> {
        self.advance(LifecycleState::ShuttingDown)?;
        engine.dispose().await;
        self.advance(LifecycleState::Stopped)
    }
}

/// The error a strict-mode startup fails with, by failure type
fn startup_error(report: &HealthReport, database: &str) -> Error {
    match (report.status, report.error_type) {
        (_, Some(HealthErrorType::DatabaseNotFound)) => Error::DatabaseNotFound {
            database: database.to_string(),
        },
        (HealthStatus::Degraded, _) => Error::Migration {
            message: report
                .migrations
                .message
                .clone()
                .unwrap_or_else(|| report.message.clone()),
        },
        _ => Error::DatabaseConnection {
            message: report.message.clone(),
        },
    }
}
