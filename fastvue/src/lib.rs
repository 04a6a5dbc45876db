//! # fastvue: backend for the FastVue full-stack template
//!
//! `fastvue` is a starter web backend: password login issuing JWT access tokens, a user
//! management resource, and a supervised lifecycle around the PostgreSQL connection pool.
//!
//! ## Overview
//!
//! Most of the code in a starter backend is routing and CRUD, which axum and sqlx already make
//! short. What is easy to get wrong is everything around the database: a pool that opens sockets
//! before the database exists, units of work that half-commit when a request is cancelled,
//! startup that hangs forever or crashes on a fresh machine, and driver errors that leak into
//! HTTP responses. This crate makes those parts explicit.
//!
//! ## Architecture
//!
//! ### The database lifecycle
//!
//! A single [`db::engine::Engine`] owns the bounded connection pool. It is created once in
//! [`Application::new`], passed around by clone, and disposed exactly once when the server has
//! drained. Handlers never touch the pool directly: they get connections and transactions from
//! the [`db::session::SessionFactory`] in [`AppState`]. A [`db::session::Session`] commits only
//! when asked; dropping it (an error path, or the client going away mid-request) rolls back and
//! returns the connection.
//!
//! At startup the [`lifecycle::Orchestrator`] probes the database with a
//! [`db::health::DatabaseProber`]. What happens next depends on the deployment mode: in strict
//! mode (the default for production) an unhealthy database aborts startup with a classified
//! error; in permissive mode the server starts degraded and applies the embedded migrations.
//!
//! ### Request flow
//!
//! Requests to `{api_path}/*` are routed to the handlers in [`api::handlers`]. Protected routes
//! take a [`api::models::users::CurrentUser`] (or [`auth::current_user::SuperUser`]) extractor
//! which validates the bearer token and loads the user. Every failure, from a malformed JSON body
//! to a unique-constraint violation, ends up as an [`errors::Error`] and is rendered by
//! [`errors::translate`] into one stable JSON envelope.
//!
//! ### Background tasks
//!
//! When metrics are enabled, a sampler publishes pool gauges until the shutdown token is
//! cancelled.
//!
//! ## Configuration
//!
//! See [`config`] for the YAML file and `FASTVUE_*` / `DB_*` environment variables.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod lifecycle;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use std::{sync::Arc, sync::OnceLock, time::Duration};

use axum::{
    Router,
    http::{self, HeaderValue, Method},
    middleware::from_fn,
    routing::{get, post},
};
use axum_prometheus::{PrometheusMetricLayer, metrics_exporter_prometheus::PrometheusHandle};
use bon::Builder;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, error, info, instrument, warn};

pub use config::Config;
pub use types::UserId;

use crate::{
    api::handlers::{auth as auth_routes, health, private, users},
    auth::password,
    config::DeploymentMode,
    db::{
        engine::Engine,
        handlers::{Repository, Users},
        health::{DatabaseProber, HealthProbe},
        metrics::{PoolMetricsConfig, run_pool_metrics_sampler},
        models::users::{UserCreateDBRequest, UserUpdateDBRequest},
        session::SessionFactory,
    },
    errors::Error,
    lifecycle::{EmbeddedMigrations, Orchestrator},
};

/// Application state shared across all request handlers.
///
/// # Fields
///
/// - `config`: Application configuration, loaded once at startup
/// - `engine`: The process-wide pool handle
/// - `sessions`: Session factory over the engine's pool; handlers go through this
/// - `prober`: Health prober used by the health endpoints
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .sessions(engine.sessions())
///     .prober(Arc::new(DatabaseProber::new(engine.clone())))
///     .engine(engine)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub engine: Engine,
    pub sessions: SessionFactory,
    pub prober: Arc<dyn HealthProbe>,
}

/// Get the fastvue database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create the initial superuser if it doesn't exist.
///
/// Idempotent: an existing account keeps its id, and only has its password reset if the
/// configured one no longer verifies.
#[instrument(skip_all, err)]
pub async fn create_initial_superuser(email: &str, password: &str, sessions: &SessionFactory) -> Result<UserId, Error> {
    let email = email.to_string();
    let password = password.to_string();

    sessions
        .scope::<_, Error, _>(move |conn| {
            Box::pin(async move {
                let mut users = Users::new(conn);

                if let Some(existing) = users.get_user_by_email(&email).await? {
                    if !password::verify_password(password.clone(), existing.hashed_password.clone()).await? {
                        let hashed_password = password::hash_password(password).await?;
                        users
                            .update(
                                existing.id,
                                &UserUpdateDBRequest {
                                    hashed_password: Some(hashed_password),
                                    ..Default::default()
                                },
                            )
                            .await?;
                        info!("Reset initial superuser password");
                    }
                    return Ok(existing.id);
                }

                let hashed_password = password::hash_password(password).await?;
                let user = users
                    .create(&UserCreateDBRequest {
                        email,
                        hashed_password,
                        full_name: None,
                        is_active: true,
                        is_superuser: true,
                        is_verified: true,
                    })
                    .await?;
                info!(user_id = %user.id, "Created initial superuser");
                Ok(user.id)
            })
        })
        .await
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.cors;

    let allow_origin = if cors_config.allowed_origins.iter().any(|origin| origin == "*") {
        if cors_config.allow_credentials {
            anyhow::bail!("cors: a wildcard origin cannot be combined with allow_credentials");
        }
        AllowOrigin::any()
    } else {
        let origins = cors_config
            .allowed_origins
            .iter()
            .map(|origin| origin.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(cors_config.allow_credentials)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// The Prometheus recorder is process-global, so it is installed at most once
fn prometheus_pair() -> (PrometheusMetricLayer<'static>, PrometheusHandle) {
    static PAIR: OnceLock<(PrometheusMetricLayer<'static>, PrometheusHandle)> = OnceLock::new();
    PAIR.get_or_init(PrometheusMetricLayer::pair).clone()
}

/// Build the main application router with all endpoints and middleware.
///
/// - API routes nested under `api_path` (private routes only in local and staging)
/// - Health routes at the root
/// - Optional Prometheus metrics at `/internal/metrics`
/// - Error envelope rendering, CORS and tracing middleware
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let mut api_routes = Router::new()
        .route("/auth/login/access-token", post(auth_routes::login_access_token))
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/me", get(users::get_current_user))
        .route(
            "/users/{user_id}",
            get(users::get_user).patch(users::update_user).delete(users::delete_user),
        );

    if state.config.private_routes_enabled() {
        api_routes = api_routes.route("/private/users", post(private::create_user));
    } else {
        debug!(environment = %state.config.environment, "Private routes not mounted");
    }

    let mut router = Router::new()
        .nest(&state.config.api_path, api_routes)
        .route("/health", get(health::health))
        .route("/health/database", get(health::database_health))
        .fallback(errors::route_not_found)
        .with_state(state.clone());

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = prometheus_pair();
        router = router
            .route("/internal/metrics", get(move || async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router
        .layer(from_fn(errors::render_errors))
        .layer(create_cors_layer(&state.config)?)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

/// Main application struct that owns all resources and the lifecycle.
///
/// # Lifecycle
///
/// 1. **Startup**: [`Application::new`] builds the engine, runs the startup health check,
///    applies migrations where allowed, creates the first superuser and builds the router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests
/// 3. **Shutdown**: when the shutdown future resolves, in-flight requests drain, background
///    tasks stop and the engine is disposed
pub struct Application {
    router: Router,
    app_state: AppState,
    orchestrator: Orchestrator,
    shutdown_token: CancellationToken,
    background_tasks: Vec<JoinHandle<()>>,
}

impl Application {
    /// Create a new application instance from configuration
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let engine = Engine::initialize(&config.database)?;
        Self::new_with_engine(config, engine).await
    }

    /// Create a new application instance over an existing engine
    pub async fn new_with_engine(config: Config, engine: Engine) -> anyhow::Result<Self> {
        debug!("Starting with configuration: {:#?}", config);

        let prober: Arc<dyn HealthProbe> = Arc::new(DatabaseProber::new(engine.clone()));
        let mut orchestrator = Orchestrator::builder()
            .probe(prober.clone())
            .schema(Arc::new(EmbeddedMigrations::new(engine.clone())))
            .mode(config.deployment_mode())
            .health_check_on_startup(config.health_check_on_startup)
            .database_name(config.database.name.clone())
            .build();

        let outcome = match orchestrator.startup().await {
            Ok(outcome) => outcome,
            Err(e) => {
                engine.dispose().await;
                return Err(e.into());
            }
        };

        let app_state = AppState::builder()
            .config(config.clone())
            .sessions(engine.sessions())
            .prober(prober)
            .engine(engine.clone())
            .build();

        if let Some(superuser) = &config.first_superuser {
            if outcome.schema_ready {
                if let Err(e) = create_initial_superuser(&superuser.email, &superuser.password, &app_state.sessions).await {
                    if orchestrator.mode() == DeploymentMode::Strict {
                        engine.dispose().await;
                        return Err(e.into());
                    }
                    warn!(error = %e, "Could not create the initial superuser");
                }
            } else {
                warn!("Schema is not in place, skipping initial superuser creation");
            }
        }

        let router = match build_router(&app_state) {
            Ok(router) => router,
            Err(e) => {
                engine.dispose().await;
                return Err(e);
            }
        };

        let shutdown_token = CancellationToken::new();
        let mut background_tasks = Vec::new();
        if config.enable_metrics {
            let engine = engine.clone();
            let token = shutdown_token.clone();
            background_tasks.push(tokio::spawn(async move {
                if let Err(e) = run_pool_metrics_sampler(engine, PoolMetricsConfig::default(), token).await {
                    error!(error = %e, "Pool metrics sampler failed");
                }
            }));
        }

        Ok(Self {
            router,
            app_state,
            orchestrator,
            shutdown_token,
            background_tasks,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.app_state
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, AppState) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.app_state)
    }

    /// Start serving the application
    pub async fn serve<F>(mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.app_state.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("{} listening on http://{}", self.app_state.config.app_name, bind_addr);

        self.orchestrator.mark_running()?;

        let served = axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await;

        // Stop background tasks and wait for them to finish
        self.shutdown_token.cancel();
        for handle in self.background_tasks {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task did not shut down cleanly");
            }
        }

        info!("Closing database connections...");
        self.orchestrator.shutdown(&self.app_state.engine).await?;

        served?;
        Ok(())
    }
}
