//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `FASTVUE_CONFIG`
//! environment variable. A `.env` file is loaded into the process environment before any of this
//! happens (see `main.rs`).
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `FASTVUE_` override YAML values
//! 3. **DB_HOST, DB_PORT, DB_NAME, DB_USERNAME, DB_PASSWORD** - override `database.*`
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `FASTVUE_DATABASE__POOL_SIZE=20` sets the `database.pool_size` field.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use fastvue::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! FASTVUE_PORT=8080
//!
//! # Database connection, same names as the classic .env layout
//! DB_HOST=db.internal
//! DB_NAME=fastvue
//! DB_USERNAME=app
//! DB_PASSWORD=secret
//!
//! # Fail closed when the database is unhealthy at startup
//! FASTVUE_DEPLOYMENT_MODE=strict
//! ```

use clap::{Parser, Subcommand};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use std::time::Duration;

use crate::errors::Error;

/// CLI args: the config file plus an optional subcommand
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "FASTVUE_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Poll the database health until it is reachable, for container startup ordering.
    /// Exits non-zero if the database never becomes healthy.
    WaitForDb {
        /// Maximum number of health probes
        #[arg(long, default_value_t = 30)]
        max_retries: u32,
        /// Seconds to wait between probes
        #[arg(long, default_value_t = 2)]
        retry_interval: u64,
    },
    /// Create the development database if it is missing and apply migrations.
    /// Refused in strict deployment mode.
    SetupDb,
}

/// Where the process is deployed. Reported by the health endpoint and used to derive the
/// default [`DeploymentMode`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Staging,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Local => write!(f, "local"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// How startup reacts to an unhealthy database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Log a warning, create the schema if needed and serve anyway.
    Permissive,
    /// Abort startup; the server never accepts requests.
    Strict,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have defaults defined in the `Default` implementation; `secret_key`,
/// `database.name` and `database.username` must be supplied.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Application name reported by the health endpoint
    pub app_name: String,
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Prefix for the versioned API routes
    pub api_path: String,
    pub environment: Environment,
    /// Explicit deployment mode. When unset it is derived from `environment`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_mode: Option<DeploymentMode>,
    /// Probe the database before serving
    pub health_check_on_startup: bool,
    /// Secret used to sign access tokens (required)
    pub secret_key: Option<String>,
    /// Lifetime of issued access tokens
    pub access_token_expire_minutes: u64,
    /// Superuser created at startup if it does not exist yet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_superuser: Option<FirstSuperuser>,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    pub log_format: LogFormat,
}

/// Connection settings for the PostgreSQL pool.
///
/// These map one-to-one onto the engine handle: the pool is built from exactly these values
/// and nothing else.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    /// Database (catalog) name
    pub name: String,
    pub username: String,
    pub password: String,
    /// Maximum number of pooled connections
    pub pool_size: u32,
    /// Validate each connection with a ping before handing it out
    pub pool_pre_ping: bool,
    /// Close and reopen connections older than this (seconds)
    pub pool_recycle_seconds: u64,
    /// Per-statement timeout, also used as the pool acquire timeout (seconds)
    pub command_timeout_seconds: u64,
    /// Prepared statements cached per connection (0 disables the cache)
    pub statement_cache_capacity: usize,
    /// Table the migration tool records applied versions in
    pub migrations_table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            name: String::new(),
            username: String::new(),
            password: String::new(),
            pool_size: 10,
            pool_pre_ping: true,
            pool_recycle_seconds: 300,
            command_timeout_seconds: 30,
            statement_cache_capacity: 100,
            migrations_table: "_sqlx_migrations".to_string(),
        }
    }
}

impl DatabaseConfig {
    pub fn pool_recycle(&self) -> Duration {
        Duration::from_secs(self.pool_recycle_seconds)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    /// `host:port/name`, for log lines and health messages. Never includes credentials.
    pub fn target(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.name)
    }

    /// Connection options for the configured database.
    ///
    /// The command timeout is enforced server-side through `statement_timeout` so that a
    /// runaway statement is cancelled by PostgreSQL rather than left running.
    pub fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.name)
            .username(&self.username)
            .statement_cache_capacity(self.statement_cache_capacity)
            .options([("statement_timeout", format!("{}s", self.command_timeout_seconds))]);

        if self.password.is_empty() {
            options
        } else {
            options.password(&self.password)
        }
    }

    /// Connection options for the server's maintenance database, used to create the target
    /// database during development setup.
    pub fn maintenance_connect_options(&self) -> PgConnectOptions {
        self.connect_options().database("postgres")
    }

    /// Validate connection parameters. Shared by [`Config::validate`] and the engine, which
    /// may be initialized from a standalone `DatabaseConfig`.
    pub fn validate(&self) -> Result<(), Error> {
        let missing = [("host", &self.host), ("name", &self.name), ("username", &self.username)]
            .into_iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| format!("database.{field}"))
            .collect::<Vec<_>>();

        if !missing.is_empty() {
            return Err(Error::Configuration {
                message: format!("Missing database settings: {}", missing.join(", ")),
            });
        }

        if self.port == 0 {
            return Err(Error::Configuration {
                message: "database.port must be a valid TCP port".to_string(),
            });
        }

        if self.pool_size == 0 {
            return Err(Error::Configuration {
                message: "database.pool_size must be at least 1".to_string(),
            });
        }

        if self.pool_recycle_seconds == 0 {
            return Err(Error::Configuration {
                message: "database.pool_recycle_seconds must be at least 1".to_string(),
            });
        }

        if self.command_timeout_seconds == 0 {
            return Err(Error::Configuration {
                message: "database.command_timeout_seconds must be at least 1".to_string(),
            });
        }

        if !is_sql_identifier(&self.migrations_table) {
            return Err(Error::Configuration {
                message: format!(
                    "database.migrations_table '{}' is not a valid table name",
                    self.migrations_table
                ),
            });
        }

        Ok(())
    }
}

/// Lowercase letters, digits and underscores, not starting with a digit. The migration table
/// name is interpolated unquoted into the health probe, where PostgreSQL folds it to lowercase,
/// and looked up verbatim in `information_schema`, so nothing else is accepted.
fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FirstSuperuser {
    pub email: String,
    pub password: String,
}

/// CORS settings for browser clients.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any origin (incompatible with credentials)
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
    /// Cache duration for preflight requests in seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:5173".to_string()],
            allow_credentials: true,
            max_age: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "FastVue FullStack Template".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            api_path: "/api/v1".to_string(),
            environment: Environment::default(),
            deployment_mode: None,
            health_check_on_startup: true,
            secret_key: None,
            // 8 days
            access_token_expire_minutes: 60 * 24 * 8,
            first_superuser: None,
            database: DatabaseConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            // FASTVUE_CONFIG names the file itself and is read by clap
            .merge(Env::prefixed("FASTVUE_").ignore(&["config"]).split("__"))
            // The classic DB_* variables, mapped onto the nested database section
            .merge(
                Env::raw()
                    .only(&["DB_HOST", "DB_PORT", "DB_NAME", "DB_USERNAME", "DB_PASSWORD"])
                    .map(|key| {
                        let field = key.as_str().to_ascii_lowercase();
                        format!("database.{}", field.trim_start_matches("db_")).into()
                    }),
            )
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        match self.secret_key.as_deref() {
            Some(key) if !key.is_empty() => {}
            _ => {
                return Err(Error::Configuration {
                    message: "secret_key is not configured. Set FASTVUE_SECRET_KEY or add secret_key to the config file."
                        .to_string(),
                });
            }
        }

        if self.access_token_expire_minutes == 0 {
            return Err(Error::Configuration {
                message: "access_token_expire_minutes must be at least 1".to_string(),
            });
        }

        if !self.api_path.starts_with('/') || self.api_path.ends_with('/') {
            return Err(Error::Configuration {
                message: format!("api_path '{}' must start with '/' and not end with one", self.api_path),
            });
        }

        if self.environment == Environment::Production
            && self.secret_key.as_deref() == Some("change-me")
        {
            return Err(Error::Configuration {
                message: "secret_key still has the example value; refusing to run in production".to_string(),
            });
        }

        self.database.validate()
    }

    /// The effective deployment mode: explicit setting, else strict for production only.
    pub fn deployment_mode(&self) -> DeploymentMode {
        self.deployment_mode.unwrap_or(match self.environment {
            Environment::Production => DeploymentMode::Strict,
            Environment::Local | Environment::Staging => DeploymentMode::Permissive,
        })
    }

    /// Unauthenticated user creation is only mounted outside production
    pub fn private_routes_enabled(&self) -> bool {
        matches!(self.environment, Environment::Local | Environment::Staging)
    }

    pub fn access_token_expiry(&self) -> Duration {
        Duration::from_secs(self.access_token_expire_minutes * 60)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
            command: None,
        }
    }

    #[test]
    fn test_database_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: hello
database:
  name: fastvue
  username: postgres
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.database.host, "127.0.0.1");
            assert_eq!(config.database.port, 5432);
            assert_eq!(config.database.pool_size, 10);
            assert!(config.database.pool_pre_ping);
            assert_eq!(config.database.pool_recycle(), Duration::from_secs(300));
            assert_eq!(config.database.command_timeout(), Duration::from_secs(30));
            assert_eq!(config.database.migrations_table, "_sqlx_migrations");
            assert!(config.health_check_on_startup);
            assert_eq!(config.deployment_mode(), DeploymentMode::Permissive);

            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: hello
app_name: From Yaml
database:
  name: fastvue
  username: postgres
"#,
            )?;

            jail.set_env("FASTVUE_HOST", "127.0.0.1");
            jail.set_env("FASTVUE_PORT", "8080");
            jail.set_env("FASTVUE_DATABASE__POOL_SIZE", "25");

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.port, 8080);
            assert_eq!(config.database.pool_size, 25);
            // YAML values should be preserved
            assert_eq!(config.app_name, "From Yaml");

            Ok(())
        });
    }

    #[test]
    fn test_raw_db_variables_map_onto_database_section() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "secret_key: hello\n")?;

            jail.set_env("DB_HOST", "db.internal");
            jail.set_env("DB_PORT", "6543");
            jail.set_env("DB_NAME", "app");
            jail.set_env("DB_USERNAME", "app_user");
            jail.set_env("DB_PASSWORD", "s3cret");

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.database.host, "db.internal");
            assert_eq!(config.database.port, 6543);
            assert_eq!(config.database.name, "app");
            assert_eq!(config.database.username, "app_user");
            assert_eq!(config.database.password, "s3cret");
            assert_eq!(config.database.target(), "db.internal:6543/app");

            Ok(())
        });
    }

    #[test]
    fn test_production_defaults_to_strict() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: a-real-secret
environment: production
database:
  name: fastvue
  username: postgres
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;
            assert_eq!(config.deployment_mode(), DeploymentMode::Strict);
            assert!(!config.private_routes_enabled());

            jail.set_env("FASTVUE_DEPLOYMENT_MODE", "permissive");
            let config = Config::load(&args("test.yaml"))?;
            assert_eq!(config.deployment_mode(), DeploymentMode::Permissive);

            Ok(())
        });
    }

    #[test]
    fn test_config_file_variable_is_not_a_setting() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "custom.yaml",
                r#"
secret_key: hello
app_name: From Custom
database:
  name: fastvue
  username: postgres
"#,
            )?;

            jail.set_env("FASTVUE_CONFIG", "custom.yaml");

            let config = Config::load(&args("custom.yaml"))?;
            assert_eq!(config.app_name, "From Custom");

            Ok(())
        });
    }

    #[test]
    fn test_unknown_field_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: hello
database:
  name: fastvue
  username: postgres
  pool_sise: 3
"#,
            )?;

            assert!(Config::load(&args("test.yaml")).is_err());
            Ok(())
        });
    }

    fn valid_config() -> Config {
        Config {
            secret_key: Some("test-secret".to_string()),
            database: DatabaseConfig {
                name: "fastvue".to_string(),
                username: "postgres".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_config_validation_missing_secret() {
        let mut config = valid_config();
        config.secret_key = None;

        let result = config.validate();
        assert!(matches!(result, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_config_validation_missing_database_name() {
        let mut config = valid_config();
        config.database.name = String::new();
        config.database.username = " ".to_string();

        let err = config.validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("database.name"), "{message}");
        assert!(message.contains("database.username"), "{message}");
    }

    #[test]
    fn test_config_validation_pool_size() {
        let mut config = valid_config();
        config.database.pool_size = 0;
        assert!(matches!(config.validate(), Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_config_validation_migrations_table() {
        let mut config = valid_config();
        for bad in ["", "1table", "drop table users;", "schema.table", "Migrations"] {
            config.database.migrations_table = bad.to_string();
            assert!(config.validate().is_err(), "accepted {bad:?}");
        }

        config.database.migrations_table = "alembic_version".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_pool_recycle() {
        let mut config = valid_config();
        config.database.pool_recycle_seconds = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pool_recycle_seconds"), "{err}");
    }

    #[test]
    fn test_connect_options_carry_timeout_and_credentials() {
        let database = DatabaseConfig {
            host: "db.internal".to_string(),
            port: 6543,
            name: "app".to_string(),
            username: "app_user".to_string(),
            password: "s3cret".to_string(),
            command_timeout_seconds: 7,
            ..Default::default()
        };

        let options = database.connect_options();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("app"));
        assert_eq!(options.get_username(), "app_user");
        let server_options = options.get_options().unwrap_or_default();
        assert!(server_options.contains("statement_timeout=7s"), "{server_options}");

        let maintenance = database.maintenance_connect_options();
        assert_eq!(maintenance.get_database(), Some("postgres"));
        assert_eq!(maintenance.get_host(), "db.internal");
    }

    #[test]
    fn test_config_validation_api_path() {
        let mut config = valid_config();
        config.api_path = "api/v1".to_string();
        assert!(config.validate().is_err());
        config.api_path = "/api/v1/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_production_rejects_example_secret() {
        let mut config = valid_config();
        config.environment = Environment::Production;
        config.secret_key = Some("change-me".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_access_token_expiry() {
        let config = valid_config();
        assert_eq!(config.access_token_expiry(), Duration::from_secs(8 * 24 * 60 * 60));
    }
}
