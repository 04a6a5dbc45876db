//! The process-wide connection pool.
//!
//! An [`Engine`] is constructed once at startup from [`DatabaseConfig`], shared by cloning
//! (clones share the same pool), and disposed once at shutdown. It is never a global: whoever
//! needs database access gets the engine, or a [`SessionFactory`] built from it, passed in.
//!
//! The pool connects lazily. Building an engine opens no sockets; the first acquire does.

use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use tracing::{info, instrument};

use crate::{config::DatabaseConfig, db::session::SessionFactory, errors::Error};

#[derive(Clone, Debug)]
pub struct Engine {
    pool: PgPool,
    target: String,
    migrations_table: String,
}

impl Engine {
    /// Build the pool for `config`. Fails only on invalid configuration.
    #[instrument(skip_all, fields(target = %config.target()), err)]
    pub fn initialize(config: &DatabaseConfig) -> Result<Self, Error> {
        Self::initialize_with(config, config.connect_options())
    }

    /// Like [`Engine::initialize`] but with explicit connection options. The pool settings
    /// still come from `config`.
    pub fn initialize_with(config: &DatabaseConfig, connect_options: PgConnectOptions) -> Result<Self, Error> {
        config.validate()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .test_before_acquire(config.pool_pre_ping)
            .max_lifetime(Some(config.pool_recycle()))
            .acquire_timeout(config.command_timeout())
            .connect_lazy_with(connect_options);

        info!(
            pool_size = config.pool_size,
            pre_ping = config.pool_pre_ping,
            recycle_seconds = config.pool_recycle_seconds,
            "Database engine initialized"
        );

        Ok(Self {
            pool,
            target: config.target(),
            migrations_table: config.migrations_table.clone(),
        })
    }

    /// Wrap an existing pool, e.g. one handed out by `#[sqlx::test]`.
    pub fn from_pool(pool: PgPool, migrations_table: impl Into<String>) -> Self {
        let options = pool.connect_options();
        let target = format!(
            "{}:{}/{}",
            options.get_host(),
            options.get_port(),
            options.get_database().unwrap_or_default()
        );

        Self {
            pool,
            target,
            migrations_table: migrations_table.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn sessions(&self) -> SessionFactory {
        SessionFactory::new(self.pool.clone())
    }

    /// `host:port/database`, without credentials
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn host(&self) -> String {
        self.pool.connect_options().get_host().to_string()
    }

    pub fn port(&self) -> u16 {
        self.pool.connect_options().get_port()
    }

    pub fn database_name(&self) -> String {
        self.pool.connect_options().get_database().unwrap_or_default().to_string()
    }

    pub fn migrations_table(&self) -> &str {
        &self.migrations_table
    }

    /// Close every pooled connection. Waits for checked-out connections to be returned.
    /// Safe to call more than once; later calls do nothing.
    #[instrument(skip_all, fields(target = %self.target))]
    pub async fn dispose(&self) {
        if self.pool.is_closed() {
            return;
        }
        self.pool.close().await;
        info!("Database engine disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.pool.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: &str, port: u16) -> DatabaseConfig {
        DatabaseConfig {
            host: host.to_string(),
            port,
            name: "fastvue".to_string(),
            username: "postgres".to_string(),
            ..Default::default()
        }
    }

    /// Engine over the database `#[sqlx::test]` created, with our pool settings
    fn engine_for(pool: &PgPool, pool_size: u32) -> Engine {
        let options = pool.connect_options().as_ref().clone();
        let config = DatabaseConfig {
            pool_size,
            command_timeout_seconds: 5,
            ..config("localhost", 5432)
        };
        Engine::initialize_with(&config, options).unwrap()
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let mut bad = config("", 5432);
        assert!(matches!(Engine::initialize(&bad), Err(Error::Configuration { .. })));

        bad = config("localhost", 0);
        assert!(matches!(Engine::initialize(&bad), Err(Error::Configuration { .. })));

        bad = DatabaseConfig {
            pool_size: 0,
            ..config("localhost", 5432)
        };
        assert!(matches!(Engine::initialize(&bad), Err(Error::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_initialize_opens_no_connections() {
        // Nothing listens on port 1; a lazy pool must not care
        let engine = Engine::initialize(&config("127.0.0.1", 1)).unwrap();

        assert_eq!(engine.pool().size(), 0);
        assert_eq!(engine.target(), "127.0.0.1:1/fastvue");
        assert_eq!(engine.host(), "127.0.0.1");
        assert_eq!(engine.port(), 1);
        assert_eq!(engine.database_name(), "fastvue");
        assert!(!engine.is_disposed());

        engine.dispose().await;
        assert!(engine.is_disposed());
    }

    #[sqlx::test]
    async fn test_dispose_leaves_no_open_connections(pool: PgPool) {
        let engine = engine_for(&pool, 3);

        let mut conns = Vec::new();
        for _ in 0..2 {
            conns.push(engine.pool().acquire().await.unwrap());
        }
        assert_eq!(engine.pool().size(), 2);
        drop(conns);

        engine.dispose().await;
        assert!(engine.is_disposed());
        assert_eq!(engine.pool().size(), 0);

        // Idempotent
        engine.dispose().await;
        assert_eq!(engine.pool().size(), 0);
    }

    #[sqlx::test]
    async fn test_pool_size_is_bounded(pool: PgPool) {
        let engine = engine_for(&pool, 2);
        assert_eq!(engine.pool().options().get_max_connections(), 2);

        let _a = engine.pool().acquire().await.unwrap();
        let _b = engine.pool().acquire().await.unwrap();

        let third = tokio::time::timeout(std::time::Duration::from_millis(200), engine.pool().acquire()).await;
        assert!(third.is_err(), "third acquire should wait for a free connection");
    }

    #[sqlx::test]
    async fn test_clones_share_the_pool(pool: PgPool) {
        let engine = engine_for(&pool, 2);
        let clone = engine.clone();

        clone.dispose().await;
        assert!(engine.is_disposed());
    }
}
