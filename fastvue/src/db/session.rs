//! Transactional units of work over the engine's pool.
//!
//! A [`Session`] is one pooled connection with an open transaction. Nothing is auto-committed:
//! writes become visible only when [`Session::commit`] succeeds. A session that is dropped
//! without committing (an early `?` return, a panic, or the request future being cancelled)
//! rolls back and its connection goes back to the pool.
//!
//! ```ignore
//! let user = state.sessions.scope(|conn| Box::pin(async move {
//!     Users::new(conn).create(&request).await
//! })).await?;
//! ```

use std::ops::{Deref, DerefMut};

use futures::future::BoxFuture;
use sqlx::{PgConnection, PgPool, Postgres, Transaction, pool::PoolConnection};
use tracing::{instrument, warn};

use crate::db::errors::DbError;

#[derive(Clone, Debug)]
pub struct SessionFactory {
    pool: PgPool,
}

impl SessionFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Acquire a connection and begin a transaction on it.
    #[instrument(skip_all, err)]
    pub async fn open(&self) -> Result<Session, DbError> {
        let tx = self.pool.begin().await?;
        Ok(Session { tx })
    }

    /// A plain pooled connection without a transaction, for single read-only statements.
    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>, DbError> {
        Ok(self.pool.acquire().await?)
    }

    /// Run `f` inside a session. Commits if `f` returns `Ok`, rolls back and returns the error
    /// otherwise. The connection is released in both cases.
    pub async fn scope<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T, E>>,
        E: From<DbError>,
    {
        let mut session = self.open().await?;

        match f(&mut *session).await {
            Ok(value) => {
                session.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = session.rollback().await {
                    // The transaction is gone either way; the original error is what matters
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

/// A pooled connection with an open transaction. Not `Clone`; statements need `&mut`.
#[derive(Debug)]
pub struct Session {
    tx: Transaction<'static, Postgres>,
}

impl Session {
    pub async fn commit(self) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), DbError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

impl Deref for Session {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.tx
    }
}

impl DerefMut for Session {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::DatabaseConfig, db::engine::Engine, errors::Error};
    use uuid::Uuid;

    async fn insert_user(conn: &mut PgConnection, email: &str) -> Result<(), DbError> {
        sqlx::query("INSERT INTO users (id, email, hashed_password) VALUES ($1, $2, 'x')")
            .bind(Uuid::new_v4())
            .bind(email)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn count_users(pool: &PgPool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM users").fetch_one(pool).await.unwrap()
    }

    /// Single-connection engine, so a leaked connection would make the next acquire time out
    fn single_connection_engine(pool: &PgPool) -> Engine {
        let config = DatabaseConfig {
            name: "fastvue".to_string(),
            username: "postgres".to_string(),
            pool_size: 1,
            command_timeout_seconds: 2,
            ..Default::default()
        };
        Engine::initialize_with(&config, pool.connect_options().as_ref().clone()).unwrap()
    }

    #[sqlx::test]
    async fn test_scope_commits_on_success(pool: PgPool) {
        let sessions = SessionFactory::new(pool.clone());

        let result: Result<(), Error> = sessions
            .scope(|conn| {
                Box::pin(async move {
                    insert_user(conn, "a@example.com").await?;
                    insert_user(conn, "b@example.com").await?;
                    Ok(())
                })
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(count_users(&pool).await, 2);
    }

    #[sqlx::test]
    async fn test_scope_rolls_back_on_error(pool: PgPool) {
        let engine = single_connection_engine(&pool);
        let sessions = engine.sessions();

        let result: Result<(), Error> = sessions
            .scope(|conn| {
                Box::pin(async move {
                    insert_user(conn, "a@example.com").await?;
                    Err(Error::bad_request("changed my mind"))
                })
            })
            .await;

        assert!(matches!(result, Err(Error::BadRequest { .. })));
        assert_eq!(count_users(&pool).await, 0);

        // The only connection was returned to the pool
        let again: Result<(), Error> = sessions
            .scope(|conn| Box::pin(async move { Ok(insert_user(conn, "c@example.com").await?) }))
            .await;
        assert!(again.is_ok());
        assert_eq!(count_users(&pool).await, 1);
    }

    #[sqlx::test]
    async fn test_scope_rolls_back_partial_writes_on_db_error(pool: PgPool) {
        let sessions = SessionFactory::new(pool.clone());

        let result: Result<(), Error> = sessions
            .scope(|conn| {
                Box::pin(async move {
                    insert_user(conn, "dup@example.com").await?;
                    // Violates users_email_unique
                    insert_user(conn, "dup@example.com").await?;
                    Ok(())
                })
            })
            .await;

        assert!(matches!(result, Err(Error::Database(DbError::UniqueViolation { .. }))));
        assert_eq!(count_users(&pool).await, 0);
    }

    #[sqlx::test]
    async fn test_dropped_session_rolls_back(pool: PgPool) {
        let engine = single_connection_engine(&pool);
        let sessions = engine.sessions();

        {
            let mut session = sessions.open().await.unwrap();
            insert_user(&mut session, "dropped@example.com").await.unwrap();
        }

        let mut session = sessions.open().await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&mut *session)
            .await
            .unwrap();
        assert_eq!(count, 0);
        session.rollback().await.unwrap();
    }

    #[sqlx::test]
    async fn test_statement_over_timeout_is_connection_failure(pool: PgPool) {
        let options = pool
            .connect_options()
            .as_ref()
            .clone()
            .options([("statement_timeout", "100ms")]);
        let config = DatabaseConfig {
            name: "fastvue".to_string(),
            username: "postgres".to_string(),
            pool_size: 1,
            ..Default::default()
        };
        let sessions = Engine::initialize_with(&config, options).unwrap().sessions();

        let result: Result<(), Error> = sessions
            .scope(|conn| {
                Box::pin(async move {
                    insert_user(conn, "slow@example.com").await?;
                    sqlx::query("SELECT pg_sleep(1)").execute(conn).await.map_err(DbError::from)?;
                    Ok(())
                })
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, Error::Database(DbError::Timeout)), "{err:?}");
        let record = crate::errors::translate(&err);
        assert_eq!(record.status, axum::http::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(record.error_code, "DATABASE_CONNECTION_ERROR");
        assert_eq!(count_users(&pool).await, 0);
    }

    #[sqlx::test]
    async fn test_explicit_commit_and_rollback(pool: PgPool) {
        let sessions = SessionFactory::new(pool.clone());

        let mut session = sessions.open().await.unwrap();
        insert_user(&mut session, "kept@example.com").await.unwrap();
        session.commit().await.unwrap();

        let mut session = sessions.open().await.unwrap();
        insert_user(&mut session, "discarded@example.com").await.unwrap();
        session.rollback().await.unwrap();

        assert_eq!(count_users(&pool).await, 1);
    }

    #[sqlx::test]
    async fn test_cancelled_scope_releases_connection(pool: PgPool) {
        let engine = single_connection_engine(&pool);
        let sessions = engine.sessions();

        let slow = sessions.scope(|conn| {
            Box::pin(async move {
                insert_user(conn, "slow@example.com").await?;
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok::<_, DbError>(())
            })
        });
        assert!(tokio::time::timeout(std::time::Duration::from_millis(300), slow).await.is_err());

        // The cancelled transaction rolled back and its connection is usable again
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(engine.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
