//! Test utilities shared by the unit and integration tests.

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, header::AUTHORIZATION};
use axum_test::TestServer;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    AppState,
    api::models::users::UserResponse,
    auth::{
        password::{Argon2Params, hash_string_with_params},
        session::create_access_token,
    },
    config::{Config, DatabaseConfig},
    db::{
        engine::Engine,
        handlers::{Repository, Users},
        health::DatabaseProber,
        models::users::UserCreateDBRequest,
    },
    types::UserId,
};

/// Password given to every user made by [`create_test_user`]
pub const TEST_PASSWORD: &str = "test-password";

pub fn create_test_config() -> Config {
    Config {
        app_name: "fastvue".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        access_token_expire_minutes: 60,
        database: DatabaseConfig {
            name: "fastvue_test".to_string(),
            username: "postgres".to_string(),
            pool_size: 2,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// State over a `#[sqlx::test]` pool, without running the startup lifecycle
pub fn create_test_state(pool: PgPool) -> AppState {
    let config = create_test_config();
    let engine = Engine::from_pool(pool, config.database.migrations_table.clone());

    AppState::builder()
        .config(config)
        .sessions(engine.sessions())
        .prober(Arc::new(DatabaseProber::new(engine.clone())))
        .engine(engine)
        .build()
}

pub async fn create_test_app(pool: PgPool) -> (TestServer, AppState) {
    create_test_app_with_config(pool, create_test_config()).await
}

/// Run the full startup against the test pool and serve the resulting router in-process
pub async fn create_test_app_with_config(pool: PgPool, config: Config) -> (TestServer, AppState) {
    let engine = Engine::from_pool(pool, config.database.migrations_table.clone());

    let app = crate::Application::new_with_engine(config, engine)
        .await
        .expect("Failed to create application");

    app.into_test_server()
}

/// Insert an active user with [`TEST_PASSWORD`]
pub async fn create_test_user(pool: &PgPool, is_superuser: bool) -> UserResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let mut users_repo = Users::new(&mut conn);
    let email = format!("testuser_{}@example.com", Uuid::new_v4().simple());

    // Cheap hashing parameters; verification reads them from the hash
    let hashed_password = hash_string_with_params(
        TEST_PASSWORD,
        Argon2Params {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        },
    )
    .expect("Failed to hash test password");

    let user_create = UserCreateDBRequest {
        email,
        hashed_password,
        full_name: Some("Test User".to_string()),
        is_active: true,
        is_superuser,
        is_verified: false,
    };

    let user = users_repo.create(&user_create).await.expect("Failed to create test user");
    UserResponse::from(user)
}

/// `Authorization: Bearer <token>` for the given user
pub fn auth_header(user_id: UserId, config: &Config) -> (HeaderName, HeaderValue) {
    let token = create_access_token(user_id, config).expect("Failed to create access token");
    let value = HeaderValue::from_str(&format!("Bearer {token}")).expect("Token is not a valid header value");
    (AUTHORIZATION, value)
}
