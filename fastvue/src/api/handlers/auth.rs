use axum::{Json, extract::State};

use crate::{
    AppState,
    api::models::auth::{LoginForm, TokenResponse},
    auth::{self, session},
    errors::{ApiForm, Error},
};

/// OAuth2-compatible password login: exchange email and password for an access token
#[tracing::instrument(skip_all)]
pub async fn login_access_token(State(state): State<AppState>, ApiForm(form): ApiForm<LoginForm>) -> Result<Json<TokenResponse>, Error> {
    let mut pool_conn = state.sessions.acquire().await?;

    let user = auth::authenticate(&mut pool_conn, &form.username, &form.password)
        .await?
        .ok_or_else(|| Error::not_found("Incorrect email or password"))?;

    if !user.is_active {
        return Err(Error::bad_request("Inactive user"));
    }

    let access_token = session::create_access_token(user.id, &state.config)?;
    Ok(Json(TokenResponse::bearer(access_token)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{
            handlers::{Repository, Users},
            models::users::UserUpdateDBRequest,
        },
        test_utils::{TEST_PASSWORD, create_test_state, create_test_user},
    };
    use axum::{Router, http::StatusCode, routing::post};
    use axum_test::TestServer;
    use serde_json::Value;
    use sqlx::PgPool;

    fn server(state: AppState) -> TestServer {
        let app = Router::new()
            .route("/login/access-token", post(login_access_token))
            .with_state(state);
        TestServer::new(app).unwrap()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_success(pool: PgPool) {
        let state = create_test_state(pool.clone());
        let user = create_test_user(&pool, false).await;
        let server = server(state.clone());

        let response = server
            .post("/login/access-token")
            .form(&[("username", user.email.as_str()), ("password", TEST_PASSWORD)])
            .await;
        response.assert_status_ok();

        let body: TokenResponse = response.json();
        assert_eq!(body.token_type, "bearer");
        let claims = session::verify_access_token(&body.access_token, &state.config).unwrap();
        assert_eq!(claims.sub, user.id);
    }

    #[sqlx::test]
    async fn test_login_wrong_password(pool: PgPool) {
        let user = create_test_user(&pool, false).await;
        let server = server(create_test_state(pool));

        let response = server
            .post("/login/access-token")
            .form(&[("username", user.email.as_str()), ("password", "wrong-password")])
            .await;
        response.assert_status(StatusCode::NOT_FOUND);

        let body: Value = response.json();
        assert_eq!(body["message"], "Incorrect email or password");
        assert_eq!(body["error_code"], "RESOURCE_NOT_FOUND");
    }

    #[sqlx::test]
    async fn test_login_unknown_email_looks_like_wrong_password(pool: PgPool) {
        let server = server(create_test_state(pool));

        let response = server
            .post("/login/access-token")
            .form(&[("username", "nobody@example.com"), ("password", TEST_PASSWORD)])
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["message"], "Incorrect email or password");
    }

    #[sqlx::test]
    async fn test_login_inactive_user(pool: PgPool) {
        let user = create_test_user(&pool, false).await;
        let mut conn = pool.acquire().await.unwrap();
        Users::new(&mut conn)
            .update(
                user.id,
                &UserUpdateDBRequest {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let server = server(create_test_state(pool.clone()));
        let response = server
            .post("/login/access-token")
            .form(&[("username", user.email.as_str()), ("password", TEST_PASSWORD)])
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["message"], "Inactive user");
    }

    #[sqlx::test]
    async fn test_login_missing_field_is_validation_error(pool: PgPool) {
        let server = server(create_test_state(pool));

        let response = server.post("/login/access-token").form(&[("username", "someone@example.com")]).await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.json::<Value>()["error_code"], "VALIDATION_ERROR");
    }
}
