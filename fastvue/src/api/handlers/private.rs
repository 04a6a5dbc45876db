//! Unauthenticated helpers for local and staging environments. Never mounted in production.

use axum::{Json, extract::State};

use crate::{
    AppState,
    api::{
        handlers::users::USER_EXISTS,
        models::users::{UserRegister, UserResponse},
    },
    auth::password,
    db::{
        handlers::{Repository, Users},
        models::users::UserCreateDBRequest,
    },
    errors::{ApiJson, Error},
};

/// Create a user without authentication
#[tracing::instrument(skip_all)]
pub async fn create_user(State(state): State<AppState>, ApiJson(user_in): ApiJson<UserRegister>) -> Result<Json<UserResponse>, Error> {
    user_in.validate()?;

    let hashed_password = password::hash_password(user_in.password.clone()).await?;
    let request = UserCreateDBRequest {
        email: user_in.email,
        hashed_password,
        full_name: user_in.full_name,
        is_active: true,
        is_superuser: false,
        is_verified: user_in.is_verified,
    };

    let user = state
        .sessions
        .scope::<_, Error, _>(move |conn| {
            Box::pin(async move {
                let mut users = Users::new(conn);
                if users.get_user_by_email(&request.email).await?.is_some() {
                    return Err(Error::bad_request(USER_EXISTS));
                }
                Ok(users.create(&request).await?)
            })
        })
        .await?;

    Ok(Json(UserResponse::from(user)))
}
