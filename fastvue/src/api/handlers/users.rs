use axum::{Json, extract::State, http::StatusCode};

use crate::{
    AppState,
    api::models::{
        auth::Message,
        users::{CurrentUser, UserCreate, UserResponse, UserUpdate, UsersResponse},
    },
    auth::{
        current_user::{NOT_ENOUGH_PRIVILEGES, SuperUser},
        password,
    },
    db::{
        errors::DbError,
        handlers::{Repository, Users, users::UserFilter},
        models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    },
    errors::{ApiJson, ApiPath, ApiQuery, Error},
    types::{Pagination, UserId},
};

pub const USER_EXISTS: &str = "User already exists";

/// List users (superuser only)
#[tracing::instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    _: SuperUser,
    ApiQuery(page): ApiQuery<Pagination>,
) -> Result<Json<UsersResponse>, Error> {
    let mut pool_conn = state.sessions.acquire().await?;
    let mut repo = Users::new(&mut pool_conn);

    let count = repo.count().await?;
    let users = repo.list(&UserFilter::from(page)).await?;

    Ok(Json(UsersResponse {
        data: users.into_iter().map(UserResponse::from).collect(),
        count,
    }))
}

/// The authenticated user's own record
#[tracing::instrument(skip_all)]
pub async fn get_current_user(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<UserResponse>, Error> {
    let mut pool_conn = state.sessions.acquire().await?;
    let user = Users::new(&mut pool_conn)
        .get_by_id(current_user.id)
        .await?
        .ok_or_else(|| Error::not_found("User not found"))?;

    Ok(Json(UserResponse::from(user)))
}

/// Create a user (superuser only)
#[tracing::instrument(skip_all)]
pub async fn create_user(
    State(state): State<AppState>,
    _: SuperUser,
    ApiJson(user_in): ApiJson<UserCreate>,
) -> Result<(StatusCode, Json<UserResponse>), Error> {
    user_in.validate()?;

    let hashed_password = password::hash_password(user_in.password.clone()).await?;
    let request = UserCreateDBRequest {
        email: user_in.email,
        hashed_password,
        full_name: user_in.full_name,
        is_active: user_in.is_active,
        is_superuser: user_in.is_superuser,
        is_verified: false,
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

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// Get a user by id. Users may read themselves; anyone else needs a superuser.
#[tracing::instrument(skip_all)]
pub async fn get_user(
    State(state): State<AppState>,
    current_user: CurrentUser,
    ApiPath(user_id): ApiPath<UserId>,
) -> Result<Json<UserResponse>, Error> {
    if user_id != current_user.id && !current_user.is_superuser {
        return Err(Error::forbidden(NOT_ENOUGH_PRIVILEGES));
    }

    let mut pool_conn = state.sessions.acquire().await?;
    let user = Users::new(&mut pool_conn)
        .get_by_id(user_id)
        .await?
        .ok_or_else(|| Error::not_found("User not found"))?;

    Ok(Json(UserResponse::from(user)))
}

/// Update a user. Users may change their own profile and password; account flags and other
/// users need a superuser.
#[tracing::instrument(skip_all)]
pub async fn update_user(
    State(state): State<AppState>,
    current_user: CurrentUser,
    ApiPath(user_id): ApiPath<UserId>,
    ApiJson(update): ApiJson<UserUpdate>,
) -> Result<Json<UserResponse>, Error> {
    if !current_user.is_superuser && (user_id != current_user.id || update.changes_flags()) {
        return Err(Error::forbidden(NOT_ENOUGH_PRIVILEGES));
    }
    update.validate()?;

    let hashed_password = match update.password {
        Some(password) => Some(password::hash_password(password).await?),
        None => None,
    };
    let request = UserUpdateDBRequest {
        email: update.email,
        full_name: update.full_name,
        hashed_password,
        is_active: update.is_active,
        is_superuser: update.is_superuser,
    };

    let user = state
        .sessions
        .scope::<_, Error, _>(move |conn| {
            Box::pin(async move {
                match Users::new(conn).update(user_id, &request).await {
                    Ok(user) => Ok(user),
                    Err(DbError::NotFound) => Err(Error::not_found("User not found")),
                    Err(e) => Err(e.into()),
                }
            })
        })
        .await?;

    Ok(Json(UserResponse::from(user)))
}

/// Delete a user (superuser only, never themselves)
#[tracing::instrument(skip_all)]
pub async fn delete_user(
    State(state): State<AppState>,
    SuperUser(current_user): SuperUser,
    ApiPath(user_id): ApiPath<UserId>,
) -> Result<Json<Message>, Error> {
    if user_id == current_user.id {
        return Err(Error::forbidden("Super users are not allowed to delete themselves"));
    }

    state
        .sessions
        .scope::<_, Error, _>(move |conn| {
            Box::pin(async move {
                if Users::new(conn).delete(user_id).await? {
                    Ok(())
                } else {
                    Err(Error::not_found("User not found"))
                }
            })
        })
        .await?;

    Ok(Json(Message::new("User deleted successfully")))
}
