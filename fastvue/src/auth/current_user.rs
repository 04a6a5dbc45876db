use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::session,
    db::handlers::{Repository, Users},
    errors::{Error, Result},
};
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{instrument, trace};

pub const NOT_ENOUGH_PRIVILEGES: &str = "The user doesn't have enough privileges";

/// Extract the bearer token from the Authorization header
/// Returns:
/// - None: No Authorization header, or not a Bearer token
/// - Some(Ok(token)): Bearer token present
/// - Some(Err(error)): Header present but not valid UTF-8
fn bearer_token(parts: &Parts) -> Option<Result<&str>> {
    let auth_header = parts.headers.get(axum::http::header::AUTHORIZATION)?;

    let auth_str = match auth_header.to_str() {
        Ok(s) => s,
        Err(e) => {
            return Some(Err(Error::BadRequest {
                message: format!("Invalid authorization header: {e}"),
            }));
        }
    };

    // Scheme is case-insensitive
    let (scheme, token) = auth_str.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return None;
    }
    Some(Ok(token.trim()))
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip_all)]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = match bearer_token(parts) {
            Some(token) => token?,
            None => {
                trace!("No bearer token in request");
                return Err(Error::Unauthenticated {
                    message: Some("Not authenticated".to_string()),
                });
            }
        };

        let claims = session::verify_access_token(token, &state.config)?;

        let mut conn = state.sessions.acquire().await?;
        let user = Users::new(&mut conn)
            .get_by_id(claims.sub)
            .await?
            .ok_or_else(|| Error::not_found("User not found"))?;

        if !user.is_active {
            return Err(Error::bad_request("Inactive user"));
        }

        trace!(user_id = %user.id, "Authenticated bearer token");
        Ok(user.into())
    }
}

/// An authenticated caller who is also a superuser
#[derive(Debug, Clone)]
pub struct SuperUser(pub CurrentUser);

impl FromRequestParts<AppState> for SuperUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        require_superuser(user).map(SuperUser)
    }
}

pub fn require_superuser(user: CurrentUser) -> Result<CurrentUser> {
    if user.is_superuser {
        Ok(user)
    } else {
        Err(Error::forbidden(NOT_ENOUGH_PRIVILEGES))
    }
}
