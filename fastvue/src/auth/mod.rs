//! Authentication and authorization.
//!
//! Password login issues a short-lived HS256 access token; every protected route resolves the
//! caller from the `Authorization: Bearer <token>` header.
//!
//! # Modules
//!
//! - [`current_user`]: Extractors for the authenticated user ([`current_user::SuperUser`] for
//!   superuser-only routes)
//! - [`password`]: Password hashing and verification using Argon2
//! - [`session`]: Access token creation and verification
//!
//! # Usage in Handlers
//!
//! ```ignore
//! use fastvue::api::models::users::CurrentUser;
//!
//! async fn protected_handler(current_user: CurrentUser) -> Result<String, Error> {
//!     Ok(format!("Hello, {}!", current_user.email))
//! }
//! ```

pub mod current_user;
pub mod password;
pub mod session;

use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    db::{handlers::Users, models::users::UserDBResponse},
    errors::Error,
};

/// Look up a user by email and check their password.
///
/// Returns `None` for an unknown email or a wrong password alike. Activity is not checked here.
#[instrument(skip(conn, password), err)]
pub async fn authenticate(conn: &mut PgConnection, email: &str, password: &str) -> Result<Option<UserDBResponse>, Error> {
    let Some(user) = Users::new(conn).get_user_by_email(email).await? else {
        return Ok(None);
    };

    let valid = password::verify_password(password.to_string(), user.hashed_password.clone()).await?;
    Ok(valid.then_some(user))
}
