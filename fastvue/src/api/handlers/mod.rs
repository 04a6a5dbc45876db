//! HTTP request handlers.
//!
//! - [`auth`]: Password login issuing access tokens
//! - [`users`]: User management, including `/users/me`
//! - [`private`]: Unauthenticated user creation for local and staging
//! - [`health`]: Health reports for the API and the database

pub mod auth;
pub mod health;
pub mod private;
pub mod users;
