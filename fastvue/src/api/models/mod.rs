//! API request and response data models.
//!
//! API models are distinct from the database models in [`crate::db::models`], so the stored
//! representation (password hashes included) never leaks into a response.

pub mod auth;
pub mod users;
