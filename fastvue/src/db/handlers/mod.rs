//! Repository implementations for database access.
//!
//! Each repository wraps a `&mut PgConnection`, which is normally a [`crate::db::session::Session`]
//! so that everything it does commits or rolls back together:
//!
//! ```ignore
//! use fastvue::db::handlers::{Repository, Users};
//!
//! let user = state.sessions.scope(|conn| Box::pin(async move {
//!     Users::new(conn).get_user_by_email("user@example.com").await
//! })).await?;
//! ```

pub mod repository;
pub mod users;

pub use repository::Repository;
pub use users::Users;
