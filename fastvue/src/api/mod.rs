//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! Everything below is nested under the configured `api_path` (`/api/v1` by default), except
//! the health endpoints which sit at the root:
//!
//! - **Authentication** (`/auth/login/access-token`): OAuth2 password login
//! - **Users** (`/users/*`): User management, superuser-gated where it touches other accounts
//! - **Private** (`/private/users`): Local and staging only
//! - **Health** (`/health`, `/health/database`)

pub mod handlers;
pub mod models;
