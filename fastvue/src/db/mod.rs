//! Database layer for data persistence and access.
//!
//! This module implements the data access layer using SQLx with PostgreSQL.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   Handlers   │  (API request handlers)
//! └──────┬───────┘
//!        │
//!        ↓
//! ┌──────────────┐
//! │ Repositories │  (db::handlers - queries over one connection)
//! └──────┬───────┘
//!        │
//!        ↓
//! ┌──────────────┐
//! │   Sessions   │  (db::session - one transaction per unit of work)
//! └──────┬───────┘
//!        │
//!        ↓
//! ┌──────────────┐
//! │    Engine    │  (db::engine - the bounded connection pool)
//! └──────┬───────┘
//!        │
//!        ↓
//! ┌──────────────┐
//! │  PostgreSQL  │
//! └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`engine`]: The process-wide pool handle
//! - [`session`]: Transactional units of work
//! - [`health`]: Liveness and migration probing
//! - [`handlers`]: Repository implementations for CRUD operations
//! - [`models`]: Database record structures matching table schemas
//! - [`errors`]: Classification of driver errors
//! - [`metrics`]: Pool gauges
//!
//! # Migrations
//!
//! Migrations live in the `migrations/` directory and are embedded with
//! [`crate::migrator`]. They are applied by `fastvue setup-db`, or at startup in permissive
//! deployment mode.

pub mod engine;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod models;
pub mod session;
