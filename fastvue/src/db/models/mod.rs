//! Database record models matching table schemas.
//!
//! Database models are distinct from API models (see [`crate::api::models`]) so the stored
//! representation, which includes the password hash, never leaks into a response by accident.

pub mod users;
