//! Application error taxonomy and the HTTP error envelope.
//!
//! Every failure that reaches a handler boundary is an [`Error`]. [`translate`] classifies it into
//! an [`ErrorRecord`] (kind, curated message, machine-readable code, status, details) and the
//! record renders the stable JSON body:
//!
//! ```json
//! {
//!   "success": false,
//!   "message": "Resource already exists",
//!   "error_code": "INTEGRITY_ERROR",
//!   "status_code": 409,
//!   "details": {},
//!   "timestamp": "2025-01-01T00:00:00.000Z",
//!   "path": "/api/v1/users/"
//! }
//! ```
//!
//! Raw driver messages are logged server-side and never copied into the body.

use crate::db::errors::DbError;
use crate::db::health::missing_database_suggestions;
use axum::{
    Json,
    extract::{
        FromRequest, FromRequestParts, Request,
        rejection::{FormRejection, JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Authenticated, but not allowed to do this
    #[error("{message}")]
    Forbidden { message: String },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Request body, query or path did not match the expected shape
    #[error("{message}")]
    Validation { message: String, errors: Vec<FieldError> },

    /// Requested resource not found
    #[error("{message}")]
    NotFound { message: String },

    /// The database could not be reached while serving a request
    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    /// The configured database does not exist on the server
    #[error("Database '{database}' does not exist")]
    DatabaseNotFound { database: String },

    /// Schema missing or migrations could not be applied
    #[error("Migration error: {message}")]
    Migration { message: String },

    /// Missing or malformed configuration; fatal at startup
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A single input problem, reported under `details.errors`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: Option<String>,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
            kind: kind.into(),
        }
    }
}

impl Error {
    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound { message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest { message: message.into() }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Error::Forbidden { message: message.into() }
    }

    /// Validation failure on a single field
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Error::Validation {
            message: "Validation failed".to_string(),
            errors: vec![FieldError::new(field, message, "value_error")],
        }
    }

    pub fn status_code(&self) -> StatusCode {
        translate(self).status
    }
}

/// Classification of an error, independent of how it is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthenticated,
    Forbidden,
    BadRequest,
    Validation,
    NotFound,
    MethodNotAllowed,
    Integrity,
    DatabaseConnection,
    DatabaseNotFound,
    Migration,
    Configuration,
    Unknown,
}

/// A classified failure, ready to be rendered exactly once.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub error_code: &'static str,
    pub status: StatusCode,
    pub details: Option<Value>,
}

impl ErrorRecord {
    fn new(kind: ErrorKind, status: StatusCode, error_code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            error_code,
            status,
            details: None,
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The JSON envelope. `path` is the request path when known.
    pub fn to_body(&self, path: Option<&str>) -> Value {
        json!({
            "success": false,
            "message": self.message,
            "error_code": self.error_code,
            "status_code": self.status.as_u16(),
            "details": self.details.clone().unwrap_or_else(|| json!({})),
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "path": path,
        })
    }

    /// Render as a response. The record travels along as an extension so that
    /// [`render_errors`] can stamp the request path onto the body.
    pub fn to_response(&self, path: Option<&str>) -> Response {
        let mut response = (self.status, Json(self.to_body(path))).into_response();
        response.extensions_mut().insert(self.clone());
        response
    }
}

/// Record for an error response produced by the router itself rather than by [`Error`].
fn from_status(status: StatusCode) -> ErrorRecord {
    match status {
        StatusCode::NOT_FOUND => {
            ErrorRecord::new(ErrorKind::NotFound, status, "RESOURCE_NOT_FOUND", "Resource not found")
        }
        StatusCode::METHOD_NOT_ALLOWED => {
            ErrorRecord::new(ErrorKind::MethodNotAllowed, status, "METHOD_NOT_ALLOWED", "Method not allowed")
        }
        StatusCode::UNAUTHORIZED => {
            ErrorRecord::new(ErrorKind::Unauthenticated, status, "NOT_AUTHENTICATED", "Not authenticated")
        }
        StatusCode::FORBIDDEN => ErrorRecord::new(ErrorKind::Forbidden, status, "FORBIDDEN", "Forbidden"),
        status if status.is_client_error() => ErrorRecord::new(
            ErrorKind::BadRequest,
            status,
            "BAD_REQUEST",
            status.canonical_reason().unwrap_or("Bad request"),
        ),
        status => ErrorRecord {
            status,
            ..internal()
        },
    }
}

fn integrity(message: &str) -> ErrorRecord {
    ErrorRecord::new(ErrorKind::Integrity, StatusCode::CONFLICT, "INTEGRITY_ERROR", message)
}

fn unavailable() -> ErrorRecord {
    ErrorRecord::new(
        ErrorKind::DatabaseConnection,
        StatusCode::SERVICE_UNAVAILABLE,
        "DATABASE_CONNECTION_ERROR",
        "Database connection failed",
    )
}

fn database_not_found(database: &str) -> ErrorRecord {
    ErrorRecord::new(
        ErrorKind::DatabaseNotFound,
        StatusCode::SERVICE_UNAVAILABLE,
        "DATABASE_NOT_FOUND",
        format!("Database '{database}' does not exist"),
    )
    .with_details(json!({
        "database_name": database,
        "suggestions": missing_database_suggestions(database),
    }))
}

fn internal() -> ErrorRecord {
    ErrorRecord::new(
        ErrorKind::Unknown,
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An unexpected error occurred",
    )
}

/// Classify an error. Pure: no logging, no I/O.
pub fn translate(error: &Error) -> ErrorRecord {
    match error {
        Error::Unauthenticated { message } => ErrorRecord::new(
            ErrorKind::Unauthenticated,
            StatusCode::UNAUTHORIZED,
            "NOT_AUTHENTICATED",
            message.clone().unwrap_or_else(|| "Not authenticated".to_string()),
        ),
        Error::Forbidden { message } => {
            ErrorRecord::new(ErrorKind::Forbidden, StatusCode::FORBIDDEN, "FORBIDDEN", message.clone())
        }
        Error::BadRequest { message } => {
            ErrorRecord::new(ErrorKind::BadRequest, StatusCode::BAD_REQUEST, "BAD_REQUEST", message.clone())
        }
        Error::Validation { message, errors } => ErrorRecord::new(
            ErrorKind::Validation,
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            message.clone(),
        )
        .with_details(json!({ "errors": errors })),
        Error::NotFound { message } => {
            ErrorRecord::new(ErrorKind::NotFound, StatusCode::NOT_FOUND, "RESOURCE_NOT_FOUND", message.clone())
        }
        Error::DatabaseConnection { .. } => unavailable(),
        Error::DatabaseNotFound { database } => database_not_found(database),
        Error::Migration { .. } => ErrorRecord::new(
            ErrorKind::Migration,
            StatusCode::SERVICE_UNAVAILABLE,
            "MIGRATION_ERROR",
            "Database schema is not initialized",
        )
        .with_details(json!({
            "suggestions": ["Run: fastvue setup-db", "Apply pending migrations before serving traffic"],
        })),
        Error::Configuration { .. } => ErrorRecord::new(
            ErrorKind::Configuration,
            StatusCode::INTERNAL_SERVER_ERROR,
            "CONFIGURATION_ERROR",
            "Server configuration error",
        ),
        Error::Database(db_err) => match db_err {
            DbError::NotFound => {
                ErrorRecord::new(ErrorKind::NotFound, StatusCode::NOT_FOUND, "RESOURCE_NOT_FOUND", "Resource not found")
            }
            DbError::UniqueViolation { .. } => integrity("Resource already exists"),
            DbError::ForeignKeyViolation { .. } => integrity("Referenced resource not found"),
            DbError::CheckViolation { .. } => integrity("Data integrity constraint violated"),
            DbError::DatabaseNotFound { database } => database_not_found(database),
            DbError::Connection { .. } | DbError::Timeout => unavailable(),
            DbError::Other(_) => internal(),
        },
        Error::Internal { .. } | Error::Other(_) => internal(),
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let record = translate(&self);

        // Log full error details for debugging - different log levels based on severity
        match record.kind {
            ErrorKind::Unknown | ErrorKind::Configuration => {
                tracing::error!(error_code = record.error_code, "Internal service error: {:#}", self);
            }
            ErrorKind::DatabaseConnection | ErrorKind::DatabaseNotFound | ErrorKind::Migration => {
                tracing::error!(error_code = record.error_code, "Database unavailable: {:#}", self);
            }
            ErrorKind::Integrity => {
                tracing::warn!(error_code = record.error_code, "Database constraint error: {:?}", self);
            }
            ErrorKind::Unauthenticated | ErrorKind::Forbidden => {
                tracing::info!("Authorization error: {}", self);
            }
            ErrorKind::BadRequest | ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::MethodNotAllowed => {
                tracing::debug!("Client error: {}", self);
            }
        }

        record.to_response(None)
    }
}

/// Middleware that re-renders error envelopes with the path of the request that produced them.
///
/// Bodyless error responses from the router itself (e.g. 405 for a known path) get the same
/// envelope. Error responses that already carry a body, like the database health report, are
/// left alone.
pub async fn render_errors(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();
    let mut response = next.run(request).await;

    if let Some(record) = response.extensions_mut().remove::<ErrorRecord>() {
        return record.to_response(Some(&path));
    }

    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) || response.headers().contains_key(header::CONTENT_TYPE) {
        return response;
    }

    let mut rendered = from_status(status).to_response(Some(&path));
    for name in [header::ALLOW, header::WWW_AUTHENTICATE] {
        if let Some(value) = response.headers().get(&name) {
            rendered.headers_mut().insert(name, value.clone());
        }
    }
    rendered
}

/// Router fallback for unknown routes.
pub async fn route_not_found() -> Error {
    Error::not_found("Resource not found")
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

fn rejected(kind: &str, message: String) -> Error {
    Error::Validation {
        message: "Validation failed".to_string(),
        errors: vec![FieldError {
            field: None,
            message,
            kind: kind.to_string(),
        }],
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        let kind = match &rejection {
            JsonRejection::JsonDataError(_) => "json_data",
            JsonRejection::JsonSyntaxError(_) => "json_syntax",
            JsonRejection::MissingJsonContentType(_) => "missing_content_type",
            _ => "json_invalid",
        };
        rejected(kind, rejection.body_text())
    }
}

impl From<FormRejection> for Error {
    fn from(rejection: FormRejection) -> Self {
        rejected("form_invalid", rejection.body_text())
    }
}

impl From<QueryRejection> for Error {
    fn from(rejection: QueryRejection) -> Self {
        rejected("query_invalid", rejection.body_text())
    }
}

impl From<PathRejection> for Error {
    fn from(rejection: PathRejection) -> Self {
        rejected("path_invalid", rejection.body_text())
    }
}

/// Wrap an axum extractor so its rejection renders through the error envelope.
macro_rules! enveloped_extractor {
    (body $name:ident, $inner:ident, $rejection:ty) => {
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name<T>(pub T);

        impl<S, T> FromRequest<S> for $name<T>
        where
            axum::$inner<T>: FromRequest<S, Rejection = $rejection>,
            S: Send + Sync,
        {
            type Rejection = Error;

            async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
                let axum::$inner(value) = axum::$inner::<T>::from_request(req, state).await?;
                Ok($name(value))
            }
        }
    };
    (parts $name:ident, $inner:ident, $rejection:ty) => {
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name<T>(pub T);

        impl<S, T> FromRequestParts<S> for $name<T>
        where
            axum::extract::$inner<T>: FromRequestParts<S, Rejection = $rejection>,
            S: Send + Sync,
        {
            type Rejection = Error;

            async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Self::Rejection> {
                let axum::extract::$inner(value) = axum::extract::$inner::<T>::from_request_parts(parts, state).await?;
                Ok($name(value))
            }
        }
    };
}

enveloped_extractor!(body ApiJson, Json, JsonRejection);
enveloped_extractor!(body ApiForm, Form, FormRejection);
enveloped_extractor!(parts ApiQuery, Query, QueryRejection);
enveloped_extractor!(parts ApiPath, Path, PathRejection);

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
